//! # vitrine-core
//!
//! Core crawler and persistent cache for IIIF Presentation collection sites.
//!
//! Starting from a root collection, the crawler discovers every reachable
//! manifest, fetches and normalizes each one, assigns stable human-readable
//! slugs, and persists both the raw documents and an index describing their
//! relationships. Repeated builds are incremental, resumable, and
//! network-frugal: unchanged resources are served from the on-disk cache, and
//! a change in the root collection's identity invalidates the whole cache
//! before the next crawl.
//!
//! ## Architecture
//!
//! - **Identifier normalization** ([`normalize`]): one canonical string per
//!   resource, query parameters sorted.
//! - **Slug allocation** ([`slug`]): collision-free short names, stable
//!   across runs.
//! - **Cache repository** ([`repository`]): slug-keyed documents plus the
//!   `index.json` source of truth, with self-healing lookup.
//! - **Traversal** ([`traverse`]): stack-based, cycle-safe walk producing a
//!   flat task list.
//! - **Worker pool** ([`pool`]): chunked bounded concurrency with a
//!   deterministically ordered progress stream.
//! - **Session** ([`session`]): owns all build-scoped state and orchestrates
//!   one crawl end to end.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vitrine_core::{CrawlConfig, CrawlSession};
//!
//! # async fn example(renderer: Box<dyn vitrine_core::Renderer>) -> vitrine_core::Result<()> {
//! let config = CrawlConfig::new(
//!     "https://example.org/iiif/collection.json",
//!     ".vitrine/cache",
//! )
//! .apply_env_overrides();
//!
//! let mut session = CrawlSession::new(config, renderer)?;
//! let outcome = session.crawl().await?;
//! println!("Rendered {} works", outcome.records.len());
//! # Ok(())
//! # }
//! ```

/// Crawl configuration and environment overrides
pub mod config;
/// Error types and result aliases
pub mod error;
/// HTTP and file-scheme document fetching
pub mod fetcher;
/// Tolerant IIIF Presentation document model
pub mod iiif;
/// Identifier canonicalization
pub mod normalize;
/// Chunked worker pool with ordered progress logging
pub mod pool;
/// Slug-keyed cache and index persistence
pub mod repository;
/// Crawl orchestration and build-scoped state
pub mod session;
/// Slug derivation and allocation
pub mod slug;
/// Thumbnail enrichment boundary
pub mod thumbnail;
/// Stack-based collection traversal
pub mod traverse;
/// Core data types and index structures
pub mod types;

// Re-export commonly used types
pub use config::{CrawlConfig, ThumbnailOptions};
pub use error::{Error, Result};
pub use fetcher::{FetchedDocument, Fetcher, content_hash};
pub use iiif::{ChildRef, LocalizedString, ResourceDoc};
pub use normalize::normalize_id;
pub use pool::{FetchPool, LogSink, OrderedLog, RenderContext, Renderer};
pub use repository::{CacheRepository, CachedResource};
pub use session::{CrawlOutcome, CrawlSession};
pub use slug::{SlugAllocator, slugify};
pub use thumbnail::{EmbeddedThumbnailResolver, Thumbnail, ThumbnailResolver};
pub use traverse::Traverser;
pub use types::{
    FetchTask, IndexEntry, ManifestIndex, ResourceKind, RootSignature, WorkRecord,
};
