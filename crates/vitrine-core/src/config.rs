//! Crawl configuration.
//!
//! The configuration is consumed as a plain struct: file loading and CLI
//! parsing happen outside this crate. Environment variables provide
//! deployment-level overrides on top of whatever the caller assembled.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Default number of tasks per sequential chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Default number of concurrent workers within a chunk.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default deadline for network-backed thumbnail resolution.
pub const DEFAULT_THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(15);

const DEFAULT_PREFERRED_SIZE: u32 = 400;
const MAX_CONCURRENCY: usize = 50;

/// Thumbnail enrichment options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailOptions {
    /// Allow the resolver to perform network requests of its own.
    #[serde(rename = "unsafe", default)]
    pub allow_unsafe: bool,
    /// Preferred pixel size for the representative image.
    #[serde(default = "default_preferred_size")]
    pub preferred_size: u32,
}

const fn default_preferred_size() -> u32 {
    DEFAULT_PREFERRED_SIZE
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            allow_unsafe: false,
            preferred_size: DEFAULT_PREFERRED_SIZE,
        }
    }
}

/// Configuration for one crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Identifier of the root collection to crawl.
    pub root_uri: String,
    /// Directory holding `resources/`, `collections/`, and `index.json`.
    pub cache_root: PathBuf,
    /// Number of tasks per sequential chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Concurrent workers within a chunk.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Thumbnail enrichment options.
    #[serde(default)]
    pub thumbnails: ThumbnailOptions,
    /// Deadline for network-backed thumbnail resolution, in milliseconds.
    #[serde(default = "default_thumbnail_timeout_ms")]
    pub thumbnail_timeout_ms: u64,
    /// Skip traversal and serve everything from the existing cache.
    #[serde(default)]
    pub skip_crawl: bool,
}

const fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

const fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

const fn default_thumbnail_timeout_ms() -> u64 {
    DEFAULT_THUMBNAIL_TIMEOUT.as_millis() as u64
}

impl CrawlConfig {
    /// Create a configuration with defaults for everything but the root and
    /// cache location.
    #[must_use]
    pub fn new(root_uri: impl Into<String>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            root_uri: root_uri.into(),
            cache_root: cache_root.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            thumbnails: ThumbnailOptions::default(),
            thumbnail_timeout_ms: default_thumbnail_timeout_ms(),
            skip_crawl: false,
        }
    }

    /// Create a configuration rooted at the platform default cache directory.
    pub fn with_default_cache_root(root_uri: impl Into<String>) -> Result<Self> {
        Ok(Self::new(root_uri, default_cache_root()?))
    }

    /// Deadline for network-backed thumbnail resolution.
    #[must_use]
    pub const fn thumbnail_timeout(&self) -> Duration {
        Duration::from_millis(self.thumbnail_timeout_ms)
    }

    /// Chunk size clamped to at least one task.
    #[must_use]
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }

    /// Concurrency clamped to a sane range.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }

    /// Apply `VITRINE_*` environment overrides on top of this configuration.
    ///
    /// Unparseable values are logged and ignored rather than failing the
    /// build.
    #[must_use]
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(uri) = env_string("VITRINE_COLLECTION") {
            self.root_uri = uri;
        }
        if let Some(value) = env_parsed::<usize>("VITRINE_CHUNK_SIZE") {
            self.chunk_size = value;
        }
        if let Some(value) = env_parsed::<usize>("VITRINE_CONCURRENCY") {
            self.concurrency = value;
        }
        if let Some(value) = env_parsed::<u64>("VITRINE_THUMBNAIL_TIMEOUT_MS") {
            self.thumbnail_timeout_ms = value;
        }
        if let Some(flag) = env_string("VITRINE_SKIP_CRAWL") {
            self.skip_crawl = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        self
    }

    /// Reject configurations that cannot produce a crawl.
    pub fn validate(&self) -> Result<()> {
        if self.root_uri.trim().is_empty() {
            return Err(Error::Config("root_uri must not be empty".to_string()));
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {name}={raw}");
            None
        },
    }
}

/// Platform default cache root: `~/.vitrine/cache`.
fn default_cache_root() -> Result<PathBuf> {
    let base = directories::BaseDirs::new()
        .ok_or_else(|| Error::Config("Failed to determine home directory".to_string()))?;
    Ok(base.home_dir().join(".vitrine").join("cache"))
}
