//! Crawl orchestration.
//!
//! [`CrawlSession`] owns every piece of build-scoped mutable state (the slug
//! reservations and the visited set) alongside the repository, fetcher, and
//! the two external boundaries (renderer, thumbnail resolver). State is reset
//! at the start of each crawl and never shared across builds; the on-disk
//! cache and index are the only state that outlives a session.

use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, info};

use crate::config::CrawlConfig;
use crate::fetcher::Fetcher;
use crate::iiif::ResourceDoc;
use crate::normalize::normalize_id;
use crate::pool::{FetchPool, LogSink, Renderer};
use crate::repository::CacheRepository;
use crate::slug::{SlugAllocator, slugify};
use crate::thumbnail::ThumbnailResolver;
use crate::traverse::Traverser;
use crate::types::{FetchTask, ManifestIndex, ResourceKind, RootSignature, WorkRecord};
use crate::Result;

/// Index format version written by this crate.
const INDEX_VERSION: &str = "2";

/// Result of one crawl.
#[derive(Debug)]
pub struct CrawlOutcome {
    /// One record per successfully rendered leaf resource.
    pub records: Vec<WorkRecord>,
    /// Number of leaf tasks the traversal produced.
    pub task_count: usize,
    /// Whether a root-signature change flushed the cache before this crawl.
    pub invalidated: bool,
}

/// One crawl invocation and all the state it owns.
pub struct CrawlSession {
    config: CrawlConfig,
    repo: CacheRepository,
    fetcher: Fetcher,
    allocator: Mutex<SlugAllocator>,
    renderer: Box<dyn Renderer>,
    thumbnails: Option<Box<dyn ThumbnailResolver>>,
    log_sink: Option<LogSink>,
}

impl CrawlSession {
    /// Create a session for the given configuration and renderer.
    pub fn new(config: CrawlConfig, renderer: Box<dyn Renderer>) -> Result<Self> {
        config.validate()?;
        let repo = CacheRepository::new(&config.cache_root);
        let fetcher = Fetcher::new()?;
        Ok(Self {
            config,
            repo,
            fetcher,
            allocator: Mutex::new(SlugAllocator::new()),
            renderer,
            thumbnails: None,
            log_sink: None,
        })
    }

    /// Attach a thumbnail resolver.
    #[must_use]
    pub fn with_thumbnail_resolver(mut self, resolver: Box<dyn ThumbnailResolver>) -> Self {
        self.thumbnails = Some(resolver);
        self
    }

    /// Replace the progress-line sink used by the worker pool.
    #[must_use]
    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// The repository backing this session's cache.
    #[must_use]
    pub fn repository(&self) -> &CacheRepository {
        &self.repo
    }

    /// Crawl the configured root and return the rendered records.
    ///
    /// Loads the index once (healing from legacy locations), invalidates the
    /// whole cache when the root signature changed, walks the tree, and runs
    /// the worker pool over the discovered leaf tasks.
    pub async fn crawl(&mut self) -> Result<CrawlOutcome> {
        // Build-scoped state never survives into the next crawl
        self.allocator = Mutex::new(SlugAllocator::new());

        if self.config.skip_crawl {
            info!("Skip-crawl set; serving tasks from the existing index");
            let tasks = self.tasks_from_index();
            let records = self.run_pool(&tasks).await;
            return Ok(CrawlOutcome {
                task_count: tasks.len(),
                records,
                invalidated: false,
            });
        }

        let root_id = normalize_id(&self.config.root_uri);

        // The root is always fetched live so the signature reflects the
        // current document, never a cached copy.
        let fetched = self.fetcher.resolve(&self.config.root_uri).await?;
        let root_doc = ResourceDoc::from_value(fetched.value)?;

        let mut index = self.repo.load_index();
        let invalidated = match &index.collection {
            Some(signature) => signature.uri != root_id || signature.hash != fetched.hash,
            None => false,
        };
        if invalidated {
            info!("Root signature changed for '{root_id}'; flushing cache");
            self.repo.flush()?;
            index = ManifestIndex::default();
        }

        index.collection = Some(RootSignature {
            uri: root_id.clone(),
            hash: fetched.hash,
            updated_at: Utc::now(),
        });
        if index.version.is_none() {
            index.version = Some(INDEX_VERSION.to_string());
        }
        self.repo.save_index(&index)?;

        // The root owns its canonical base name; any squatter is re-suffixed.
        let base = slugify(root_doc.title(), ResourceKind::Collection.default_slug_base());
        {
            let mut allocator = self.allocator.lock().expect("lock poisoned");
            self.repo
                .claim_base_slug(&mut allocator, &base, &root_id, ResourceKind::Collection)?;
            self.repo.upsert(&mut allocator, &root_doc, &root_id, "")?;
        }

        let mut traverser = Traverser::new();
        let tasks = traverser
            .collect(root_doc, &self.repo, &self.fetcher, &self.allocator)
            .await?;
        debug!(
            "Traversal visited {} collections, queued {} tasks",
            traverser.visited_count(),
            tasks.len()
        );

        let records = self.run_pool(&tasks).await;
        Ok(CrawlOutcome {
            task_count: tasks.len(),
            records,
            invalidated,
        })
    }

    /// Rebuild the task list from the persisted index, without traversal.
    fn tasks_from_index(&self) -> Vec<FetchTask> {
        self.repo
            .load_index()
            .by_id
            .into_iter()
            .filter(|entry| entry.kind == ResourceKind::Manifest)
            .map(|entry| FetchTask {
                id: entry.id,
                parent: entry.parent,
            })
            .collect()
    }

    async fn run_pool(&self, tasks: &[FetchTask]) -> Vec<WorkRecord> {
        let mut pool = FetchPool::new(
            &self.repo,
            &self.fetcher,
            &self.allocator,
            self.renderer.as_ref(),
        )
        .with_chunking(
            self.config.effective_chunk_size(),
            self.config.effective_concurrency(),
        )
        .with_thumbnails(
            self.thumbnails.as_deref(),
            self.config.thumbnails.clone(),
            self.config.thumbnail_timeout(),
        );
        if let Some(sink) = &self.log_sink {
            pool = pool.with_log_sink(sink.clone());
        }
        pool.run(tasks).await
    }
}
