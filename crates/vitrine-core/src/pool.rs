//! Bounded-concurrency worker pool over the crawl's task list.
//!
//! Tasks are partitioned into sequential chunks; within a chunk, workers pull
//! from a shared cursor until it is exhausted. Fetches complete in any order,
//! but the human-readable progress stream is resequenced: each worker deposits
//! its lines into a slot matching the task's original position, and a flush
//! pointer emits slots strictly in order as they become available.
//!
//! Every per-task failure is caught at the task boundary, logged, and turned
//! into a skip. No error crosses the pool boundary, and nothing is retried.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::ThumbnailOptions;
use crate::fetcher::Fetcher;
use crate::iiif::ResourceDoc;
use crate::repository::CacheRepository;
use crate::slug::SlugAllocator;
use crate::thumbnail::{ThumbnailResolver, resolve_with_deadline};
use crate::types::{FetchTask, ResourceKind, WorkRecord};
use crate::{Error, Result};

/// Context handed to the renderer along with the resource.
#[derive(Debug, Clone)]
pub struct RenderContext {
    /// Slug the resource was cached under.
    pub slug: String,
    /// Normalized identifier of the containing collection.
    pub parent: String,
}

/// External page renderer, invoked once per successfully fetched leaf.
///
/// Failures are caught per task by the pool, never by the implementation.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render one resource and summarize it for downstream consumers.
    async fn render(&self, doc: &ResourceDoc, ctx: &RenderContext) -> Result<WorkRecord>;
}

/// Sink receiving the resequenced progress lines.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Resequencing buffer for progress lines produced out of order.
///
/// One slot per task in the chunk; [`OrderedLog::drain_ready`] advances the
/// next-to-print pointer across every contiguous deposited slot.
#[derive(Debug)]
pub struct OrderedLog {
    slots: Vec<Option<Vec<String>>>,
    next: usize,
}

impl OrderedLog {
    /// Create a buffer with one empty slot per task.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
            next: 0,
        }
    }

    /// Deposit the lines for the task at `pos` (its original position).
    pub fn deposit(&mut self, pos: usize, lines: Vec<String>) {
        if let Some(slot) = self.slots.get_mut(pos) {
            *slot = Some(lines);
        }
    }

    /// Emit every line that is ready to print, in original task order.
    pub fn drain_ready(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while self.next < self.slots.len() {
            match self.slots[self.next].take() {
                Some(lines) => {
                    out.extend(lines);
                    self.next += 1;
                },
                None => break,
            }
        }
        out
    }

    /// Whether every slot has been emitted.
    #[must_use]
    pub fn fully_drained(&self) -> bool {
        self.next == self.slots.len()
    }
}

/// Chunked fetch pool driving leaf tasks through cache, render, and index.
pub struct FetchPool<'a> {
    repo: &'a CacheRepository,
    fetcher: &'a Fetcher,
    allocator: &'a Mutex<SlugAllocator>,
    renderer: &'a dyn Renderer,
    thumbnails: Option<&'a dyn ThumbnailResolver>,
    thumbnail_options: ThumbnailOptions,
    thumbnail_timeout: Duration,
    chunk_size: usize,
    concurrency: usize,
    sink: LogSink,
}

impl<'a> FetchPool<'a> {
    /// Create a pool with default chunking and a `tracing` log sink.
    #[must_use]
    pub fn new(
        repo: &'a CacheRepository,
        fetcher: &'a Fetcher,
        allocator: &'a Mutex<SlugAllocator>,
        renderer: &'a dyn Renderer,
    ) -> Self {
        Self {
            repo,
            fetcher,
            allocator,
            renderer,
            thumbnails: None,
            thumbnail_options: ThumbnailOptions::default(),
            thumbnail_timeout: crate::config::DEFAULT_THUMBNAIL_TIMEOUT,
            chunk_size: crate::config::DEFAULT_CHUNK_SIZE,
            concurrency: crate::config::DEFAULT_CONCURRENCY,
            sink: Arc::new(|line| info!("{line}")),
        }
    }

    /// Set chunk size and per-chunk worker count.
    #[must_use]
    pub fn with_chunking(mut self, chunk_size: usize, concurrency: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.concurrency = concurrency.max(1);
        self
    }

    /// Attach a thumbnail resolver and its options.
    #[must_use]
    pub fn with_thumbnails(
        mut self,
        resolver: Option<&'a dyn ThumbnailResolver>,
        options: ThumbnailOptions,
        timeout: Duration,
    ) -> Self {
        self.thumbnails = resolver;
        self.thumbnail_options = options;
        self.thumbnail_timeout = timeout;
        self
    }

    /// Replace the progress-line sink.
    #[must_use]
    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.sink = sink;
        self
    }

    /// Process every task, returning the records of the successful ones.
    ///
    /// Output records accumulate in completion order; only the log stream is
    /// resequenced.
    pub async fn run(&self, tasks: &[FetchTask]) -> Vec<WorkRecord> {
        let total = tasks.len();
        let mut records = Vec::new();

        for (chunk_no, chunk) in tasks.chunks(self.chunk_size).enumerate() {
            let offset = chunk_no * self.chunk_size;
            let cursor = AtomicUsize::new(0);
            let log = Mutex::new(OrderedLog::new(chunk.len()));
            let collected: Mutex<Vec<WorkRecord>> = Mutex::new(Vec::new());

            let workers = self.concurrency.min(chunk.len());
            let worker_futures = (0..workers).map(|_| {
                let cursor = &cursor;
                let log = &log;
                let collected = &collected;
                async move {
                    loop {
                        let pos = cursor.fetch_add(1, Ordering::SeqCst);
                        if pos >= chunk.len() {
                            break;
                        }
                        let task = &chunk[pos];
                        let (lines, record) =
                            self.process_task(task, offset + pos + 1, total).await;

                        if let Some(record) = record {
                            collected.lock().expect("lock poisoned").push(record);
                        }

                        let ready = {
                            let mut log = log.lock().expect("lock poisoned");
                            log.deposit(pos, lines);
                            log.drain_ready()
                        };
                        for line in ready {
                            (self.sink)(&line);
                        }
                    }
                }
            });
            futures::future::join_all(worker_futures).await;

            records.extend(collected.into_inner().expect("lock poisoned"));
        }

        records
    }

    /// Run one task, converting any failure into a logged skip.
    async fn process_task(
        &self,
        task: &FetchTask,
        ordinal: usize,
        total: usize,
    ) -> (Vec<String>, Option<WorkRecord>) {
        let mut lines = Vec::new();
        match self.run_task(task, ordinal, total, &mut lines).await {
            Ok(record) => (lines, Some(record)),
            Err(e) => {
                warn!("Task failed for '{}': {e}", task.id);
                lines.push(format!("[{ordinal}/{total}] Skipped {}: {e}", task.id));
                (lines, None)
            },
        }
    }

    async fn run_task(
        &self,
        task: &FetchTask,
        ordinal: usize,
        total: usize,
        lines: &mut Vec<String>,
    ) -> Result<WorkRecord> {
        let (value, from_cache) = match self.repo.resolve(&task.id, ResourceKind::Manifest)? {
            Some(cached) => (cached.value, true),
            None => (self.fetcher.resolve(&task.id).await?.value, false),
        };
        let doc = ResourceDoc::from_value(value)?;

        let entry = {
            let mut allocator = self.allocator.lock().expect("lock poisoned");
            self.repo
                .upsert(&mut allocator, &doc, &task.id, &task.parent)?
        };

        let verb = if from_cache { "Cached" } else { "Fetched" };
        lines.push(format!(
            "[{ordinal}/{total}] {verb} {} \u{2192} {}",
            doc.title(),
            entry.slug
        ));

        let thumbnail = match self.thumbnails {
            Some(resolver) => {
                let thumbnail = resolve_with_deadline(
                    resolver,
                    &doc,
                    &self.thumbnail_options,
                    self.thumbnail_timeout,
                )
                .await;
                if let Some(ref thumbnail) = thumbnail {
                    self.repo
                        .annotate_thumbnail(&task.id, ResourceKind::Manifest, thumbnail)?;
                }
                thumbnail
            },
            None => None,
        };

        let ctx = RenderContext {
            slug: entry.slug,
            parent: task.parent.clone(),
        };
        let mut record = self
            .renderer
            .render(&doc, &ctx)
            .await
            .map_err(|e| Error::Render(e.to_string()))?;

        if let Some(thumbnail) = thumbnail {
            record.thumbnail.get_or_insert(thumbnail.url);
            record.thumbnail_width = record.thumbnail_width.or(thumbnail.width);
            record.thumbnail_height = record.thumbnail_height.or(thumbnail.height);
        }

        Ok(record)
    }
}
