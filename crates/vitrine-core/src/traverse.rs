//! Depth-first traversal of a remote collection tree.
//!
//! The walk uses an explicit stack of pending collections instead of call
//! recursion, so arbitrarily deep nesting cannot overflow and the visited set
//! stays independently testable. Sub-collections are resolved cache-first and
//! persisted even when they contribute zero leaf tasks; leaf manifests become
//! [`FetchTask`]s for the worker pool.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::fetcher::Fetcher;
use crate::iiif::ResourceDoc;
use crate::normalize::normalize_id;
use crate::repository::CacheRepository;
use crate::slug::SlugAllocator;
use crate::types::{FetchTask, ResourceKind};
use crate::Result;

/// Stack-based collection walker with cycle protection.
#[derive(Debug, Default)]
pub struct Traverser {
    visited: HashSet<String>,
}

impl Traverser {
    /// Create a traverser with an empty visited set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a normalized collection identifier has been visited.
    #[must_use]
    pub fn is_visited(&self, id: &str) -> bool {
        self.visited.contains(id)
    }

    /// Number of distinct collections visited.
    #[must_use]
    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Walk the tree below `root` and return the flat task list.
    ///
    /// `root` must already be persisted by the caller. Sub-collection fetch or
    /// parse failures are logged and skip that subtree; they never abort the
    /// walk.
    pub async fn collect(
        &mut self,
        root: ResourceDoc,
        repo: &CacheRepository,
        fetcher: &Fetcher,
        allocator: &Mutex<SlugAllocator>,
    ) -> Result<Vec<FetchTask>> {
        let mut tasks = Vec::new();
        let mut stack = Vec::new();

        self.visited.insert(normalize_id(&root.id));
        stack.push(root);

        while let Some(doc) = stack.pop() {
            let parent_id = normalize_id(&doc.id);
            debug!("Walking collection '{parent_id}'");

            // Collect sub-collections first so they can be pushed in reverse,
            // keeping the walk depth-first in declaration order.
            let mut pending = Vec::new();

            for child in &doc.children {
                match child.kind {
                    ResourceKind::Manifest => tasks.push(FetchTask {
                        id: child.id.clone(),
                        parent: parent_id.clone(),
                    }),
                    ResourceKind::Collection => {
                        let child_id = normalize_id(&child.id);
                        if !self.visited.insert(child_id) {
                            continue;
                        }
                        match resolve_collection(&child.id, &parent_id, repo, fetcher, allocator)
                            .await
                        {
                            Ok(sub) => pending.push(sub),
                            Err(e) => {
                                warn!("Skipping sub-collection '{}': {e}", child.id);
                            },
                        }
                    },
                }
            }

            while let Some(sub) = pending.pop() {
                stack.push(sub);
            }
        }

        Ok(tasks)
    }
}

/// Resolve a sub-collection cache-first and persist it.
async fn resolve_collection(
    identifier: &str,
    parent: &str,
    repo: &CacheRepository,
    fetcher: &Fetcher,
    allocator: &Mutex<SlugAllocator>,
) -> Result<ResourceDoc> {
    let value = match repo.resolve(identifier, ResourceKind::Collection)? {
        Some(cached) => cached.value,
        None => fetcher.resolve(identifier).await?.value,
    };
    let doc = ResourceDoc::from_value(value)?;

    {
        let mut allocator = allocator.lock().expect("lock poisoned");
        repo.upsert(&mut allocator, &doc, identifier, parent)?;
    }
    Ok(doc)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn collection(id: &str, children: serde_json::Value) -> ResourceDoc {
        ResourceDoc::from_value(json!({
            "id": id,
            "type": "Collection",
            "label": { "en": ["Works"] },
            "items": children
        }))
        .unwrap()
    }

    fn seed_collection(repo: &CacheRepository, doc: &ResourceDoc, parent: &str) {
        let mut allocator = SlugAllocator::new();
        repo.upsert(&mut allocator, doc, &doc.id, parent).unwrap();
    }

    #[tokio::test]
    async fn test_collects_leaf_tasks_with_parents() {
        let temp = TempDir::new().unwrap();
        let repo = CacheRepository::new(temp.path());
        let fetcher = Fetcher::new().unwrap();
        let allocator = Mutex::new(SlugAllocator::new());

        let sub = collection(
            "https://a.org/sub",
            json!([
                { "id": "https://a.org/m2", "type": "Manifest" },
                { "id": "https://a.org/m3", "type": "Manifest" }
            ]),
        );
        seed_collection(&repo, &sub, "https://a.org/root");

        let root = collection(
            "https://a.org/root",
            json!([
                { "id": "https://a.org/m1", "type": "Manifest" },
                { "id": "https://a.org/sub", "type": "Collection" }
            ]),
        );

        let mut traverser = Traverser::new();
        let tasks = traverser
            .collect(root, &repo, &fetcher, &allocator)
            .await
            .unwrap();

        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].id, "https://a.org/m1");
        assert_eq!(tasks[0].parent, "https://a.org/root");
        assert_eq!(tasks[1].parent, "https://a.org/sub");
        assert_eq!(tasks[2].parent, "https://a.org/sub");
    }

    #[tokio::test]
    async fn test_cycle_is_visited_once() {
        let temp = TempDir::new().unwrap();
        let repo = CacheRepository::new(temp.path());
        let fetcher = Fetcher::new().unwrap();
        let allocator = Mutex::new(SlugAllocator::new());

        // A -> B -> A, plus B referencing itself
        let b = collection(
            "https://a.org/b",
            json!([
                { "id": "https://a.org/a", "type": "Collection" },
                { "id": "https://a.org/b", "type": "Collection" },
                { "id": "https://a.org/m1", "type": "Manifest" }
            ]),
        );
        seed_collection(&repo, &b, "https://a.org/a");

        let a = collection(
            "https://a.org/a",
            json!([{ "id": "https://a.org/b", "type": "Collection" }]),
        );

        let mut traverser = Traverser::new();
        let tasks = traverser
            .collect(a, &repo, &fetcher, &allocator)
            .await
            .unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(traverser.visited_count(), 2);
        assert!(traverser.is_visited("https://a.org/a"));
        assert!(traverser.is_visited("https://a.org/b"));
    }

    #[tokio::test]
    async fn test_leafless_subcollection_is_persisted() {
        let temp = TempDir::new().unwrap();
        let repo = CacheRepository::new(temp.path());
        let fetcher = Fetcher::new().unwrap();
        let allocator = Mutex::new(SlugAllocator::new());

        let empty = collection("https://a.org/empty", json!([]));
        seed_collection(&repo, &empty, "https://a.org/root");

        let root = collection(
            "https://a.org/root",
            json!([{ "id": "https://a.org/empty", "type": "Collection" }]),
        );

        let mut traverser = Traverser::new();
        let tasks = traverser
            .collect(root, &repo, &fetcher, &allocator)
            .await
            .unwrap();

        assert!(tasks.is_empty());
        // The empty sub-collection is still indexed and cached
        assert!(repo
            .resolve("https://a.org/empty", ResourceKind::Collection)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_uncached_subcollection_is_fetched() {
        let server = MockServer::start().await;
        let sub_id = format!("{}/iiif/sub.json", server.uri());
        Mock::given(method("GET"))
            .and(path("/iiif/sub.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                serde_json::to_string(&json!({
                    "id": sub_id,
                    "type": "Collection",
                    "label": { "en": ["Remote"] },
                    "items": [{ "id": "https://a.org/m9", "type": "Manifest" }]
                }))
                .unwrap(),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let repo = CacheRepository::new(temp.path());
        let fetcher = Fetcher::new().unwrap();
        let allocator = Mutex::new(SlugAllocator::new());

        let root = collection(
            "https://a.org/root",
            json!([{ "id": sub_id, "type": "Collection" }]),
        );

        let mut traverser = Traverser::new();
        let tasks = traverser
            .collect(root, &repo, &fetcher, &allocator)
            .await
            .unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "https://a.org/m9");
        assert!(repo
            .resolve(&sub_id, ResourceKind::Collection)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_broken_subcollection_skips_subtree() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/iiif/broken.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let repo = CacheRepository::new(temp.path());
        let fetcher = Fetcher::new().unwrap();
        let allocator = Mutex::new(SlugAllocator::new());

        let broken_id = format!("{}/iiif/broken.json", server.uri());
        let root = collection(
            "https://a.org/root",
            json!([
                { "id": broken_id, "type": "Collection" },
                { "id": "https://a.org/m1", "type": "Manifest" }
            ]),
        );

        let mut traverser = Traverser::new();
        let tasks = traverser
            .collect(root, &repo, &fetcher, &allocator)
            .await
            .unwrap();

        // The broken subtree is skipped; the sibling leaf survives
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "https://a.org/m1");
    }
}
