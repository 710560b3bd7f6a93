//! Local filesystem cache for fetched IIIF resources.
//!
//! The repository owns two subdirectories (`resources/` for manifests,
//! `collections/` for collections) and the `index.json` mapping normalized
//! identifiers to slugs. Cache files are addressed only by slug; raw
//! identifiers never appear as filenames.
//!
//! The index is re-read from disk around every operation and persisted after
//! every meaningful mutation, so an interrupted crawl leaves a resumable,
//! consistent cache. Two workers resolving slugs for the same newly-discovered
//! identifier within one chunk can both read before either writes; the last
//! write wins. That narrow race is accepted, documented behavior.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::iiif::{ResourceDoc, embedded_id};
use crate::normalize::normalize_id;
use crate::slug::{SlugAllocator, slugify};
use crate::thumbnail::Thumbnail;
use crate::types::{IndexEntry, ManifestIndex, ResourceKind};
use crate::{Error, Result};

/// Canonical index filename at the cache root.
pub const INDEX_FILE: &str = "index.json";

/// Legacy index locations still read (and deleted on save) for backward
/// compatibility with earlier cache layouts.
const LEGACY_INDEX_FILES: [&str; 2] = ["manifest-index.json", "resources/index.json"];

/// A raw cached document and the slug it is stored under.
#[derive(Debug, Clone)]
pub struct CachedResource {
    /// Slug the document is keyed by on disk.
    pub slug: String,
    /// The raw document as originally fetched.
    pub value: Value,
}

/// Persistent cache of fetched resources plus the manifest index.
pub struct CacheRepository {
    root: PathBuf,
}

impl CacheRepository {
    /// Create a repository rooted at `root`. Directories are created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kind_dir(&self, kind: ResourceKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn legacy_index_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        LEGACY_INDEX_FILES.iter().map(|rel| self.root.join(rel))
    }

    /// On-disk path for a document of `kind` stored under `slug`.
    #[must_use]
    pub fn resource_path(&self, kind: ResourceKind, slug: &str) -> PathBuf {
        self.kind_dir(kind).join(format!("{slug}.json"))
    }

    /// Ensure both cache subdirectories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for kind in [ResourceKind::Manifest, ResourceKind::Collection] {
            fs::create_dir_all(self.kind_dir(kind))
                .map_err(|e| Error::Storage(format!("Failed to create cache directory: {e}")))?;
        }
        Ok(())
    }

    /// Load the manifest index, healing from legacy storage locations.
    ///
    /// A missing or unreadable index degrades to an empty one: a cold cache
    /// is a valid start state, never an error.
    #[must_use]
    pub fn load_index(&self) -> ManifestIndex {
        let canonical = self.index_path();
        for path in std::iter::once(canonical).chain(self.legacy_index_paths()) {
            if !path.exists() {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(json) => match serde_json::from_str::<ManifestIndex>(&json) {
                    Ok(index) => {
                        debug!("Loaded index from {}", path.display());
                        return index;
                    },
                    Err(e) => warn!("Unreadable index at {}: {e}", path.display()),
                },
                Err(e) => warn!("Failed to read index at {}: {e}", path.display()),
            }
        }
        ManifestIndex::default()
    }

    /// Persist the index to the canonical location and delete legacy files.
    pub fn save_index(&self, index: &ManifestIndex) -> Result<()> {
        fs::create_dir_all(&self.root)
            .map_err(|e| Error::Storage(format!("Failed to create cache root: {e}")))?;

        let json = serde_json::to_value(index)?;
        write_json_atomic(&self.index_path(), &json)?;

        for legacy in self.legacy_index_paths() {
            if legacy.exists() {
                fs::remove_file(&legacy).map_err(|e| {
                    Error::Storage(format!(
                        "Failed to remove legacy index {}: {e}",
                        legacy.display()
                    ))
                })?;
                debug!("Removed legacy index {}", legacy.display());
            }
        }
        Ok(())
    }

    /// Delete and recreate both cache subdirectories.
    ///
    /// Invoked only when the root collection's signature changed between
    /// runs; prevents cross-contamination between unrelated trees.
    pub fn flush(&self) -> Result<()> {
        for kind in [ResourceKind::Manifest, ResourceKind::Collection] {
            let dir = self.kind_dir(kind);
            if dir.exists() {
                fs::remove_dir_all(&dir).map_err(|e| {
                    Error::Storage(format!("Failed to clear {}: {e}", dir.display()))
                })?;
            }
            fs::create_dir_all(&dir)
                .map_err(|e| Error::Storage(format!("Failed to recreate {}: {e}", dir.display())))?;
        }
        info!("Flushed cache at {}", self.root.display());
        Ok(())
    }

    /// Look up a cached document by identifier, healing the index if needed.
    ///
    /// On an index miss (or a stale entry whose file is gone) the kind's cache
    /// directory is scanned linearly, comparing each file's embedded
    /// identifier; a successful heal repairs the index entry for future calls.
    pub fn resolve(&self, identifier: &str, kind: ResourceKind) -> Result<Option<CachedResource>> {
        let id = normalize_id(identifier);
        let index = self.load_index();

        if let Some(entry) = index.entry(&id, kind) {
            let path = self.resource_path(kind, &entry.slug);
            match read_json(&path) {
                Ok(value) => {
                    return Ok(Some(CachedResource {
                        slug: entry.slug.clone(),
                        value,
                    }));
                },
                Err(e) => {
                    warn!("Index points at unreadable {}: {e}", path.display());
                },
            }
        }

        self.heal_from_scan(&id, kind)
    }

    /// Cache a document and insert or replace its index entry.
    ///
    /// Computes the slug through the allocator, writes the raw document under
    /// `<dir>/<slug>.json`, and persists the updated index.
    pub fn upsert(
        &self,
        allocator: &mut SlugAllocator,
        doc: &ResourceDoc,
        identifier: &str,
        parent: &str,
    ) -> Result<IndexEntry> {
        let id = normalize_id(identifier);
        let parent = if parent.is_empty() {
            String::new()
        } else {
            normalize_id(parent)
        };

        let mut index = self.load_index();
        let base = slugify(doc.title(), doc.kind.default_slug_base());
        let slug = allocator.resolve(&index, &base, &id, doc.kind);

        self.ensure_dirs()?;
        write_json_atomic(&self.resource_path(doc.kind, &slug), &doc.raw)?;

        let mut entry = IndexEntry::new(id.clone(), doc.kind, slug, parent);
        if let Some(existing) = index.entry(&id, doc.kind) {
            entry.thumbnail = existing.thumbnail.clone();
            entry.thumbnail_width = existing.thumbnail_width;
            entry.thumbnail_height = existing.thumbnail_height;
        }
        index.upsert_entry(entry.clone());
        self.save_index(&index)?;

        debug!("Cached {} '{}' as {}", doc.kind, id, entry.slug);
        Ok(entry)
    }

    /// Record a resolved thumbnail on an indexed entry.
    ///
    /// Unknown identifiers are logged and skipped; enrichment never fails a
    /// task.
    pub fn annotate_thumbnail(
        &self,
        identifier: &str,
        kind: ResourceKind,
        thumbnail: &Thumbnail,
    ) -> Result<()> {
        let id = normalize_id(identifier);
        let mut index = self.load_index();

        let Some(entry) = index
            .by_id
            .iter_mut()
            .find(|e| e.kind == kind && e.id == id)
        else {
            warn!("No index entry to annotate for '{id}'");
            return Ok(());
        };

        entry.thumbnail = Some(thumbnail.url.clone());
        entry.thumbnail_width = thumbnail.width;
        entry.thumbnail_height = thumbnail.height;
        self.save_index(&index)
    }

    /// Let `identifier` take the unsuffixed `base` slug, re-suffixing any
    /// current occupant and moving its cache file along.
    pub fn claim_base_slug(
        &self,
        allocator: &mut SlugAllocator,
        base: &str,
        identifier: &str,
        kind: ResourceKind,
    ) -> Result<()> {
        let mut index = self.load_index();
        let Some((occupant_id, new_slug)) = allocator.claim_base(&mut index, base, identifier, kind)
        else {
            return Ok(());
        };

        let old_path = self.resource_path(kind, base);
        if old_path.exists() {
            let new_path = self.resource_path(kind, &new_slug);
            fs::rename(&old_path, &new_path).map_err(|e| {
                Error::Storage(format!("Failed to move displaced cache file: {e}"))
            })?;
        }
        info!("Reassigned '{occupant_id}' from slug '{base}' to '{new_slug}'");
        self.save_index(&index)
    }

    /// Linear scan of a kind's directory looking for an embedded identifier.
    fn heal_from_scan(&self, id: &str, kind: ResourceKind) -> Result<Option<CachedResource>> {
        let dir = self.kind_dir(kind);
        if !dir.exists() {
            return Ok(None);
        }

        let entries = fs::read_dir(&dir)
            .map_err(|e| Error::Storage(format!("Failed to scan {}: {e}", dir.display())))?;

        for entry in entries {
            let entry =
                entry.map_err(|e| Error::Storage(format!("Failed to read cache entry: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            let Ok(value) = read_json(&path) else {
                continue;
            };
            let matches = embedded_id(&value).is_some_and(|raw| normalize_id(raw) == id);
            if !matches {
                continue;
            }

            let Some(slug) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };

            // Repair the index so the next lookup goes straight through it.
            let mut index = self.load_index();
            let parent = index
                .entry(id, kind)
                .map_or_else(String::new, |e| e.parent.clone());
            index.upsert_entry(IndexEntry::new(id.to_string(), kind, slug.clone(), parent));
            self.save_index(&index)?;
            info!("Healed index entry for '{id}' from {}", path.display());

            return Ok(Some(CachedResource { slug, value }));
        }

        Ok(None)
    }
}

/// Atomic JSON write: temp file then rename.
fn write_json_atomic(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Storage(format!("Failed to create {}: {e}", parent.display())))?;
    }

    let json = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)
        .map_err(|e| Error::Storage(format!("Failed to write {}: {e}", tmp_path.display())))?;

    #[cfg(target_os = "windows")]
    if path.exists() {
        fs::remove_file(path)
            .map_err(|e| Error::Storage(format!("Failed to remove existing file: {e}")))?;
    }

    fs::rename(&tmp_path, path)
        .map_err(|e| Error::Storage(format!("Failed to commit {}: {e}", path.display())))?;
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let json = fs::read_to_string(path)
        .map_err(|e| Error::Storage(format!("Failed to read {}: {e}", path.display())))?;
    Ok(serde_json::from_str(&json)?)
}
