//! Slug derivation and crawl-scoped allocation.
//!
//! Slugs are the only filenames the cache uses; raw identifiers can be
//! arbitrarily long URLs and never touch the filesystem. Allocation must stay
//! stable across runs (re-resolving a known resource returns its existing
//! slug) while distinct resources sharing a title receive increasing numeric
//! suffixes.

use std::collections::HashMap;

use crate::normalize::normalize_id;
use crate::types::{ManifestIndex, ResourceKind};

/// Maximum slug length in bytes, before any numeric suffix.
pub const MAX_SLUG_LEN: usize = 64;

/// Derive a filesystem- and URL-safe base name from a display title.
///
/// Lowercases, maps anything outside `[a-z0-9]` to `-`, collapses runs, and
/// trims to [`MAX_SLUG_LEN`]. Falls back to `fallback` when nothing survives.
#[must_use]
pub fn slugify(input: &str, fallback: &str) -> String {
    let mut slug = String::with_capacity(input.len().min(MAX_SLUG_LEN));
    let mut pending_dash = false;

    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }

    slug.truncate(MAX_SLUG_LEN);
    while slug.ends_with('-') {
        slug.pop();
    }

    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}

/// Crawl-scoped slug allocator.
///
/// Reservations live for one crawl and are reset with the session; the
/// persisted index provides cross-run stability. Ties between distinct
/// identifiers wanting the same base are broken by discovery order.
#[derive(Debug, Default)]
pub struct SlugAllocator {
    /// `(kind, slug)` to the normalized identifier holding it this run.
    reserved: HashMap<(ResourceKind, String), String>,
}

impl SlugAllocator {
    /// Create an empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a unique slug for `(identifier, kind)` starting from `base`.
    ///
    /// Reuses the candidate when the index or this run's reservations already
    /// bind it to the same identifier; otherwise takes the first free
    /// candidate in `base`, `base-1`, `base-2`, ...
    pub fn resolve(
        &mut self,
        index: &ManifestIndex,
        base: &str,
        identifier: &str,
        kind: ResourceKind,
    ) -> String {
        let id = normalize_id(identifier);

        let mut suffix = 0usize;
        loop {
            let candidate = if suffix == 0 {
                base.to_string()
            } else {
                format!("{base}-{suffix}")
            };

            match self.occupant(index, &candidate, kind) {
                Some(holder) if holder == id => {
                    // Idempotent re-resolution: the slug is already ours.
                    self.reserve(kind, &candidate, &id);
                    return candidate;
                },
                Some(_) => suffix += 1,
                None => {
                    self.reserve(kind, &candidate, &id);
                    return candidate;
                },
            }
        }
    }

    /// Give `identifier` the unsuffixed `base`, re-suffixing any other
    /// occupant.
    ///
    /// The displaced occupant keeps an entry and receives the first free
    /// suffixed slug; this is a transfer, never a deletion. Returns the new
    /// slug of the displaced occupant, when one existed.
    pub fn claim_base(
        &mut self,
        index: &mut ManifestIndex,
        base: &str,
        identifier: &str,
        kind: ResourceKind,
    ) -> Option<(String, String)> {
        let id = normalize_id(identifier);

        let displaced = index
            .entry_by_slug(base, kind)
            .filter(|occupant| occupant.id != id)
            .map(|occupant| occupant.id.clone());

        let reassignment = displaced.map(|occupant_id| {
            let mut suffix = 1usize;
            let new_slug = loop {
                let candidate = format!("{base}-{suffix}");
                if self.occupant(index, &candidate, kind).is_none() {
                    break candidate;
                }
                suffix += 1;
            };
            self.reserve(kind, &new_slug, &occupant_id);
            if let Some(entry) = index
                .by_id
                .iter_mut()
                .find(|e| e.kind == kind && e.id == occupant_id)
            {
                entry.slug = new_slug.clone();
            }
            (occupant_id, new_slug)
        });

        self.reserve(kind, base, &id);
        reassignment
    }

    /// Number of slugs reserved so far this run.
    #[must_use]
    pub fn reserved_len(&self) -> usize {
        self.reserved.len()
    }

    /// Who holds a candidate slug: a reservation from this run, or the index.
    fn occupant(&self, index: &ManifestIndex, candidate: &str, kind: ResourceKind) -> Option<String> {
        if let Some(holder) = self.reserved.get(&(kind, candidate.to_string())) {
            return Some(holder.clone());
        }
        index
            .entry_by_slug(candidate, kind)
            .map(|entry| entry.id.clone())
    }

    fn reserve(&mut self, kind: ResourceKind, slug: &str, id: &str) {
        self.reserved
            .insert((kind, slug.to_string()), id.to_string());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::IndexEntry;

    fn index_with(entries: &[(&str, ResourceKind, &str)]) -> ManifestIndex {
        let mut index = ManifestIndex::default();
        for (id, kind, slug) in entries {
            index.upsert_entry(IndexEntry::new(
                (*id).to_string(),
                *kind,
                (*slug).to_string(),
                String::new(),
            ));
        }
        index
    }

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("The Blue Qur'an", "untitled"), "the-blue-qur-an");
        assert_eq!(slugify("  Folio   12 recto ", "untitled"), "folio-12-recto");
        assert_eq!(slugify("Çatalhöyük", "untitled"), "atalh-y-k");
    }

    #[test]
    fn test_slugify_falls_back_when_empty() {
        assert_eq!(slugify("", "untitled"), "untitled");
        assert_eq!(slugify("!!!", "collection"), "collection");
    }

    #[test]
    fn test_slugify_respects_length_limit() {
        let long = "x".repeat(200);
        let slug = slugify(&long, "untitled");
        assert_eq!(slug.len(), MAX_SLUG_LEN);

        // No trailing dash even when truncation lands on a separator
        let tricky = format!("{} y", "a".repeat(MAX_SLUG_LEN));
        assert!(!slugify(&tricky, "untitled").ends_with('-'));
    }

    #[test]
    fn test_resolve_is_stable_before_persistence() {
        let index = ManifestIndex::default();
        let mut allocator = SlugAllocator::new();

        let first = allocator.resolve(&index, "leaf", "https://a.org/1", ResourceKind::Manifest);
        let second = allocator.resolve(&index, "leaf", "https://a.org/1", ResourceKind::Manifest);

        assert_eq!(first, "leaf");
        assert_eq!(second, "leaf");
    }

    #[test]
    fn test_resolve_reuses_persisted_slug() {
        let index = index_with(&[("https://a.org/1", ResourceKind::Manifest, "leaf")]);
        let mut allocator = SlugAllocator::new();

        let slug = allocator.resolve(&index, "leaf", "https://a.org/1", ResourceKind::Manifest);
        assert_eq!(slug, "leaf");
    }

    #[test]
    fn test_resolve_suffixes_distinct_identifiers() {
        let index = ManifestIndex::default();
        let mut allocator = SlugAllocator::new();

        assert_eq!(
            allocator.resolve(&index, "leaf", "https://a.org/1", ResourceKind::Manifest),
            "leaf"
        );
        assert_eq!(
            allocator.resolve(&index, "leaf", "https://a.org/2", ResourceKind::Manifest),
            "leaf-1"
        );
        assert_eq!(
            allocator.resolve(&index, "leaf", "https://a.org/3", ResourceKind::Manifest),
            "leaf-2"
        );
    }

    #[test]
    fn test_resolve_reuses_suffixed_slug_across_runs() {
        // A previous run left this identifier on "leaf-1"; the base belongs
        // to someone else.
        let index = index_with(&[
            ("https://a.org/other", ResourceKind::Manifest, "leaf"),
            ("https://a.org/1", ResourceKind::Manifest, "leaf-1"),
        ]);
        let mut allocator = SlugAllocator::new();

        let slug = allocator.resolve(&index, "leaf", "https://a.org/1", ResourceKind::Manifest);
        assert_eq!(slug, "leaf-1");
    }

    #[test]
    fn test_type_namespaces_are_independent() {
        let index = index_with(&[("https://a.org/c", ResourceKind::Collection, "leaf")]);
        let mut allocator = SlugAllocator::new();

        // A manifest may take the same slug as a collection
        let slug = allocator.resolve(&index, "leaf", "https://a.org/1", ResourceKind::Manifest);
        assert_eq!(slug, "leaf");
    }

    #[test]
    fn test_resolve_normalizes_identifier() {
        let index = index_with(&[("https://a.org/1?a=1&b=2", ResourceKind::Manifest, "leaf")]);
        let mut allocator = SlugAllocator::new();

        let slug = allocator.resolve(
            &index,
            "leaf",
            "https://a.org/1?b=2&a=1",
            ResourceKind::Manifest,
        );
        assert_eq!(slug, "leaf");
    }

    #[test]
    fn test_claim_base_transfers_occupant() {
        let mut index = index_with(&[("https://a.org/other", ResourceKind::Collection, "works")]);
        let mut allocator = SlugAllocator::new();

        let displaced = allocator.claim_base(
            &mut index,
            "works",
            "https://a.org/root",
            ResourceKind::Collection,
        );

        assert_eq!(
            displaced,
            Some(("https://a.org/other".to_string(), "works-1".to_string()))
        );
        // The occupant still has an entry, on the suffixed slug
        let moved = index
            .entry("https://a.org/other", ResourceKind::Collection)
            .unwrap();
        assert_eq!(moved.slug, "works-1");

        // And the canonical owner now resolves to the base
        let slug = allocator.resolve(
            &index,
            "works",
            "https://a.org/root",
            ResourceKind::Collection,
        );
        assert_eq!(slug, "works");
    }

    #[test]
    fn test_claim_base_noop_when_already_owner() {
        let mut index = index_with(&[("https://a.org/root", ResourceKind::Collection, "works")]);
        let mut allocator = SlugAllocator::new();

        let displaced = allocator.claim_base(
            &mut index,
            "works",
            "https://a.org/root",
            ResourceKind::Collection,
        );
        assert_eq!(displaced, None);
        assert_eq!(index.by_id.len(), 1);
    }
}
