//! Core data types: the persisted manifest index and crawl work items.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// The two resource classes the crawler distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A leaf resource describing a single addressable work.
    Manifest,
    /// A container aggregating manifests and/or nested collections.
    Collection,
}

impl ResourceKind {
    /// Cache subdirectory holding documents of this kind.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Manifest => "resources",
            Self::Collection => "collections",
        }
    }

    /// Default slug base used when a resource carries no usable title.
    #[must_use]
    pub const fn default_slug_base(self) -> &'static str {
        match self {
            Self::Manifest => "untitled",
            Self::Collection => "collection",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manifest => write!(f, "Manifest"),
            Self::Collection => write!(f, "Collection"),
        }
    }
}

/// One row of the manifest index: a discovered resource and its placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// Normalized identifier of the resource.
    #[serde(default)]
    pub id: String,
    /// Resource class.
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Stable short name the cache file is keyed by.
    pub slug: String,
    /// Normalized identifier of the containing collection, empty for the root.
    #[serde(default)]
    pub parent: String,
    /// Representative image URL, when enrichment produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Pixel width of the representative image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_width: Option<u32>,
    /// Pixel height of the representative image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_height: Option<u32>,
}

impl IndexEntry {
    /// Create a bare entry with no thumbnail annotation.
    #[must_use]
    pub const fn new(id: String, kind: ResourceKind, slug: String, parent: String) -> Self {
        Self {
            id,
            kind,
            slug,
            parent,
            thumbnail: None,
            thumbnail_width: None,
            thumbnail_height: None,
        }
    }
}

/// Identity of the root collection a cache was built from.
///
/// A change in either field between runs invalidates the entire cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootSignature {
    /// Normalized identifier of the root collection.
    pub uri: String,
    /// Content hash of the root document at the time of the crawl.
    pub hash: String,
    /// When the signature was last recorded.
    pub updated_at: DateTime<Utc>,
}

/// The single persisted source of truth mapping identifiers to cached files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestIndex {
    /// All known entries, in discovery order.
    #[serde(default, deserialize_with = "deserialize_by_id")]
    pub by_id: Vec<IndexEntry>,
    /// Root signature of the crawl that produced this index.
    #[serde(default)]
    pub collection: Option<RootSignature>,
    /// Index format version stamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ManifestIndex {
    /// Look up an entry by normalized identifier and kind.
    #[must_use]
    pub fn entry(&self, id: &str, kind: ResourceKind) -> Option<&IndexEntry> {
        self.by_id.iter().find(|e| e.kind == kind && e.id == id)
    }

    /// Look up an entry occupying a slug within a kind's namespace.
    #[must_use]
    pub fn entry_by_slug(&self, slug: &str, kind: ResourceKind) -> Option<&IndexEntry> {
        self.by_id.iter().find(|e| e.kind == kind && e.slug == slug)
    }

    /// Insert or replace the entry for `(entry.id, entry.kind)`.
    ///
    /// Entries are only ever added or updated within a build, never dropped.
    pub fn upsert_entry(&mut self, entry: IndexEntry) {
        if let Some(existing) = self
            .by_id
            .iter_mut()
            .find(|e| e.kind == entry.kind && e.id == entry.id)
        {
            *existing = entry;
        } else {
            self.by_id.push(entry);
        }
    }
}

/// Accept both the current list form and the legacy object-map form of `byId`.
///
/// Legacy indexes stored `byId` as `{ "<id>": { ...entry } }` where the map key
/// carried the identifier; those are folded back into the list representation.
fn deserialize_by_id<'de, D>(deserializer: D) -> std::result::Result<Vec<IndexEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ByIdRepr {
        List(Vec<IndexEntry>),
        Map(BTreeMap<String, IndexEntry>),
    }

    match ByIdRepr::deserialize(deserializer)? {
        ByIdRepr::List(entries) => Ok(entries),
        ByIdRepr::Map(map) => Ok(map
            .into_iter()
            .map(|(id, mut entry)| {
                if entry.id.is_empty() {
                    entry.id = id;
                }
                entry
            })
            .collect()),
    }
}

/// A pending unit of work: one leaf resource to fetch and render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    /// Identifier of the leaf resource, as declared by its parent.
    pub id: String,
    /// Normalized identifier of the containing collection.
    pub parent: String,
}

/// Summary record handed to downstream consumers for each rendered work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRecord {
    /// Normalized identifier of the work.
    pub id: String,
    /// Display title extracted from the resource label.
    pub title: String,
    /// Site-relative link to the rendered page.
    pub href: String,
    /// Record discriminator, always `"work"`.
    #[serde(rename = "type", default = "work_record_type")]
    pub record_type: String,
    /// Representative image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Pixel width of the representative image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_width: Option<u32>,
    /// Pixel height of the representative image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_height: Option<u32>,
}

fn work_record_type() -> String {
    "work".to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(id: &str, kind: ResourceKind, slug: &str) -> IndexEntry {
        IndexEntry::new(id.to_string(), kind, slug.to_string(), String::new())
    }

    #[test]
    fn test_upsert_entry_replaces_by_id_and_kind() {
        let mut index = ManifestIndex::default();
        index.upsert_entry(entry("https://a.org/1", ResourceKind::Manifest, "one"));
        index.upsert_entry(entry("https://a.org/1", ResourceKind::Collection, "one"));
        assert_eq!(index.by_id.len(), 2);

        // Same id and kind replaces in place, never drops
        let mut updated = entry("https://a.org/1", ResourceKind::Manifest, "one");
        updated.thumbnail = Some("https://a.org/t.jpg".to_string());
        index.upsert_entry(updated);

        assert_eq!(index.by_id.len(), 2);
        let found = index.entry("https://a.org/1", ResourceKind::Manifest).unwrap();
        assert_eq!(found.thumbnail.as_deref(), Some("https://a.org/t.jpg"));
    }

    #[test]
    fn test_index_serializes_type_and_camel_case() {
        let mut e = entry("https://a.org/1", ResourceKind::Manifest, "one");
        e.thumbnail_width = Some(120);
        let json = serde_json::to_string(&e).unwrap();

        assert!(json.contains("\"type\":\"Manifest\""));
        assert!(json.contains("\"thumbnailWidth\":120"));
        assert!(!json.contains("thumbnail_height"));
    }

    #[test]
    fn test_by_id_accepts_list_form() {
        let json = r#"{
            "byId": [
                {"id": "https://a.org/1", "type": "Manifest", "slug": "one", "parent": ""}
            ],
            "collection": null
        }"#;

        let index: ManifestIndex = serde_json::from_str(json).unwrap();
        assert_eq!(index.by_id.len(), 1);
        assert_eq!(index.by_id[0].slug, "one");
    }

    #[test]
    fn test_by_id_accepts_legacy_map_form() {
        let json = r#"{
            "byId": {
                "https://a.org/1": {"type": "Manifest", "slug": "one"},
                "https://a.org/c": {"type": "Collection", "slug": "root", "parent": ""}
            }
        }"#;

        let index: ManifestIndex = serde_json::from_str(json).unwrap();
        assert_eq!(index.by_id.len(), 2);

        // The map key becomes the identifier
        let m = index.entry("https://a.org/1", ResourceKind::Manifest).unwrap();
        assert_eq!(m.slug, "one");
        assert!(index.entry("https://a.org/c", ResourceKind::Collection).is_some());
    }

    #[test]
    fn test_index_round_trips_collection_and_version() {
        let index = ManifestIndex {
            by_id: vec![entry("https://a.org/1", ResourceKind::Manifest, "one")],
            collection: Some(RootSignature {
                uri: "https://a.org/c".to_string(),
                hash: "abc123".to_string(),
                updated_at: Utc::now(),
            }),
            version: Some("2".to_string()),
        };

        let json = serde_json::to_string_pretty(&index).unwrap();
        let back: ManifestIndex = serde_json::from_str(&json).unwrap();

        assert_eq!(back.by_id, index.by_id);
        assert_eq!(back.collection.as_ref().unwrap().uri, "https://a.org/c");
        assert_eq!(back.version.as_deref(), Some("2"));
    }

    #[test]
    fn test_work_record_wire_shape() {
        let record = WorkRecord {
            id: "https://a.org/1".to_string(),
            title: "Folio 1".to_string(),
            href: "/works/folio-1".to_string(),
            record_type: "work".to_string(),
            thumbnail: None,
            thumbnail_width: None,
            thumbnail_height: None,
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type\":\"work\""));
        assert!(!json.contains("thumbnail"));
    }
}
