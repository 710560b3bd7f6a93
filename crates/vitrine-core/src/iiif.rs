//! Tolerant model of IIIF Presentation documents.
//!
//! Collections and manifests arrive in both Presentation 2 (`@id`/`@type`,
//! plain-string labels) and Presentation 3 (`id`/`type`, language-keyed
//! labels) spellings. This module reads either form into one envelope the
//! rest of the crawler works with; the raw document is kept alongside so the
//! cache stores exactly what was fetched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result, types::ResourceKind};

/// A label that is either a bare string or a language-keyed value map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalizedString {
    /// Presentation 2 style: a single plain string.
    Plain(String),
    /// Presentation 3 style: language code to list of values.
    ByLanguage(BTreeMap<String, Vec<String>>),
}

impl LocalizedString {
    /// Extract the first displayable string, regardless of representation.
    ///
    /// This is the single extraction point used everywhere a display title is
    /// needed; `ByLanguage` prefers `en`/`none` before falling back to the
    /// first language present.
    #[must_use]
    pub fn first_string(&self) -> Option<&str> {
        match self {
            Self::Plain(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            },
            Self::ByLanguage(map) => ["en", "none"]
                .iter()
                .filter_map(|lang| map.get(*lang))
                .chain(map.values())
                .flat_map(|values| values.iter())
                .map(|v| v.trim())
                .find(|v| !v.is_empty()),
        }
    }
}

/// A reference to a child resource declared inside a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    /// Identifier as declared by the parent, not yet normalized.
    pub id: String,
    /// Declared class of the child.
    pub kind: ResourceKind,
}

/// Parsed envelope around a fetched Collection or Manifest document.
#[derive(Debug, Clone)]
pub struct ResourceDoc {
    /// Identifier as declared by the document itself.
    pub id: String,
    /// Resource class.
    pub kind: ResourceKind,
    /// Document label, when present and well-formed.
    pub label: Option<LocalizedString>,
    /// Child references, in declaration order (collections only).
    pub children: Vec<ChildRef>,
    /// The raw document exactly as fetched.
    pub raw: Value,
}

impl ResourceDoc {
    /// Parse a raw JSON document into the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] when the document lacks an identifier or a
    /// recognizable resource type.
    pub fn from_value(raw: Value) -> Result<Self> {
        let id = embedded_id(&raw)
            .ok_or_else(|| Error::Parse("document has no id or @id".to_string()))?
            .to_string();
        let kind = embedded_kind(&raw)
            .ok_or_else(|| Error::Parse(format!("document '{id}' has no recognizable type")))?;

        let label = raw
            .get("label")
            .cloned()
            .and_then(|v| serde_json::from_value::<LocalizedString>(v).ok());

        let children = collect_children(&raw);

        Ok(Self {
            id,
            kind,
            label,
            children,
            raw,
        })
    }

    /// Display title for the resource, or the kind's fallback base.
    #[must_use]
    pub fn title(&self) -> &str {
        self.label
            .as_ref()
            .and_then(LocalizedString::first_string)
            .unwrap_or_else(|| self.kind.default_slug_base())
    }
}

/// Read the identifier embedded in a raw document, accepting both spellings.
#[must_use]
pub fn embedded_id(value: &Value) -> Option<&str> {
    value
        .get("id")
        .or_else(|| value.get("@id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Read the resource kind embedded in a raw document.
#[must_use]
pub fn embedded_kind(value: &Value) -> Option<ResourceKind> {
    let declared = value
        .get("type")
        .or_else(|| value.get("@type"))
        .and_then(Value::as_str)?;
    kind_from_type(declared)
}

/// Classify a declared type string, tolerating the Presentation 2 prefix.
fn kind_from_type(declared: &str) -> Option<ResourceKind> {
    match declared.trim().trim_start_matches("sc:") {
        "Manifest" => Some(ResourceKind::Manifest),
        "Collection" => Some(ResourceKind::Collection),
        _ => None,
    }
}

/// Gather child references from the fields the two Presentation versions use.
///
/// Presentation 3 lists everything under `items`; Presentation 2 splits
/// children across `collections`, `manifests`, and `members`. Children with a
/// missing identifier or an unrecognized type are skipped.
fn collect_children(raw: &Value) -> Vec<ChildRef> {
    let mut children = Vec::new();
    for field in ["items", "collections", "manifests", "members"] {
        let Some(list) = raw.get(field).and_then(Value::as_array) else {
            continue;
        };
        for child in list {
            let Some(id) = embedded_id(child) else {
                continue;
            };
            let Some(kind) = embedded_kind(child) else {
                continue;
            };
            children.push(ChildRef {
                id: id.to_string(),
                kind,
            });
        }
    }
    children
}
