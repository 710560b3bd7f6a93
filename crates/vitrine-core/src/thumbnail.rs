//! Thumbnail enrichment boundary.
//!
//! Resolution internals live outside this crate; the crawler only consumes
//! the contract: a resolver returns a representative image or nothing, and it
//! never raises. Resolvers that reach the network are raced against a timer
//! so one slow image service cannot stall a chunk.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::ThumbnailOptions;
use crate::iiif::ResourceDoc;

/// A resolved representative image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    /// Image URL.
    pub url: String,
    /// Pixel width, when known.
    pub width: Option<u32>,
    /// Pixel height, when known.
    pub height: Option<u32>,
}

/// External thumbnail resolution contract.
///
/// Implementations must treat every internal failure as "no thumbnail" and,
/// when `allow_unsafe` permits network calls, return within a bounded time.
#[async_trait]
pub trait ThumbnailResolver: Send + Sync {
    /// Resolve a representative image for a resource.
    async fn resolve(
        &self,
        doc: &ResourceDoc,
        preferred_size: u32,
        allow_unsafe: bool,
    ) -> Option<Thumbnail>;
}

/// Run a resolver under the configured deadline.
///
/// The timer only applies when `allow_unsafe` is set: a resolver that never
/// performs network calls has no timeout requirement. A deadline miss is
/// logged and treated as "no thumbnail".
pub async fn resolve_with_deadline(
    resolver: &dyn ThumbnailResolver,
    doc: &ResourceDoc,
    options: &ThumbnailOptions,
    deadline: Duration,
) -> Option<Thumbnail> {
    if !options.allow_unsafe {
        return resolver
            .resolve(doc, options.preferred_size, false)
            .await;
    }

    match tokio::time::timeout(
        deadline,
        resolver.resolve(doc, options.preferred_size, true),
    )
    .await
    {
        Ok(thumbnail) => thumbnail,
        Err(_) => {
            debug!("Thumbnail resolution timed out for '{}'", doc.id);
            None
        },
    }
}

/// Resolver that reads the `thumbnail` property embedded in the document.
///
/// Performs no network calls, so it is safe at any concurrency and exempt
/// from the deadline.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedThumbnailResolver;

#[async_trait]
impl ThumbnailResolver for EmbeddedThumbnailResolver {
    async fn resolve(
        &self,
        doc: &ResourceDoc,
        _preferred_size: u32,
        _allow_unsafe: bool,
    ) -> Option<Thumbnail> {
        let declared = doc.raw.get("thumbnail")?;
        // v3 declares a list of image resources, v2 a single object
        let first = declared.as_array().and_then(|l| l.first()).unwrap_or(declared);

        let url = crate::iiif::embedded_id(first)?.to_string();
        Some(Thumbnail {
            url,
            width: dimension(first, "width"),
            height: dimension(first, "height"),
        })
    }
}

fn dimension(value: &Value, field: &str) -> Option<u32> {
    value
        .get(field)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
}
