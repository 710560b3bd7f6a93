//! Resource fetching over HTTP and the local filesystem.
//!
//! Identifiers resolve three ways: `http(s)` URLs go over the network,
//! `file` URLs are read directly from disk, and anything else is rejected
//! with [`Error::UnsupportedScheme`]. Failed fetches are never retried.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::{Error, Result};

/// A fetched document plus the content hash of its raw bytes.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Parsed JSON body.
    pub value: Value,
    /// Base64-encoded SHA-256 of the raw body.
    pub hash: String,
}

/// HTTP and file-scheme fetcher for IIIF documents.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// Creates a new fetcher with the default request timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Creates a new fetcher with a custom request timeout (primarily for tests).
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vitrine/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()
            .map_err(Error::Network)?;
        Ok(Self { client })
    }

    /// Resolve an identifier to its document by scheme.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedScheme`] for identifiers that are neither
    /// remote URLs nor `file` URLs, [`Error::Http`] for non-success responses,
    /// and [`Error::Serialization`] for bodies that are not JSON.
    pub async fn resolve(&self, identifier: &str) -> Result<FetchedDocument> {
        let parsed = Url::parse(identifier)
            .map_err(|_| Error::UnsupportedScheme(identifier.to_string()))?;

        match parsed.scheme() {
            "http" | "https" => self.fetch_remote(identifier).await,
            "file" => read_local(&parsed).await,
            _ => Err(Error::UnsupportedScheme(identifier.to_string())),
        }
    }

    /// Fetch a remote document.
    async fn fetch_remote(&self, url: &str) -> Result<FetchedDocument> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            if status == StatusCode::NOT_FOUND {
                return Err(Error::NotFound(format!("Resource not found at '{url}'")));
            }
            return Err(Error::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        debug!("Fetched {} bytes from {}", body.len(), url);
        document_from_body(&body)
    }
}

/// Read a `file://` document from disk.
async fn read_local(url: &Url) -> Result<FetchedDocument> {
    let path = url
        .to_file_path()
        .map_err(|()| Error::UnsupportedScheme(url.to_string()))?;
    let body = tokio::fs::read_to_string(&path).await?;
    debug!("Read {} bytes from {}", body.len(), path.display());
    document_from_body(&body)
}

fn document_from_body(body: &str) -> Result<FetchedDocument> {
    let value: Value = serde_json::from_str(body)?;
    Ok(FetchedDocument {
        value,
        hash: content_hash(body),
    })
}

/// Base64-encoded SHA-256 of a document body.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    STANDARD.encode(hasher.finalize())
}

// Note: Default is not implemented as Fetcher::new() can fail.
// Use Fetcher::new() directly and handle the Result.
