//! Error types and handling for vitrine-core operations.
//!
//! Errors are categorized so the crawl loop can decide what is fatal and what
//! degrades: per-task failures are caught at the worker boundary and turn into
//! skips, while an unreadable index degrades to a cold cache instead of
//! raising at all.

use thiserror::Error;

/// The main error type for vitrine-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed (cache reads/writes, directory management).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Network operation failed before a response was obtained.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote answered with a non-success status.
    #[error("HTTP {status} fetching '{url}'")]
    Http {
        /// URL that was requested.
        url: String,
        /// Status code returned by the server.
        status: u16,
    },

    /// A fetched document could not be understood as a IIIF resource.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The identifier is neither a remote URL nor a local file path.
    #[error("Unsupported scheme for identifier '{0}'")]
    UnsupportedScheme(String),

    /// Cache storage operation failed beyond basic file I/O.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration is invalid (bad override values, missing root).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource was not found in the cache or upstream.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The external renderer failed for one resource.
    #[error("Render error: {0}")]
    Render(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl Error {
    /// Get the error category as a string identifier for logging.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Network(_) | Self::Http { .. } => "network",
            Self::Parse(_) => "parse",
            Self::UnsupportedScheme(_) => "scheme",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::NotFound(_) => "not_found",
            Self::Render(_) => "render",
            Self::Serialization(_) => "serialization",
        }
    }
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
