//! Error types for the harvester.
//!
//! `HarvesterError` carries the detailed context for library consumers.
//! Every variant maps onto a coarse [`FailureKind`] that is recorded in
//! per-task outcomes and in the run summary.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Main error type for the harvester library.
#[derive(Debug, Error)]
pub enum HarvesterError {
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Session identifier is not two consecutive years.
    #[error("Invalid session id: '{0}'. Expected two consecutive years (e.g., 20192020)")]
    InvalidSessionId(String),

    /// Timeout, connection reset or 5xx response; retries exhausted.
    #[error("Transient network failure for {url} after {attempts} attempt(s): {message}")]
    TransientNetwork {
        url: String,
        attempts: u32,
        message: String,
    },

    /// 4xx response or malformed URL. Never retried.
    #[error("Permanent fetch failure for {url}{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    PermanentFetch {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// The page has no `#content_main` region.
    #[error("Content region not found in {url}")]
    AnchorNotFound { url: String },

    /// The content region has no bill-start marker.
    #[error("Bill text marker not found in {url}")]
    MarkerNotFound { url: String },

    /// Writing a document to disk failed.
    #[error("Failed to write {}: {source}", .path.display())]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The session listing page could not be retrieved.
    #[error("Failed to fetch listing for session {session}: {source}")]
    ListingFetch {
        session: String,
        #[source]
        source: Box<HarvesterError>,
    },

    /// The run was cancelled while the request was waiting to be retried.
    #[error("Cancelled while fetching {url}")]
    Cancelled { url: String },

    /// HTTP client error outside of a request (e.g. building the client).
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error.
    #[error("YAML serialization failed: {0}")]
    YamlSerialization(#[from] serde_yaml_ng::Error),

    /// A spawned task panicked or was aborted.
    #[error("Task did not complete: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl HarvesterError {
    /// Coarse classification used in outcome records.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::TransientNetwork { .. } => FailureKind::TransientNetworkFailure,
            Self::PermanentFetch { .. } => FailureKind::PermanentFetchFailure,
            Self::AnchorNotFound { .. } => FailureKind::AnchorNotFound,
            Self::MarkerNotFound { .. } => FailureKind::MarkerNotFound,
            Self::StorageWrite { .. } | Self::Io(_) => FailureKind::StorageWriteFailure,
            Self::ListingFetch { .. } => FailureKind::ListingFetchFailure,
            Self::Config(_)
            | Self::InvalidSessionId(_)
            | Self::Http(_)
            | Self::YamlSerialization(_)
            | Self::TaskJoin(_)
            | Self::Cancelled { .. } => FailureKind::Internal,
        }
    }

    /// Whether a fetch that failed with this error may be attempted again.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. })
    }
}

/// Failure classification recorded for a task that ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientNetworkFailure,
    PermanentFetchFailure,
    AnchorNotFound,
    MarkerNotFound,
    StorageWriteFailure,
    ListingFetchFailure,
    Internal,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientNetworkFailure => "transient_network_failure",
            Self::PermanentFetchFailure => "permanent_fetch_failure",
            Self::AnchorNotFound => "anchor_not_found",
            Self::MarkerNotFound => "marker_not_found",
            Self::StorageWriteFailure => "storage_write_failure",
            Self::ListingFetchFailure => "listing_fetch_failure",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, HarvesterError>;
