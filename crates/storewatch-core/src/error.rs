//! Error taxonomy shared by the registry, store backends and check pipeline.

/// Errors surfaced by storewatch library code.
///
/// | Variant | Caller action |
/// |---------|---------------|
/// | [`Validation`](WatchError::Validation) | fix the input, no retry |
/// | [`DuplicateSource`](WatchError::DuplicateSource) | URL is already tracked |
/// | [`SourceNotFound`](WatchError::SourceNotFound) | source was deleted or never existed |
/// | [`Fetch`](WatchError::Fetch) | transient; the next due cycle retries |
/// | [`Notification`](WatchError::Notification) | logged only, never fatal |
/// | [`Persistence`](WatchError::Persistence) | aborts the current check of one source |
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("source already tracked: {url}")]
    DuplicateSource { url: String },

    #[error("source {0} not found")]
    SourceNotFound(i64),

    #[error("fetch failed for source {source_id}: {message}")]
    Fetch { source_id: i64, message: String },

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl WatchError {
    /// Short machine-readable label, used in cycle reports.
    pub fn kind(&self) -> &'static str {
        match self {
            WatchError::Validation(_) => "validation",
            WatchError::DuplicateSource { .. } => "duplicate_source",
            WatchError::SourceNotFound(_) => "source_not_found",
            WatchError::Fetch { .. } => "fetch",
            WatchError::Notification(_) => "notification",
            WatchError::Persistence(_) => "persistence",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        WatchError::Validation(msg.into())
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        WatchError::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
