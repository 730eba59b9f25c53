use thiserror::Error;

/// Error taxonomy for the indexing and retrieval pipeline.
///
/// Retry deciders inspect the variant itself via [`Error::is_transient`],
/// never the message text.
#[derive(Error, Debug)]
pub enum Error {
    /// Network errors, HTTP 429, or 5xx from the embedding service. Retried
    /// with backoff by the embedder.
    #[error("transient error: {0}")]
    Transient(String),

    /// 4xx (other than 429) from the embedding service. Surfaced as a run
    /// failure after exactly one attempt.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// A single file failed to parse. Collected by the orchestrator, never
    /// fatal to the run.
    #[error("parse error in {file}: {message}")]
    Parse { file: String, message: String },

    /// Missing commit, a force-pushed branch, or an empty repository.
    /// Demoted to a warning; the change detector falls back to full-index
    /// or an empty change set.
    #[error("git error: {0}")]
    Git(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A second indexing run was requested for a project that is already
    /// running, without `force`.
    #[error("indexing already running for project {0}")]
    AlreadyRunning(String),

    /// Database transaction errors. Aborts the run for that source; the
    /// source's `lastIndexedCommit`/`lastIndexedAt` are not advanced.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Missing required configuration at startup. Fatal before the
    /// orchestrator runs.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Propagated verbatim, never wrapped as failure noise.
    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// True for errors the embedder's retry loop should retry: transport
    /// failures, 429, and 5xx. 4xx other than 429 and everything else is
    /// not retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
