use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

/// Leaf error taxonomy for the core. Every fallible operation against the
/// cluster API or the Provider eventually gets classified into one of these
/// variants so that the worker loop (`queue::run_worker`) can decide whether
/// to retry, and so that user-visible failures can be distinguished from
/// internal bookkeeping ones.
#[derive(Error, Debug)]
pub enum StdError {
    #[error("kube error: {0}")]
    Kube(#[source] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("persistent state entry not found for {0}")]
    StateNotFound(String),

    #[error("persistent state backing store unavailable: {0}")]
    StateUnavailable(String),

    #[error("persistent state blob is malformed: {0}")]
    StateCorrupt(String),

    #[error("provider quota exceeded creating {0}")]
    QuotaExceeded(String),

    #[error("provider backend error: {0}")]
    BackendTransient(String),

    #[error("cluster API patch was rejected as invalid: {0}")]
    ValidationInvalid(String),

    #[error("domains out of sync for {0}, soft-deleted and will recreate")]
    OutOfSync(String),

    #[error("leadership lost")]
    LeaderLost,

    #[error("name generation failed: {0}")]
    NameGeneration(String),

    #[error("resource is missing required metadata: {0}")]
    MissingMetadata(String),

    #[error("unrecognized provider status: {0}")]
    UnknownStatus(String),
}

impl StdError {
    /// Low-cardinality label suitable for a Prometheus metric dimension.
    pub fn metric_label(&self) -> &'static str {
        match self {
            StdError::Kube(_) => "kube",
            StdError::Serialization(_) => "serialization",
            StdError::StateNotFound(_) => "state_not_found",
            StdError::StateUnavailable(_) => "state_unavailable",
            StdError::StateCorrupt(_) => "state_corrupt",
            StdError::QuotaExceeded(_) => "quota_exceeded",
            StdError::BackendTransient(_) => "backend_transient",
            StdError::ValidationInvalid(_) => "validation_invalid",
            StdError::OutOfSync(_) => "out_of_sync",
            StdError::LeaderLost => "leader_lost",
            StdError::NameGeneration(_) => "name_generation",
            StdError::MissingMetadata(_) => "missing_metadata",
            StdError::UnknownStatus(_) => "unknown_status",
        }
    }

    /// Whether the worker loop should requeue this item with backoff.
    /// `ValidationInvalid` is terminal: requeueing it would never succeed
    /// since the cluster API rejected the write outright.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, StdError::ValidationInvalid(_))
    }
}

impl From<kube::Error> for StdError {
    fn from(e: kube::Error) -> Self {
        StdError::Kube(e)
    }
}

impl From<serde_json::Error> for StdError {
    fn from(e: serde_json::Error) -> Self {
        StdError::Serialization(e)
    }
}

/// An error paired with an explicit requeue delay, used when a reconciler
/// knows a better backoff than the queue's default (e.g. "check again once
/// the Provider's rate limit window rolls over").
#[derive(Error, Debug)]
pub struct ErrorWithRequeue {
    pub duration: Duration,
    pub error: StdError,
}

impl ErrorWithRequeue {
    pub fn new(error: StdError, duration: Duration) -> ErrorWithRequeue {
        ErrorWithRequeue { error, duration }
    }

    pub fn metric_label(&self) -> &'static str {
        self.error.metric_label()
    }
}

impl fmt::Display for ErrorWithRequeue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    StdError(#[source] StdError),

    #[error("{0}")]
    ErrorWithRequeue(#[source] ErrorWithRequeue),
}

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::StdError(e) => e.metric_label(),
            Error::ErrorWithRequeue(e) => e.metric_label(),
        }
    }

    pub fn is_retriable(&self) -> bool {
        match self {
            Error::StdError(e) => e.is_retriable(),
            Error::ErrorWithRequeue(_) => true,
        }
    }
}

impl From<StdError> for Error {
    fn from(e: StdError) -> Self {
        Error::StdError(e)
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::StdError(StdError::Kube(e))
    }
}

impl From<ErrorWithRequeue> for Error {
    fn from(e: ErrorWithRequeue) -> Self {
        Error::ErrorWithRequeue(e)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
