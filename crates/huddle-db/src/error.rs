use thiserror::Error;

/// Outcomes of store operations.
///
/// Everything except `Transient` and `Poisoned` is an expected business
/// result and is surfaced to the caller unchanged. A `Transient` failure
/// means the enclosing transaction was rolled back and the whole call may be
/// retried.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden")]
    Forbidden,

    #[error("no other member can take over as admin")]
    NoEligibleSuccessor,

    #[error("message target no longer exists")]
    TargetNotFound,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Transient(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Poisoned)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
