use crate::receipt::ReceiptError;

/// The main error type for lectern operations.
#[derive(Debug, thiserror::Error)]
pub enum LecternError {
    /// The storage collaborator is unavailable or misbehaving.
    ///
    /// Transient: the caller owns the retry/backoff policy. The platform
    /// retains the original receipt and will redeliver, so nothing is lost.
    #[error("storage unavailable: {0}")]
    Storage(String),

    /// A record that was required does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A receipt event was rejected by the normalizer.
    #[error(transparent)]
    Receipt(#[from] ReceiptError),

    /// A compare-and-swap write lost a version race.
    ///
    /// The reconciler retries these internally; callers only see this
    /// converted to [`LecternError::Storage`] once the retries are exhausted.
    #[error("concurrent modification for user '{user_id}', retry")]
    ConcurrentModification { user_id: String },

    /// A contract violation inside the core. Logged, never silently swallowed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LecternError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether retrying the failed operation can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::ConcurrentModification { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LecternError>;
