use thiserror::Error;

/// Outcome of an authorization failure that did not end in a retry.
///
/// Cloneable so one renewal result can be handed to every request waiting
/// on the same episode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenewalError {
    #[error("Request carried no credential")]
    NoCredential,

    #[error("Request body cannot be replayed")]
    NotRetryable,

    #[error("Network error during token refresh: {0}")]
    NetworkFailure(String),

    #[error("Refresh token rejected with status {0}")]
    RejectedRefresh(u16),

    #[error("Invalid refresh response: {0}")]
    InvalidRefreshResponse(String),

    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Session already ended")]
    SessionEnded,

    #[error("Request kept failing authorization after renewal")]
    RetryCeilingExceeded,

    #[error("Renewal task interrupted: {0}")]
    Interrupted(String),
}

impl RenewalError {
    /// Terminal errors end the session: credentials are cleared and the
    /// session-expired signal fires.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            RenewalError::NoCredential
                | RenewalError::NotRetryable
                | RenewalError::SessionEnded
                | RenewalError::Interrupted(_)
        )
    }
}
