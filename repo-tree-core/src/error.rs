use thiserror::Error;

use crate::contract::FetchError;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing owner or repository segment. Never retried.
    #[error("Invalid path. Use /owner/repo or /owner/repo/branch: {0}")]
    InvalidRequest(String),

    /// The listing collaborator failed; `what` names the step that failed.
    #[error("Failed to get {what}: {source}")]
    Upstream {
        what: &'static str,
        #[source]
        source: FetchError,
    },
}

impl ServiceError {
    pub fn is_upstream(&self) -> bool {
        matches!(self, ServiceError::Upstream { .. })
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
