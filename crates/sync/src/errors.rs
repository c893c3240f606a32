use std::time::Duration;

use thiserror::Error;

use ordersync_core::errors::{ApplicationError, DomainError};
use ordersync_db::repositories::RepositoryError;

use crate::chat::ChatError;
use crate::crm::CrmError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited by remote service")]
    RateLimited { retry_after: Option<Duration> },
    #[error(transparent)]
    Crm(CrmError),
    #[error(transparent)]
    Chat(ChatError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl SyncError {
    /// Short classification used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::Domain(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::Crm(CrmError::Malformed(_)) | Self::Chat(ChatError::Malformed(_)) => "malformed",
            Self::Crm(CrmError::Rejected { .. }) | Self::Chat(ChatError::Rejected { .. }) => {
                "rejected"
            }
            Self::Crm(_) | Self::Chat(_) | Self::Repository(_) => "transient",
        }
    }
}

impl From<CrmError> for SyncError {
    fn from(error: CrmError) -> Self {
        match error {
            CrmError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            other => Self::Crm(other),
        }
    }
}

impl From<ChatError> for SyncError {
    fn from(error: ChatError) -> Self {
        match error {
            ChatError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            other => Self::Chat(other),
        }
    }
}

impl From<SyncError> for ApplicationError {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::Validation(message) => {
                ApplicationError::Domain(DomainError::InvariantViolation(message))
            }
            SyncError::Domain(error) => ApplicationError::Domain(error),
            SyncError::NotFound(message) => ApplicationError::NotFound(message),
            SyncError::Repository(error) => ApplicationError::Persistence(error.to_string()),
            other => ApplicationError::Integration(other.to_string()),
        }
    }
}
