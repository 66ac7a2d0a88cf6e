use async_trait::async_trait;
use thiserror::Error;

use crate::models::provider::{AccountInfo, ChangesPage, Credential};

/// Provider failures, tagged by how the sync loop must react to them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The change stream mutated while paging; restart from the committed cursor.
    #[error("retryable provider error: {reason}")]
    Retryable { reason: String },
    /// Access was revoked or needs re-authentication.
    #[error("credential error: {reason}")]
    Credential { reason: String },
    #[error("provider error: {reason}")]
    Fatal { reason: String },
}

impl ProviderError {
    pub fn retryable(reason: impl Into<String>) -> Self {
        ProviderError::Retryable { reason: reason.into() }
    }

    pub fn credential(reason: impl Into<String>) -> Self {
        ProviderError::Credential { reason: reason.into() }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        ProviderError::Fatal { reason: reason.into() }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable { .. })
    }
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn fetch_accounts(&self, credential: &Credential) -> Result<Vec<AccountInfo>, ProviderError>;

    /// `cursor` of `None` starts from the beginning of the stream.
    async fn fetch_changes_page(&self, credential: &Credential, cursor: Option<&str>) -> Result<ChangesPage, ProviderError>;
}
