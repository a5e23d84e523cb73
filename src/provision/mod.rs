/// Mailbox provisioning
///
/// Materializes mailboxes on the external mail system. Every call is bounded
/// by a timeout; a timeout is reported like any other provisioning failure.

pub mod mailcow;

pub use mailcow::MailcowProvisioner;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Provisioning failures
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("mail system did not answer within {0:?}")]
    Timeout(Duration),

    #[error("mail system rejected request: {0}")]
    Rejected(String),

    #[error("mail system unreachable: {0}")]
    Transport(String),

    #[error("provisioning aborted: {0}")]
    Aborted(String),
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Mailbox provisioner contract
#[async_trait]
pub trait MailboxProvisioner: Send + Sync {
    /// Create an active mailbox
    async fn create(&self, email: &str, password: &str) -> ProvisionResult<()>;

    async fn set_active(&self, email: &str, active: bool) -> ProvisionResult<()>;

    async fn set_password(&self, email: &str, password: &str) -> ProvisionResult<()>;
}

/// Run a provisioning call under a deadline, cancelling it on expiry
pub async fn with_timeout<F, T>(limit: Duration, call: F) -> ProvisionResult<T>
where
    F: Future<Output = ProvisionResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProvisionError::Timeout(limit)),
    }
}
