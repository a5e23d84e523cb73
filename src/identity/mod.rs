/// Identity provider integration
///
/// The identity provider owns credentials. The portal creates identities on
/// first redemption, rotates passwords on renewal, deletes identities during
/// compensation and authenticates logins through it.

pub mod gotrue;

pub use gotrue::GoTrueIdentityProvider;

use crate::error::PortalError;
use async_trait::async_trait;
use thiserror::Error;

/// Identity provider failures
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The provider answered and refused (4xx)
    #[error("identity provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Transport failure, timeout or 5xx
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

impl From<IdentityError> for PortalError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Rejected { status, message } => {
                PortalError::UpstreamAuth { status, message }
            }
            IdentityError::Unavailable(detail) => {
                PortalError::Internal(format!("identity provider unavailable: {}", detail))
            }
        }
    }
}

/// Identity provider contract
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an identity and return its id
    async fn create_account(&self, email: &str, password: &str) -> IdentityResult<String>;

    async fn set_password(&self, identity_id: &str, password: &str) -> IdentityResult<()>;

    async fn delete_account(&self, identity_id: &str) -> IdentityResult<()>;

    /// Verify credentials and return the identity id
    async fn authenticate(&self, email: &str, password: &str) -> IdentityResult<String>;
}
