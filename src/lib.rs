/// EduHub - activation code redemption and edu mailbox portal
///
/// Redeems single-use activation codes into provisioned institutional
/// mailboxes, compensating partial failures across the identity provider,
/// the database and the mail system, and gates the edu session mode on the
/// live state of the mailbox.

pub mod admin;
pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod gate;
pub mod identity;
pub mod jobs;
pub mod metrics;
pub mod provision;
pub mod rate_limit;
pub mod saga;
pub mod server;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ServerConfig;
pub use context::AppContext;
pub use error::{PortalError, PortalResult};
