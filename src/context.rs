/// Application context and dependency injection
use crate::{
    admin::ActivationCodeManager,
    clock::{Clock, SystemClock},
    config::ServerConfig,
    db::{self, store::MailboxPolicy, RelationalStore, SqliteStore},
    error::PortalResult,
    gate::SessionModeGate,
    identity::{GoTrueIdentityProvider, IdentityProvider},
    jobs::ExpirySweep,
    provision::{MailboxProvisioner, MailcowProvisioner},
    rate_limit::{FixedWindowLimiter, RateLimitGate},
    saga::{RedemptionSaga, SagaSettings},
    session::SessionManager,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub clock: Arc<dyn Clock>,
    // Collaborators
    pub store: Arc<dyn RelationalStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub provisioner: Arc<dyn MailboxProvisioner>,
    // Sessions
    pub sessions: Arc<SessionManager>,
    pub gate: Arc<SessionModeGate>,
    // Redemption and code lifecycle
    pub saga: Arc<RedemptionSaga>,
    pub codes: Arc<ActivationCodeManager>,
    pub sweep: Arc<ExpirySweep>,
    // Rate limiting
    pub window_limiter: Arc<FixedWindowLimiter>,
    pub rate_limiter: RateLimitGate,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> PortalResult<Self> {
        config.validate()?;

        let db = db::create_pool(&config.storage.database_path, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let store = Arc::new(SqliteStore::new(
            db.clone(),
            MailboxPolicy {
                edu_domain: config.mailbox.edu_domain.clone(),
                term: chrono::Duration::days(config.mailbox.term_days),
            },
        ));
        let identity = Arc::new(GoTrueIdentityProvider::new(&config.identity)?);
        let provisioner = Arc::new(MailcowProvisioner::new(&config.mailbox)?);

        Ok(Self::from_parts(
            config,
            db,
            store,
            identity,
            provisioner,
            Arc::new(SystemClock),
        ))
    }

    /// Wire services around already constructed collaborators
    pub fn from_parts(
        config: ServerConfig,
        db: SqlitePool,
        store: Arc<dyn RelationalStore>,
        identity: Arc<dyn IdentityProvider>,
        provisioner: Arc<dyn MailboxProvisioner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            &config.authentication.session_secret,
            chrono::Duration::hours(config.authentication.admin_session_ttl_hours),
            chrono::Duration::days(config.authentication.user_session_ttl_days),
            clock.clone(),
        ));

        let gate = Arc::new(SessionModeGate::new(
            store.clone(),
            identity.clone(),
            sessions.clone(),
            clock.clone(),
        ));

        let saga = Arc::new(RedemptionSaga::new(
            store.clone(),
            identity.clone(),
            provisioner.clone(),
            sessions.clone(),
            clock.clone(),
            SagaSettings::from_config(&config.mailbox),
        ));

        let codes = Arc::new(ActivationCodeManager::new(store.clone(), clock.clone()));

        let sweep = Arc::new(ExpirySweep::new(
            store.clone(),
            provisioner.clone(),
            clock.clone(),
            Duration::from_secs(config.mailbox.timeout_secs),
        ));

        let window_limiter = Arc::new(FixedWindowLimiter::new(clock.clone()));
        let rate_limiter = RateLimitGate::new(&config.rate_limit, window_limiter.clone());

        Self {
            config: Arc::new(config),
            db,
            clock,
            store,
            identity,
            provisioner,
            sessions,
            gate,
            saga,
            codes,
            sweep,
            window_limiter,
            rate_limiter,
        }
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
