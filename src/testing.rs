/// In-process collaborators and fixtures for unit tests
use crate::{
    clock::{Clock, FixedClock},
    config::ServerConfig,
    context::AppContext,
    db::{memory_pool, store::MailboxPolicy, CodeStatus, RedeemParams, RelationalStore, SqliteStore},
    gate::SessionModeGate,
    identity::{IdentityError, IdentityProvider, IdentityResult},
    jobs::ExpirySweep,
    provision::{MailboxProvisioner, ProvisionError, ProvisionResult},
    saga::{RedeemInput, RedemptionSaga, SagaSettings},
    session::{SessionManager, SessionMode, UserSession},
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct FakeUser {
    email: String,
    password: String,
}

/// Identity provider keeping users in memory
#[derive(Default)]
pub(crate) struct FakeIdentityProvider {
    users: Mutex<HashMap<String, FakeUser>>,
    fail_deletes: AtomicBool,
}

impl FakeIdentityProvider {
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    pub fn exists(&self, identity_id: &str) -> bool {
        self.users.lock().unwrap().contains_key(identity_id)
    }

    /// Register a user directly, returning its id
    pub fn register(&self, email: &str, password: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.users.lock().unwrap().insert(
            id.clone(),
            FakeUser {
                email: email.to_lowercase(),
                password: password.to_string(),
            },
        );
        id
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> IdentityResult<String> {
        let taken = self
            .users
            .lock()
            .unwrap()
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(email));
        if taken {
            return Err(IdentityError::Rejected {
                status: 422,
                message: "email already registered".to_string(),
            });
        }
        Ok(self.register(email, password))
    }

    async fn set_password(&self, identity_id: &str, password: &str) -> IdentityResult<()> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(identity_id).ok_or_else(|| IdentityError::Rejected {
            status: 404,
            message: "user not found".to_string(),
        })?;
        user.password = password.to_string();
        Ok(())
    }

    async fn delete_account(&self, identity_id: &str) -> IdentityResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(IdentityError::Unavailable("delete refused".to_string()));
        }
        self.users.lock().unwrap().remove(identity_id);
        Ok(())
    }

    async fn authenticate(&self, email: &str, password: &str) -> IdentityResult<String> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|(_, u)| u.email.eq_ignore_ascii_case(email) && u.password == password)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| IdentityError::Rejected {
                status: 400,
                message: "Invalid login credentials".to_string(),
            })
    }
}

/// Failure injected into every provisioner call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProvisionFailure {
    Reject,
    Hang,
    Panic,
}

/// Provisioner recording calls against an in-memory mail system
#[derive(Default)]
pub(crate) struct FakeProvisioner {
    mailboxes: Mutex<HashMap<String, bool>>,
    calls: Mutex<Vec<String>>,
    failure: Mutex<Option<ProvisionFailure>>,
    refuse_deactivation: Mutex<HashSet<String>>,
}

impl FakeProvisioner {
    pub fn fail_with(&self, failure: Option<ProvisionFailure>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub fn fail_set_active_for(&self, email: &str) {
        self.refuse_deactivation.lock().unwrap().insert(email.to_string());
    }

    /// Successful calls in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mailbox_active(&self, email: &str) -> bool {
        self.mailboxes.lock().unwrap().get(email).copied().unwrap_or(false)
    }

    async fn injected(&self) -> ProvisionResult<()> {
        let failure = *self.failure.lock().unwrap();
        match failure {
            None => Ok(()),
            Some(ProvisionFailure::Reject) => Err(ProvisionError::Rejected("quota exhausted".to_string())),
            Some(ProvisionFailure::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
            Some(ProvisionFailure::Panic) => panic!("provisioner exploded"),
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MailboxProvisioner for FakeProvisioner {
    async fn create(&self, email: &str, _password: &str) -> ProvisionResult<()> {
        self.injected().await?;
        self.mailboxes.lock().unwrap().insert(email.to_string(), true);
        self.record(format!("create:{}", email));
        Ok(())
    }

    async fn set_active(&self, email: &str, active: bool) -> ProvisionResult<()> {
        self.injected().await?;
        if !active && self.refuse_deactivation.lock().unwrap().contains(email) {
            return Err(ProvisionError::Rejected(format!("cannot edit {}", email)));
        }
        self.mailboxes.lock().unwrap().insert(email.to_string(), active);
        self.record(format!("set_active:{}:{}", email, active));
        Ok(())
    }

    async fn set_password(&self, email: &str, _password: &str) -> ProvisionResult<()> {
        self.injected().await?;
        self.record(format!("set_password:{}", email));
        Ok(())
    }
}

/// Store, fakes and clock wired the way the server wires them
pub(crate) struct TestHarness {
    pub config: ServerConfig,
    pub pool: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub identity: Arc<FakeIdentityProvider>,
    pub provisioner: Arc<FakeProvisioner>,
    pub clock: Arc<FixedClock>,
    pub sessions: Arc<SessionManager>,
}

impl TestHarness {
    pub const PASSWORD: &'static str = "correct-horse-battery";

    pub async fn new() -> Self {
        let config = ServerConfig::for_tests();
        let pool = memory_pool().await;
        let store = Arc::new(SqliteStore::new(
            pool.clone(),
            MailboxPolicy {
                edu_domain: config.mailbox.edu_domain.clone(),
                term: chrono::Duration::days(config.mailbox.term_days),
            },
        ));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 9, 1, 9, 0, 0).unwrap(),
        ));
        let sessions = Arc::new(SessionManager::new(
            &config.authentication.session_secret,
            chrono::Duration::hours(config.authentication.admin_session_ttl_hours),
            chrono::Duration::days(config.authentication.user_session_ttl_days),
            clock.clone(),
        ));

        Self {
            config,
            pool,
            store,
            identity: Arc::new(FakeIdentityProvider::default()),
            provisioner: Arc::new(FakeProvisioner::default()),
            clock,
            sessions,
        }
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn input(&self, code: &str, email: &str, username: &str) -> RedeemInput {
        RedeemInput {
            activation_code: code.to_string(),
            personal_email: email.to_string(),
            edu_username: username.to_string(),
            password: Self::PASSWORD.to_string(),
        }
    }

    pub fn saga(&self) -> RedemptionSaga {
        let mut settings = SagaSettings::from_config(&self.config.mailbox);
        settings.provision_timeout = Duration::from_millis(100);

        RedemptionSaga::new(
            self.store.clone(),
            self.identity.clone(),
            self.provisioner.clone(),
            self.sessions.clone(),
            self.clock.clone(),
            settings,
        )
    }

    pub fn gate(&self) -> SessionModeGate {
        SessionModeGate::new(
            self.store.clone(),
            self.identity.clone(),
            self.sessions.clone(),
            self.clock.clone(),
        )
    }

    pub fn sweep(&self) -> ExpirySweep {
        ExpirySweep::new(
            self.store.clone(),
            self.provisioner.clone(),
            self.clock.clone(),
            Duration::from_millis(100),
        )
    }

    pub fn context(&self) -> AppContext {
        AppContext::from_parts(
            self.config.clone(),
            self.pool.clone(),
            self.store.clone(),
            self.identity.clone(),
            self.provisioner.clone(),
            self.clock.clone(),
        )
    }

    pub fn user_session(&self, identity_id: &str, mode: SessionMode) -> UserSession {
        let now = self.clock.now().timestamp();
        UserSession {
            identity_id: identity_id.to_string(),
            mode,
            issued_at: now,
            expires_at: now + 3600,
        }
    }

    pub async fn seed_codes(&self, codes: &[&str]) {
        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        self.store.insert_codes(&codes, None, self.clock.now()).await.unwrap();
    }

    /// Redeem through the store only, without identity or provisioner
    pub async fn redeem_directly(&self, code: &str, identity_id: &str, username: &str) {
        let params = RedeemParams {
            code: code.to_string(),
            identity_id: identity_id.to_string(),
            personal_email: format!("{}@example.org", identity_id),
            edu_username: username.to_string(),
        };
        self.store.redeem_code(&params, self.clock.now()).await.unwrap();
    }

    pub async fn code_status(&self, code: &str) -> Option<CodeStatus> {
        self.store.get_code(code).await.unwrap().map(|c| c.status)
    }

    pub async fn audit_actions(&self) -> Vec<String> {
        sqlx::query_scalar("SELECT action FROM audit_log ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .unwrap()
    }

    pub async fn mailbox_rows(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM mailbox")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub async fn suspend(&self, identity_id: &str, reason: &str) {
        sqlx::query("UPDATE account SET is_suspended = 1, suspended_reason = ?1 WHERE identity_id = ?2")
            .bind(reason)
            .bind(identity_id)
            .execute(&self.pool)
            .await
            .unwrap();
    }
}
