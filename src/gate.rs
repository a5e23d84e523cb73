/// Session mode gate
///
/// End-user sessions are either `personal` or `edu`. Edu access depends on a
/// record the token does not carry (the mailbox row), so every elevation and
/// every edu login re-reads it and checks it against the clock.
use crate::{
    clock::Clock,
    db::{Account, Mailbox, MailboxStatus, RelationalStore},
    error::{PortalError, PortalResult},
    identity::{IdentityError, IdentityProvider},
    metrics::ELEVATIONS_TOTAL,
    saga::normalize_email,
    session::{SessionManager, SessionMode, UserSession},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

const BAD_CREDENTIALS: &str = "Invalid email or password";

/// Successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub identity_id: String,
    pub mode: SessionMode,
    pub token: String,
}

/// Why an elevation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    NoMailbox,
    Expired,
}

impl RefusalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefusalReason::NoMailbox => "none",
            RefusalReason::Expired => "expired",
        }
    }
}

/// Result of a personal to edu transition
#[derive(Debug, Clone)]
pub enum Elevation {
    Granted { token: String, edu_email: String },
    Refused(RefusalReason),
}

/// Mailbox as shown to its owner
#[derive(Debug, Clone, Serialize)]
pub struct MailboxView {
    pub edu_email: String,
    pub expires_at: DateTime<Utc>,
    pub status: MailboxStatus,
}

/// Dashboard data for the signed-in user
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub personal_email: String,
    pub mode: SessionMode,
    pub mailbox: Option<MailboxView>,
}

/// State machine over end-user sessions
pub struct SessionModeGate {
    store: Arc<dyn RelationalStore>,
    identity: Arc<dyn IdentityProvider>,
    sessions: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
}

impl SessionModeGate {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        identity: Arc<dyn IdentityProvider>,
        sessions: Arc<SessionManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            identity,
            sessions,
            clock,
        }
    }

    /// anonymous -> personal | edu
    pub async fn login(&self, email: &str, password: &str, mode: SessionMode) -> PortalResult<LoginOutcome> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(PortalError::Validation("Email and password are required".to_string()));
        }

        let identity_id = match mode {
            SessionMode::Personal => self.login_personal(&email, password).await?,
            SessionMode::Edu => self.login_edu(&email, password).await?,
        };

        let token = self.sessions.issue_user(&identity_id, mode)?;
        tracing::info!(identity_id = %identity_id, mode = mode.as_str(), "user logged in");

        Ok(LoginOutcome {
            identity_id,
            mode,
            token,
        })
    }

    async fn login_personal(&self, email: &str, password: &str) -> PortalResult<String> {
        let identity_id = self.authenticate(email, password).await?;
        let account = self
            .store
            .get_account(&identity_id)
            .await?
            .ok_or_else(|| PortalError::Authentication("No activated account for this email".to_string()))?;
        ensure_not_suspended(&account)?;
        Ok(identity_id)
    }

    async fn login_edu(&self, edu_email: &str, password: &str) -> PortalResult<String> {
        let mailbox = self
            .store
            .find_mailbox_by_edu_email(edu_email)
            .await?
            .ok_or_else(|| PortalError::Authentication(BAD_CREDENTIALS.to_string()))?;
        let account = self
            .store
            .get_account(&mailbox.identity_id)
            .await?
            .ok_or_else(|| PortalError::Authentication(BAD_CREDENTIALS.to_string()))?;

        // credentials live with the personal identity
        let identity_id = self.authenticate(&account.personal_email, password).await?;
        if identity_id != mailbox.identity_id {
            return Err(PortalError::Authentication(BAD_CREDENTIALS.to_string()));
        }
        ensure_not_suspended(&account)?;

        if !self.check_live(&mailbox).await? {
            return Err(PortalError::Forbidden("Mailbox has expired".to_string()));
        }
        Ok(identity_id)
    }

    async fn authenticate(&self, email: &str, password: &str) -> PortalResult<String> {
        match self.identity.authenticate(email, password).await {
            Ok(id) => Ok(id),
            Err(IdentityError::Rejected { status, message }) => {
                tracing::debug!(status, "identity provider refused login: {}", message);
                Err(PortalError::Authentication(BAD_CREDENTIALS.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// personal -> edu, guarded by the live mailbox row
    pub async fn elevate(&self, session: &UserSession) -> PortalResult<Elevation> {
        let account = self
            .store
            .get_account(&session.identity_id)
            .await?
            .ok_or_else(|| PortalError::Authentication("Account no longer exists".to_string()))?;
        ensure_not_suspended(&account)?;

        let elevation = match self.store.get_mailbox(&session.identity_id).await? {
            None => Elevation::Refused(RefusalReason::NoMailbox),
            Some(mailbox) => {
                if self.check_live(&mailbox).await? {
                    let token = self.sessions.issue_user(&session.identity_id, SessionMode::Edu)?;
                    Elevation::Granted {
                        token,
                        edu_email: mailbox.edu_email,
                    }
                } else {
                    Elevation::Refused(RefusalReason::Expired)
                }
            }
        };

        let label = match &elevation {
            Elevation::Granted { .. } => "granted",
            Elevation::Refused(reason) => reason.as_str(),
        };
        ELEVATIONS_TOTAL.with_label_values(&[label]).inc();
        tracing::info!(identity_id = %session.identity_id, result = label, "edu elevation");

        Ok(elevation)
    }

    /// edu -> personal, always allowed
    pub fn return_to_personal(&self, session: &UserSession) -> PortalResult<String> {
        self.sessions.issue_user(&session.identity_id, SessionMode::Personal)
    }

    /// Dashboard data, lazily expiring an overdue mailbox
    pub async fn overview(&self, session: &UserSession) -> PortalResult<Overview> {
        let account = self
            .store
            .get_account(&session.identity_id)
            .await?
            .ok_or_else(|| PortalError::NotFound("Account not found".to_string()))?;

        let mut live = false;
        let mailbox = match self.store.get_mailbox(&session.identity_id).await? {
            Some(mut mailbox) => {
                live = self.check_live(&mailbox).await?;
                if !live {
                    mailbox.status = MailboxStatus::Expired;
                }
                Some(MailboxView {
                    edu_email: mailbox.edu_email,
                    expires_at: mailbox.expires_at,
                    status: mailbox.status,
                })
            }
            None => None,
        };

        // an edu token outliving its mailbox counts as personal
        let mode = match session.mode {
            SessionMode::Edu if !live => SessionMode::Personal,
            mode => mode,
        };

        Ok(Overview {
            personal_email: account.personal_email,
            mode,
            mailbox,
        })
    }

    /// Whether the mailbox is usable now; an active row past its term is marked expired
    async fn check_live(&self, mailbox: &Mailbox) -> PortalResult<bool> {
        let now = self.clock.now();
        if mailbox.is_usable_at(now) {
            return Ok(true);
        }

        if mailbox.status == MailboxStatus::Active {
            self.store
                .set_mailbox_status(&mailbox.identity_id, MailboxStatus::Expired, now)
                .await?;
            tracing::info!(edu_email = %mailbox.edu_email, "mailbox marked expired on access");
        }
        Ok(false)
    }
}

fn ensure_not_suspended(account: &Account) -> PortalResult<()> {
    if account.is_suspended {
        return Err(PortalError::Forbidden(
            account
                .suspended_reason
                .clone()
                .unwrap_or_else(|| "Account suspended".to_string()),
        ));
    }
    Ok(())
}
