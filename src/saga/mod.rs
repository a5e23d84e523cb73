/// Activation code redemption
///
/// Turns an activation code plus credentials into a provisioned mailbox
/// across three systems that share no transaction: the identity provider,
/// the relational store and the mailbox provisioner. Forward steps push
/// their inverse onto a [`Compensation`] stack; only a provisioning failure
/// unwinds it. Double redemption is prevented solely by the store's
/// conditional update, so the saga holds no lock and can be retried.

pub mod compensation;

pub use compensation::{CleanupReport, CompensatingAction, Compensation};

use crate::{
    admin::codes::normalize_code,
    clock::Clock,
    config::MailboxConfig,
    db::{AuditEntry, RedeemParams, Redemption, RelationalStore},
    error::{PortalError, PortalResult},
    identity::IdentityProvider,
    metrics::{COMPENSATIONS_TOTAL, REDEMPTIONS_TOTAL},
    provision::{with_timeout, MailboxProvisioner, ProvisionError, ProvisionResult},
    session::{SessionManager, SessionMode},
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

/// Redemption request as submitted by the user
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RedeemInput {
    #[validate(length(min = 1, max = 64, message = "Activation code is required"))]
    pub activation_code: String,
    #[validate(email(message = "Personal email is not a valid address"))]
    pub personal_email: String,
    #[validate(length(min = 3, max = 32, message = "Username must be 3 to 32 characters"))]
    pub edu_username: String,
    #[validate(length(min = 8, max = 128, message = "Password must be 8 to 128 characters"))]
    pub password: String,
}

/// Successful redemption
#[derive(Debug, Clone, Serialize)]
pub struct RedeemReceipt {
    pub personal_email: String,
    pub edu_email: String,
    pub expires_at: DateTime<Utc>,
    pub password: String,
    pub webmail: String,
    #[serde(skip)]
    pub identity_id: String,
    #[serde(skip)]
    pub session_token: String,
    #[serde(skip)]
    pub renewed: bool,
}

/// Static parameters of the saga
#[derive(Debug, Clone)]
pub struct SagaSettings {
    pub edu_domain: String,
    pub webmail_url: String,
    pub provision_timeout: Duration,
}

impl SagaSettings {
    pub fn from_config(config: &MailboxConfig) -> Self {
        Self {
            edu_domain: config.edu_domain.to_lowercase(),
            webmail_url: config.webmail_url.clone(),
            provision_timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Lowercased, trimmed personal email
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Whether an address lives on the institutional domain or one of its subdomains
pub fn is_blocked_domain(email: &str, edu_domain: &str) -> bool {
    let domain = edu_domain.trim().to_lowercase();
    if domain.is_empty() {
        return false;
    }
    email.ends_with(&format!("@{}", domain)) || email.ends_with(&format!(".{}", domain))
}

/// Local part rules for institutional addresses
pub fn validate_username(username: &str) -> PortalResult<()> {
    let mut chars = username.chars();
    let starts_ok = chars.next().map_or(false, |c| c.is_ascii_alphanumeric());
    let rest_ok = username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));

    if !starts_ok || !rest_ok {
        return Err(PortalError::Validation(
            "Username may only contain a-z, 0-9, '.', '_' and '-' and must start with a letter or digit"
                .to_string(),
        ));
    }
    Ok(())
}

fn first_validation_message(errors: &validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| "Invalid redemption request".to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Redemption orchestrator
pub struct RedemptionSaga {
    store: Arc<dyn RelationalStore>,
    identity: Arc<dyn IdentityProvider>,
    provisioner: Arc<dyn MailboxProvisioner>,
    sessions: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
    settings: SagaSettings,
}

impl RedemptionSaga {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        identity: Arc<dyn IdentityProvider>,
        provisioner: Arc<dyn MailboxProvisioner>,
        sessions: Arc<SessionManager>,
        clock: Arc<dyn Clock>,
        settings: SagaSettings,
    ) -> Self {
        Self {
            store,
            identity,
            provisioner,
            sessions,
            clock,
            settings,
        }
    }

    /// Redeem an activation code. A panic while provisioning compensates like any
    /// other provisioning failure; a panic elsewhere becomes `Internal`.
    pub async fn redeem(&self, input: RedeemInput) -> PortalResult<RedeemReceipt> {
        let result = AssertUnwindSafe(self.run(input))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let detail = panic_message(panic.as_ref());
                tracing::error!("redemption panicked: {}", detail);
                Err(PortalError::Internal(format!("redemption aborted: {}", detail)))
            });

        let outcome = match &result {
            Ok(receipt) if receipt.renewed => "renewed",
            Ok(_) => "created",
            Err(PortalError::Validation(_)) | Err(PortalError::DomainBlocked(_)) => "invalid",
            Err(PortalError::RedeemFailed(_)) => "ineligible",
            Err(PortalError::ProvisioningFailed { .. }) => "provisioning_failed",
            Err(_) => "error",
        };
        REDEMPTIONS_TOTAL.with_label_values(&[outcome]).inc();

        result
    }

    async fn run(&self, input: RedeemInput) -> PortalResult<RedeemReceipt> {
        let RedeemInput {
            activation_code,
            personal_email,
            edu_username,
            password,
        } = input;

        let request = RedeemInput {
            activation_code: normalize_code(&activation_code),
            personal_email: normalize_email(&personal_email),
            edu_username: edu_username.trim().to_lowercase(),
            password,
        };

        request
            .validate()
            .map_err(|e| PortalError::Validation(first_validation_message(&e)))?;
        validate_username(&request.edu_username)?;

        if is_blocked_domain(&request.personal_email, &self.settings.edu_domain) {
            return Err(PortalError::DomainBlocked(format!(
                "Personal email may not be an @{} address",
                self.settings.edu_domain
            )));
        }

        let email = request.personal_email.as_str();
        let mut compensation = Compensation::new();

        // Resolve or create the identity
        let (identity_id, created_new_identity) = match self.store.find_account_by_email(email).await? {
            Some(account) => {
                if account.is_suspended {
                    return Err(PortalError::Forbidden(
                        account
                            .suspended_reason
                            .unwrap_or_else(|| "Account suspended".to_string()),
                    ));
                }
                self.identity
                    .set_password(&account.identity_id, &request.password)
                    .await?;
                (account.identity_id, false)
            }
            None => {
                let identity_id = self.identity.create_account(email, &request.password).await?;
                compensation.push(CompensatingAction::DeleteIdentity {
                    identity_id: identity_id.clone(),
                });

                if let Err(e) = self
                    .store
                    .upsert_account(&identity_id, email, self.clock.now())
                    .await
                {
                    tracing::warn!(identity_id = %identity_id, "identity created but account row failed");
                    return Err(e.into());
                }
                compensation.push(CompensatingAction::DeleteAccountRow {
                    identity_id: identity_id.clone(),
                });
                (identity_id, true)
            }
        };
        tracing::debug!(identity_id = %identity_id, created_new_identity, step = "identity", "identity resolved");

        // Atomic code redemption
        let params = RedeemParams {
            code: request.activation_code.clone(),
            identity_id: identity_id.clone(),
            personal_email: email.to_string(),
            edu_username: request.edu_username.clone(),
        };
        let redemption = self.store.redeem_code(&params, self.clock.now()).await?;
        compensation.push(CompensatingAction::RevertCode {
            code: params.code.clone(),
        });
        compensation.push(CompensatingAction::RestoreMailbox {
            identity_id: identity_id.clone(),
            previous: redemption.previous_mailbox.clone(),
        });
        tracing::debug!(
            identity_id = %identity_id,
            edu_email = %redemption.edu_email,
            renewal = redemption.is_renewal(),
            step = "redeem",
            "code redeemed"
        );

        // Materialize the mailbox
        let provisioned = AssertUnwindSafe(self.provision(&redemption, &request.password))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ProvisionError::Aborted(panic_message(panic.as_ref()))));
        if let Err(e) = provisioned {
            tracing::warn!(
                identity_id = %identity_id,
                edu_email = %redemption.edu_email,
                step = "provision",
                "provisioning failed, compensating: {}",
                e
            );

            let planned = compensation.planned();
            let report = compensation
                .unwind(self.store.as_ref(), self.identity.as_ref())
                .await;

            COMPENSATIONS_TOTAL
                .with_label_values(&[if report.is_clean() { "clean" } else { "partial" }])
                .inc();
            self.audit(
                AuditEntry::new(email, "redeem.compensated")
                    .subject(params.code.clone())
                    .details(json!({
                        "error": e.to_string(),
                        "planned": planned,
                        "completed": report.completed,
                        "failures": report.failures,
                        "created_new_identity": created_new_identity,
                    })),
            )
            .await;

            return Err(PortalError::ProvisioningFailed {
                detail: e.to_string(),
                cleanup_error: report.summary(),
            });
        }

        // Final account state; the mailbox already exists, so this is not fatal
        if let Err(e) = self
            .store
            .upsert_account(&identity_id, email, self.clock.now())
            .await
        {
            tracing::warn!(identity_id = %identity_id, "failed to refresh account after redemption: {}", e);
        }

        let session_token = self.sessions.issue_user(&identity_id, SessionMode::Personal)?;

        tracing::info!(
            identity_id = %identity_id,
            edu_email = %redemption.edu_email,
            renewal = redemption.is_renewal(),
            "activation code redeemed"
        );
        self.audit(
            AuditEntry::new(email, if redemption.is_renewal() { "redeem.renew" } else { "redeem.create" })
                .subject(params.code.clone())
                .details(json!({
                    "edu_email": redemption.edu_email,
                    "expires_at": redemption.expires_at,
                })),
        )
        .await;

        Ok(RedeemReceipt {
            personal_email: email.to_string(),
            edu_email: redemption.edu_email.clone(),
            expires_at: redemption.expires_at,
            password: request.password,
            webmail: self.settings.webmail_url.clone(),
            identity_id,
            session_token,
            renewed: redemption.is_renewal(),
        })
    }

    async fn provision(&self, redemption: &Redemption, password: &str) -> ProvisionResult<()> {
        let edu_email = redemption.edu_email.as_str();
        let limit = self.settings.provision_timeout;

        if redemption.is_renewal() {
            with_timeout(limit, self.provisioner.set_password(edu_email, password)).await?;
            with_timeout(limit, self.provisioner.set_active(edu_email, true)).await
        } else {
            with_timeout(limit, self.provisioner.create(edu_email, password)).await
        }
    }

    async fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.store.record_audit(&entry, self.clock.now()).await {
            tracing::warn!(action = %entry.action, "failed to write audit record: {}", e);
        }
    }
}
