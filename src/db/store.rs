/// Relational store: accounts, activation codes, mailboxes and the audit log
///
/// `redeem_code` is the only place double redemption is prevented. It runs a
/// conditional `UPDATE ... WHERE status = 'unused'` inside a transaction and
/// treats zero affected rows as an ineligible code.
use super::models::{Account, ActivationCode, AuditEntry, CodeStatus, Mailbox, MailboxStatus};
use crate::error::PortalError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use thiserror::Error;

/// Store-level failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("activation code is invalid, used or revoked")]
    CodeNotEligible,

    #[error("edu username already taken: {0}")]
    UsernameTaken(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for PortalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CodeNotEligible => {
                PortalError::RedeemFailed("Activation code is invalid or already used".to_string())
            }
            StoreError::UsernameTaken(email) => {
                PortalError::RedeemFailed(format!("{} is already taken", email))
            }
            StoreError::Database(e) => PortalError::Database(e),
        }
    }
}

/// Input of the atomic redemption procedure
#[derive(Debug, Clone)]
pub struct RedeemParams {
    pub code: String,
    pub identity_id: String,
    pub personal_email: String,
    pub edu_username: String,
}

/// Output of the atomic redemption procedure
#[derive(Debug, Clone)]
pub struct Redemption {
    pub identity_id: String,
    pub edu_email: String,
    pub expires_at: DateTime<Utc>,
    /// Mailbox row as it was before this redemption, `None` when newly created
    pub previous_mailbox: Option<Mailbox>,
}

impl Redemption {
    pub fn is_renewal(&self) -> bool {
        self.previous_mailbox.is_some()
    }
}

/// Result of a batch revoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RevokeOutcome {
    pub updated: u64,
    pub skipped: u64,
}

/// Relational store contract consumed by the saga, gate, sweep and admin surface
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    async fn get_account(&self, identity_id: &str) -> StoreResult<Option<Account>>;

    async fn upsert_account(
        &self,
        identity_id: &str,
        personal_email: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn delete_account(&self, identity_id: &str) -> StoreResult<()>;

    /// Atomically flip an `unused` code to `used` and create or extend the mailbox row
    async fn redeem_code(&self, params: &RedeemParams, now: DateTime<Utc>)
        -> StoreResult<Redemption>;

    /// Put a code flipped by a failed redemption back to `unused`
    async fn revert_code(&self, code: &str) -> StoreResult<()>;

    /// Restore a mailbox row to its pre-redemption snapshot, deleting it if there was none
    async fn restore_mailbox(
        &self,
        identity_id: &str,
        previous: Option<&Mailbox>,
    ) -> StoreResult<()>;

    async fn get_mailbox(&self, identity_id: &str) -> StoreResult<Option<Mailbox>>;

    async fn find_mailbox_by_edu_email(&self, edu_email: &str) -> StoreResult<Option<Mailbox>>;

    async fn set_mailbox_status(
        &self,
        identity_id: &str,
        status: MailboxStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Mailboxes past their term that are not yet marked expired
    async fn list_expirable_mailboxes(&self, now: DateTime<Utc>) -> StoreResult<Vec<Mailbox>>;

    async fn insert_codes(
        &self,
        codes: &[String],
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn get_code(&self, code: &str) -> StoreResult<Option<ActivationCode>>;

    async fn list_codes(
        &self,
        status: Option<CodeStatus>,
        limit: i64,
    ) -> StoreResult<Vec<ActivationCode>>;

    /// Revoke `unused` codes; everything else is counted as skipped
    async fn revoke_codes(&self, codes: &[String]) -> StoreResult<RevokeOutcome>;

    async fn record_audit(&self, entry: &AuditEntry, now: DateTime<Utc>) -> StoreResult<()>;
}

const ACCOUNT_COLUMNS: &str =
    "identity_id, personal_email, is_suspended, suspended_reason, created_at, updated_at";
const CODE_COLUMNS: &str = "code, status, note, created_at, used_at, used_by_identity_id";
const MAILBOX_COLUMNS: &str = "identity_id, edu_email, expires_at, status, created_at, updated_at";

/// Mailbox parameters computed by the redemption procedure
#[derive(Debug, Clone)]
pub struct MailboxPolicy {
    pub edu_domain: String,
    pub term: Duration,
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
    policy: MailboxPolicy,
}

impl SqliteStore {
    pub fn new(db: SqlitePool, policy: MailboxPolicy) -> Self {
        Self { db, policy }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }
}

#[async_trait]
impl RelationalStore for SqliteStore {
    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM account WHERE personal_email = ?1 COLLATE NOCASE",
            ACCOUNT_COLUMNS
        ))
        .bind(email.trim())
        .fetch_optional(&self.db)
        .await?;

        Ok(account)
    }

    async fn get_account(&self, identity_id: &str) -> StoreResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM account WHERE identity_id = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(identity_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(account)
    }

    async fn upsert_account(
        &self,
        identity_id: &str,
        personal_email: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO account (identity_id, personal_email, is_suspended, created_at, updated_at)
            VALUES (?1, ?2, 0, ?3, ?3)
            ON CONFLICT (identity_id) DO UPDATE
            SET personal_email = excluded.personal_email, updated_at = excluded.updated_at
            "#,
        )
        .bind(identity_id)
        .bind(personal_email)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn delete_account(&self, identity_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM account WHERE identity_id = ?1")
            .bind(identity_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn redeem_code(
        &self,
        params: &RedeemParams,
        now: DateTime<Utc>,
    ) -> StoreResult<Redemption> {
        let mut tx = self.db.begin().await?;

        // The status guard is the redemption lock: a concurrent redeemer of the
        // same code either waits for this write or sees zero affected rows.
        let flipped = sqlx::query(
            r#"
            UPDATE activation_code
            SET status = 'used', used_at = ?1, used_by_identity_id = ?2
            WHERE code = ?3 AND status = 'unused'
            "#,
        )
        .bind(now)
        .bind(&params.identity_id)
        .bind(&params.code)
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() != 1 {
            return Err(StoreError::CodeNotEligible);
        }

        sqlx::query(
            r#"
            INSERT INTO account (identity_id, personal_email, is_suspended, created_at, updated_at)
            VALUES (?1, ?2, 0, ?3, ?3)
            ON CONFLICT (identity_id) DO NOTHING
            "#,
        )
        .bind(&params.identity_id)
        .bind(&params.personal_email)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let previous = sqlx::query_as::<_, Mailbox>(&format!(
            "SELECT {} FROM mailbox WHERE identity_id = ?1",
            MAILBOX_COLUMNS
        ))
        .bind(&params.identity_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (edu_email, expires_at) = match &previous {
            Some(existing) => {
                let base = existing.expires_at.max(now);
                let expires_at = base + self.policy.term;

                sqlx::query(
                    r#"
                    UPDATE mailbox SET expires_at = ?1, status = 'active', updated_at = ?2
                    WHERE identity_id = ?3
                    "#,
                )
                .bind(expires_at)
                .bind(now)
                .bind(&params.identity_id)
                .execute(&mut *tx)
                .await?;

                (existing.edu_email.clone(), expires_at)
            }
            None => {
                let edu_email = format!(
                    "{}@{}",
                    params.edu_username.to_lowercase(),
                    self.policy.edu_domain
                );
                let expires_at = now + self.policy.term;

                let taken: Option<String> = sqlx::query_scalar(
                    "SELECT identity_id FROM mailbox WHERE edu_email = ?1 COLLATE NOCASE",
                )
                .bind(&edu_email)
                .fetch_optional(&mut *tx)
                .await?;

                if taken.is_some() {
                    return Err(StoreError::UsernameTaken(edu_email));
                }

                sqlx::query(
                    r#"
                    INSERT INTO mailbox (identity_id, edu_email, expires_at, status, created_at, updated_at)
                    VALUES (?1, ?2, ?3, 'active', ?4, ?4)
                    "#,
                )
                .bind(&params.identity_id)
                .bind(&edu_email)
                .bind(expires_at)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                (edu_email, expires_at)
            }
        };

        tx.commit().await?;

        Ok(Redemption {
            identity_id: params.identity_id.clone(),
            edu_email,
            expires_at,
            previous_mailbox: previous,
        })
    }

    async fn revert_code(&self, code: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE activation_code
            SET status = 'unused', used_at = NULL, used_by_identity_id = NULL
            WHERE code = ?1 AND status = 'used'
            "#,
        )
        .bind(code)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn restore_mailbox(
        &self,
        identity_id: &str,
        previous: Option<&Mailbox>,
    ) -> StoreResult<()> {
        match previous {
            Some(snapshot) => {
                sqlx::query(
                    r#"
                    UPDATE mailbox SET edu_email = ?1, expires_at = ?2, status = ?3, updated_at = ?4
                    WHERE identity_id = ?5
                    "#,
                )
                .bind(&snapshot.edu_email)
                .bind(snapshot.expires_at)
                .bind(snapshot.status)
                .bind(snapshot.updated_at)
                .bind(identity_id)
                .execute(&self.db)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM mailbox WHERE identity_id = ?1")
                    .bind(identity_id)
                    .execute(&self.db)
                    .await?;
            }
        }

        Ok(())
    }

    async fn get_mailbox(&self, identity_id: &str) -> StoreResult<Option<Mailbox>> {
        let mailbox = sqlx::query_as::<_, Mailbox>(&format!(
            "SELECT {} FROM mailbox WHERE identity_id = ?1",
            MAILBOX_COLUMNS
        ))
        .bind(identity_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(mailbox)
    }

    async fn find_mailbox_by_edu_email(&self, edu_email: &str) -> StoreResult<Option<Mailbox>> {
        let mailbox = sqlx::query_as::<_, Mailbox>(&format!(
            "SELECT {} FROM mailbox WHERE edu_email = ?1 COLLATE NOCASE",
            MAILBOX_COLUMNS
        ))
        .bind(edu_email.trim())
        .fetch_optional(&self.db)
        .await?;

        Ok(mailbox)
    }

    async fn set_mailbox_status(
        &self,
        identity_id: &str,
        status: MailboxStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE mailbox SET status = ?1, updated_at = ?2 WHERE identity_id = ?3")
            .bind(status)
            .bind(now)
            .bind(identity_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn list_expirable_mailboxes(&self, now: DateTime<Utc>) -> StoreResult<Vec<Mailbox>> {
        let mailboxes = sqlx::query_as::<_, Mailbox>(&format!(
            "SELECT {} FROM mailbox WHERE status != 'expired' AND expires_at < ?1 ORDER BY expires_at",
            MAILBOX_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.db)
        .await?;

        Ok(mailboxes)
    }

    async fn insert_codes(
        &self,
        codes: &[String],
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tx = self.db.begin().await?;

        for code in codes {
            sqlx::query(
                r#"
                INSERT INTO activation_code (code, status, note, created_at)
                VALUES (?1, 'unused', ?2, ?3)
                "#,
            )
            .bind(code)
            .bind(note)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_code(&self, code: &str) -> StoreResult<Option<ActivationCode>> {
        let code = sqlx::query_as::<_, ActivationCode>(&format!(
            "SELECT {} FROM activation_code WHERE code = ?1",
            CODE_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.db)
        .await?;

        Ok(code)
    }

    async fn list_codes(
        &self,
        status: Option<CodeStatus>,
        limit: i64,
    ) -> StoreResult<Vec<ActivationCode>> {
        let codes = match status {
            Some(status) => {
                sqlx::query_as::<_, ActivationCode>(&format!(
                    "SELECT {} FROM activation_code WHERE status = ?1 ORDER BY created_at DESC, code LIMIT ?2",
                    CODE_COLUMNS
                ))
                .bind(status)
                .bind(limit)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, ActivationCode>(&format!(
                    "SELECT {} FROM activation_code ORDER BY created_at DESC, code LIMIT ?1",
                    CODE_COLUMNS
                ))
                .bind(limit)
                .fetch_all(&self.db)
                .await?
            }
        };

        Ok(codes)
    }

    async fn revoke_codes(&self, codes: &[String]) -> StoreResult<RevokeOutcome> {
        let mut tx = self.db.begin().await?;
        let mut updated = 0u64;

        for code in codes {
            let result = sqlx::query(
                "UPDATE activation_code SET status = 'revoked' WHERE code = ?1 AND status = 'unused'",
            )
            .bind(code)
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected();
        }

        tx.commit().await?;

        Ok(RevokeOutcome {
            updated,
            skipped: codes.len() as u64 - updated,
        })
    }

    async fn record_audit(&self, entry: &AuditEntry, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (actor, action, subject, details, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.subject)
        .bind(entry.details.as_ref().map(|d| d.to_string()))
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
