/// Database models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Activation code status. `used` and `revoked` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CodeStatus {
    Unused,
    Used,
    Revoked,
}

impl CodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeStatus::Unused => "unused",
            CodeStatus::Used => "used",
            CodeStatus::Revoked => "revoked",
        }
    }
}

impl std::str::FromStr for CodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unused" => Ok(CodeStatus::Unused),
            "used" => Ok(CodeStatus::Used),
            "revoked" => Ok(CodeStatus::Revoked),
            other => Err(format!("Invalid code status: {}", other)),
        }
    }
}

/// Mailbox status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MailboxStatus {
    Active,
    Expired,
}

impl MailboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailboxStatus::Active => "active",
            MailboxStatus::Expired => "expired",
        }
    }
}

/// Application-side mirror of an identity
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub identity_id: String,
    pub personal_email: String,
    pub is_suspended: bool,
    pub suspended_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Activation code record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ActivationCode {
    pub code: String,
    pub status: CodeStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by_identity_id: Option<String>,
}

/// Logical mailbox record; the physical mailbox lives on the provisioner
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Mailbox {
    pub identity_id: String,
    pub edu_email: String,
    pub expires_at: DateTime<Utc>,
    pub status: MailboxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mailbox {
    /// Live usability check: active and not past its term
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == MailboxStatus::Active && self.expires_at > now
    }
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub subject: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(actor: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            subject: None,
            details: None,
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_mailbox_usable_requires_active_and_future_expiry() {
        let now = Utc::now();
        let mut mailbox = Mailbox {
            identity_id: "id".to_string(),
            edu_email: "a@campus.edu".to_string(),
            expires_at: now + Duration::days(1),
            status: MailboxStatus::Active,
            created_at: now,
            updated_at: now,
        };
        assert!(mailbox.is_usable_at(now));

        // expiry instant itself is no longer usable
        assert!(!mailbox.is_usable_at(now + Duration::days(1)));

        mailbox.status = MailboxStatus::Expired;
        assert!(!mailbox.is_usable_at(now));
    }

    #[test]
    fn test_code_status_parse() {
        assert_eq!("Revoked".parse::<CodeStatus>().unwrap(), CodeStatus::Revoked);
        assert!("gone".parse::<CodeStatus>().is_err());
    }
}
