/// Mailcow-compatible provisioning API client
use super::{with_timeout, MailboxProvisioner, ProvisionError, ProvisionResult};
use crate::{
    config::MailboxConfig,
    error::{PortalError, PortalResult},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// One entry of a mailcow API answer
#[derive(Debug, Clone, Deserialize)]
struct Reply {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    msg: Value,
}

/// Mailcow answers with either a list of replies or a single one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Replies {
    Many(Vec<Reply>),
    One(Reply),
}

impl Replies {
    fn into_vec(self) -> Vec<Reply> {
        match self {
            Replies::Many(replies) => replies,
            Replies::One(reply) => vec![reply],
        }
    }
}

/// Turn a reply list into a narrow result: any `danger`/`error` entry is a rejection
fn interpret(replies: Vec<Reply>) -> ProvisionResult<()> {
    let failures: Vec<String> = replies
        .iter()
        .filter(|r| r.kind == "danger" || r.kind == "error")
        .map(|r| match &r.msg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ProvisionError::Rejected(failures.join("; ")))
    }
}

/// Provisioner for a mailcow mail server
#[derive(Clone)]
pub struct MailcowProvisioner {
    http_client: Client,
    base_url: String,
    api_key: String,
    quota_mb: u64,
    timeout: Duration,
}

impl MailcowProvisioner {
    pub fn new(config: &MailboxConfig) -> PortalResult<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("EduHub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PortalError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            quota_mb: config.quota_mb,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn post(&self, path: &str, body: Value) -> ProvisionResult<()> {
        let response = self
            .http_client
            .post(format!("{}{}", self.base_url, path))
            .header("X-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProvisionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Rejected(format!("HTTP {}: {}", status, text)));
        }

        let replies: Replies = response
            .json()
            .await
            .map_err(|e| ProvisionError::Rejected(format!("malformed response: {}", e)))?;

        interpret(replies.into_vec())
    }

    async fn edit(&self, email: &str, attr: Value) -> ProvisionResult<()> {
        with_timeout(
            self.timeout,
            self.post("/api/v1/edit/mailbox", json!({ "items": [email], "attr": attr })),
        )
        .await
    }
}

fn split_address(email: &str) -> ProvisionResult<(&str, &str)> {
    email
        .split_once('@')
        .filter(|(local, domain)| !local.is_empty() && !domain.is_empty())
        .ok_or_else(|| ProvisionError::Rejected(format!("not a mailbox address: {}", email)))
}

#[async_trait]
impl MailboxProvisioner for MailcowProvisioner {
    async fn create(&self, email: &str, password: &str) -> ProvisionResult<()> {
        let (local_part, domain) = split_address(email)?;

        let body = json!({
            "local_part": local_part,
            "domain": domain,
            "name": local_part,
            "password": password,
            "password2": password,
            "quota": self.quota_mb,
            "active": "1",
            "force_pw_update": "0",
            "tls_enforce_in": "1",
            "tls_enforce_out": "1",
        });

        with_timeout(self.timeout, self.post("/api/v1/add/mailbox", body)).await?;
        tracing::info!(email, "mailbox created");
        Ok(())
    }

    async fn set_active(&self, email: &str, active: bool) -> ProvisionResult<()> {
        let flag = if active { "1" } else { "0" };
        self.edit(email, json!({ "active": flag })).await?;
        tracing::info!(email, active, "mailbox activity changed");
        Ok(())
    }

    async fn set_password(&self, email: &str, password: &str) -> ProvisionResult<()> {
        self.edit(email, json!({ "password": password, "password2": password }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replies(raw: &str) -> Vec<Reply> {
        serde_json::from_str::<Replies>(raw).unwrap().into_vec()
    }

    #[test]
    fn test_success_replies_are_ok() {
        let parsed = replies(r#"[{"type":"success","log":[],"msg":["mailbox_added","a@campus.edu"]}]"#);
        assert!(interpret(parsed).is_ok());
    }

    #[test]
    fn test_danger_reply_is_rejection() {
        let parsed = replies(r#"{"type":"danger","msg":"object_exists"}"#);
        let err = interpret(parsed).unwrap_err();
        assert!(matches!(err, ProvisionError::Rejected(msg) if msg == "object_exists"));
    }

    #[test]
    fn test_address_must_have_both_parts() {
        assert_eq!(split_address("a@campus.edu").unwrap(), ("a", "campus.edu"));
        assert!(split_address("@campus.edu").is_err());
        assert!(split_address("nobody").is_err());
    }
}
