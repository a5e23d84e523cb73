/// GoTrue-style admin API client
use super::{IdentityError, IdentityProvider, IdentityResult};
use crate::{
    config::IdentityConfig,
    error::{PortalError, PortalResult},
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Identity provider backed by a GoTrue-compatible HTTP API
#[derive(Clone)]
pub struct GoTrueIdentityProvider {
    http_client: Client,
    base_url: String,
    service_key: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    user: UserResponse,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl GoTrueIdentityProvider {
    pub fn new(config: &IdentityConfig) -> PortalResult<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("EduHub/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PortalError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.url.clone(),
            service_key: config.service_key.clone(),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn send(&self, builder: RequestBuilder) -> IdentityResult<Response> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .msg
            .or(body.message)
            .or(body.error_description)
            .unwrap_or_else(|| status.to_string());

        if status.is_client_error() {
            Err(IdentityError::Rejected {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(IdentityError::Unavailable(message))
        }
    }
}

#[async_trait]
impl IdentityProvider for GoTrueIdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> IdentityResult<String> {
        let response = self
            .send(
                self.http_client
                    .post(format!("{}/admin/users", self.base_url))
                    .json(&json!({
                        "email": email,
                        "password": password,
                        "email_confirm": true,
                    })),
            )
            .await?;

        let user: UserResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Unavailable(format!("malformed user response: {}", e)))?;

        tracing::info!(identity_id = %user.id, "created identity");
        Ok(user.id)
    }

    async fn set_password(&self, identity_id: &str, password: &str) -> IdentityResult<()> {
        self.send(
            self.http_client
                .put(format!("{}/admin/users/{}", self.base_url, identity_id))
                .json(&json!({ "password": password })),
        )
        .await?;

        Ok(())
    }

    async fn delete_account(&self, identity_id: &str) -> IdentityResult<()> {
        self.send(
            self.http_client
                .delete(format!("{}/admin/users/{}", self.base_url, identity_id)),
        )
        .await?;

        tracing::info!(identity_id, "deleted identity");
        Ok(())
    }

    async fn authenticate(&self, email: &str, password: &str) -> IdentityResult<String> {
        let response = self
            .send(
                self.http_client
                    .post(format!("{}/token?grant_type=password", self.base_url))
                    .json(&json!({ "email": email, "password": password })),
            )
            .await?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Unavailable(format!("malformed token response: {}", e)))?;

        Ok(token.user.id)
    }
}
