/// Signed session tokens
///
/// Two independent principal kinds share one signing secret but are kept
/// apart by audience. Verification never errors: anything that is not a
/// valid, unexpired token of the requested kind is `None`. Expiry is checked
/// against the injected clock, not the system time.
use crate::{
    clock::Clock,
    error::{PortalError, PortalResult},
};
use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

const USER_AUDIENCE: &str = "eduhub:user";
const ADMIN_AUDIENCE: &str = "eduhub:admin";

/// Privilege level asserted by an end-user session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Personal,
    Edu,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Personal => "personal",
            SessionMode::Edu => "edu",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UserClaims {
    sub: String,
    mode: SessionMode,
    iat: i64,
    exp: i64,
    aud: String,
    jti: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AdminClaims {
    sub: String,
    iat: i64,
    exp: i64,
    aud: String,
    jti: String,
}

/// Verified end-user session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    pub identity_id: String,
    pub mode: SessionMode,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Verified administrator session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSession {
    pub admin_email: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Issues and verifies session tokens
pub struct SessionManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    admin_ttl: Duration,
    user_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(secret: &str, admin_ttl: Duration, user_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            admin_ttl,
            user_ttl,
            clock,
        }
    }

    /// Issue an end-user token for the given mode
    pub fn issue_user(&self, identity_id: &str, mode: SessionMode) -> PortalResult<String> {
        let now = self.clock.now();
        let claims = UserClaims {
            sub: identity_id.to_string(),
            mode,
            iat: now.timestamp(),
            exp: (now + self.user_ttl).timestamp(),
            aud: USER_AUDIENCE.to_string(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| PortalError::Internal(format!("Failed to sign session: {}", e)))
    }

    /// Issue an administrator token
    pub fn issue_admin(&self, admin_email: &str) -> PortalResult<String> {
        let now = self.clock.now();
        let claims = AdminClaims {
            sub: admin_email.to_lowercase(),
            iat: now.timestamp(),
            exp: (now + self.admin_ttl).timestamp(),
            aud: ADMIN_AUDIENCE.to_string(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| PortalError::Internal(format!("Failed to sign session: {}", e)))
    }

    fn validation(&self, audience: &str) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is judged against the injected clock below
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        validation.set_audience(&[audience]);
        validation
    }

    /// Verify an end-user token
    pub fn verify_user(&self, token: &str) -> Option<UserSession> {
        let data = decode::<UserClaims>(token, &self.decoding_key, &self.validation(USER_AUDIENCE))
            .map_err(|e| tracing::debug!("user session rejected: {}", e))
            .ok()?;

        let claims = data.claims;
        if claims.exp <= self.clock.now().timestamp() {
            tracing::debug!(identity_id = %claims.sub, "user session expired");
            return None;
        }

        Some(UserSession {
            identity_id: claims.sub,
            mode: claims.mode,
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }

    /// Verify an administrator token
    pub fn verify_admin(&self, token: &str) -> Option<AdminSession> {
        let data = decode::<AdminClaims>(token, &self.decoding_key, &self.validation(ADMIN_AUDIENCE))
            .map_err(|e| tracing::debug!("admin session rejected: {}", e))
            .ok()?;

        let claims = data.claims;
        if claims.exp <= self.clock.now().timestamp() {
            return None;
        }

        Some(AdminSession {
            admin_email: claims.sub,
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }
}
