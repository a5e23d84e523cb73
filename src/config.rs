/// Configuration management for EduHub
use crate::error::{PortalError, PortalResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub identity: IdentityConfig,
    pub mailbox: MailboxConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Honour X-Forwarded-For when resolving client IPs
    pub trust_proxy: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

/// Session and shared-secret configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub session_secret: String,
    /// Emails allowed into the admin surface
    pub admin_emails: Vec<String>,
    pub admin_session_ttl_hours: i64,
    pub user_session_ttl_days: i64,
    /// Bearer secret for the external expiry trigger
    pub cron_secret: String,
    pub secure_cookies: bool,
}

/// Identity provider (GoTrue-style admin API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub url: String,
    pub service_key: String,
}

/// Mailbox provisioning and policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    pub api_url: String,
    pub api_key: String,
    /// Institutional domain; mailboxes live here and personal emails may not
    pub edu_domain: String,
    pub webmail_url: String,
    pub term_days: i64,
    pub quota_mb: u64,
    pub timeout_secs: u64,
    /// Interval for the in-process expiry sweep, 0 disables it
    pub sweep_interval_secs: u64,
}

/// Fixed-window limit for one route class
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowLimit {
    pub limit: u32,
    pub window_secs: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub global_requests_per_second: u32,
    pub global_burst: u32,
    pub login: WindowLimit,
    pub redeem: WindowLimit,
    pub admin_login: WindowLimit,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn required(name: &str) -> PortalResult<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(PortalError::ConfigMissing(name.to_string())),
    }
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn window(prefix: &str, limit: u32, window_secs: u64) -> WindowLimit {
    WindowLimit {
        limit: parsed(&format!("{}_LIMIT", prefix), limit),
        window_secs: parsed(&format!("{}_WINDOW_SECS", prefix), window_secs),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> PortalResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("EDUHUB_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("EDUHUB_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| PortalError::Validation("Invalid port number".to_string()))?;
        let trust_proxy = parsed("EDUHUB_TRUST_PROXY", false);

        let database_path = env::var("EDUHUB_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/eduhub.sqlite"));

        let session_secret = required("EDUHUB_SESSION_SECRET")?;
        let cron_secret = required("EDUHUB_CRON_SECRET")?;
        let admin_emails = env::var("EDUHUB_ADMIN_EMAILS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect::<Vec<String>>();

        let identity_url = required("EDUHUB_IDENTITY_URL")?;
        let identity_service_key = required("EDUHUB_IDENTITY_SERVICE_KEY")?;

        let mailbox_api_url = required("EDUHUB_MAILBOX_API_URL")?;
        let mailbox_api_key = required("EDUHUB_MAILBOX_API_KEY")?;
        let edu_domain = required("EDUHUB_EDU_DOMAIN")?.to_lowercase();
        let webmail_url = env::var("EDUHUB_WEBMAIL_URL")
            .unwrap_or_else(|_| format!("https://mail.{}/", edu_domain));

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let log_json = env::var("EDUHUB_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                trust_proxy,
            },
            storage: StorageConfig { database_path },
            authentication: AuthConfig {
                session_secret,
                admin_emails,
                admin_session_ttl_hours: parsed("EDUHUB_ADMIN_SESSION_TTL_HOURS", 6),
                user_session_ttl_days: parsed("EDUHUB_USER_SESSION_TTL_DAYS", 7),
                cron_secret,
                secure_cookies: parsed("EDUHUB_SECURE_COOKIES", true),
            },
            identity: IdentityConfig {
                url: identity_url.trim_end_matches('/').to_string(),
                service_key: identity_service_key,
            },
            mailbox: MailboxConfig {
                api_url: mailbox_api_url.trim_end_matches('/').to_string(),
                api_key: mailbox_api_key,
                edu_domain,
                webmail_url,
                term_days: parsed("EDUHUB_MAILBOX_TERM_DAYS", 365),
                quota_mb: parsed("EDUHUB_MAILBOX_QUOTA_MB", 1024),
                timeout_secs: parsed("EDUHUB_MAILBOX_TIMEOUT_SECS", 10),
                sweep_interval_secs: parsed("EDUHUB_SWEEP_INTERVAL_SECS", 3600),
            },
            rate_limit: RateLimitConfig {
                enabled: parsed("EDUHUB_RATE_LIMITS_ENABLED", true),
                global_requests_per_second: parsed("EDUHUB_RATE_LIMIT_GLOBAL_RPS", 200),
                global_burst: parsed("EDUHUB_RATE_LIMIT_GLOBAL_BURST", 400),
                login: window("EDUHUB_RATE_LIMIT_LOGIN", 10, 60),
                redeem: window("EDUHUB_RATE_LIMIT_REDEEM", 5, 300),
                admin_login: window("EDUHUB_RATE_LIMIT_ADMIN_LOGIN", 5, 300),
            },
            logging: LoggingConfig {
                level: log_level,
                json: log_json,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> PortalResult<()> {
        if self.authentication.session_secret.len() < 32 {
            return Err(PortalError::Validation(
                "Session secret must be at least 32 characters".to_string(),
            ));
        }

        if self.authentication.cron_secret.len() < 16 {
            return Err(PortalError::Validation(
                "Cron secret must be at least 16 characters".to_string(),
            ));
        }

        if self.mailbox.edu_domain.is_empty() || !self.mailbox.edu_domain.contains('.') {
            return Err(PortalError::Validation("Edu domain is not a domain".to_string()));
        }

        if self.mailbox.term_days <= 0 {
            return Err(PortalError::Validation("Mailbox term must be positive".to_string()));
        }

        if self.mailbox.timeout_secs == 0 {
            return Err(PortalError::Validation(
                "Provisioning timeout must be positive".to_string(),
            ));
        }

        if self.authentication.admin_session_ttl_hours <= 0
            || self.authentication.user_session_ttl_days <= 0
        {
            return Err(PortalError::Validation("Session TTLs must be positive".to_string()));
        }

        Ok(())
    }

    /// Whether an email is on the admin allowlist
    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.authentication.admin_emails.iter().any(|e| *e == email)
    }

    /// Configuration suitable for tests
    #[cfg(test)]
    pub fn for_tests() -> Self {
        ServerConfig {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 0,
                trust_proxy: true,
            },
            storage: StorageConfig {
                database_path: PathBuf::from(":memory:"),
            },
            authentication: AuthConfig {
                session_secret: "test-session-secret-for-testing-only".to_string(),
                admin_emails: vec!["admin@example.org".to_string()],
                admin_session_ttl_hours: 6,
                user_session_ttl_days: 7,
                cron_secret: "test-cron-secret-value".to_string(),
                secure_cookies: false,
            },
            identity: IdentityConfig {
                url: "http://identity.invalid".to_string(),
                service_key: "service-key".to_string(),
            },
            mailbox: MailboxConfig {
                api_url: "http://mail.invalid".to_string(),
                api_key: "mail-key".to_string(),
                edu_domain: "campus.edu".to_string(),
                webmail_url: "https://mail.campus.edu/".to_string(),
                term_days: 365,
                quota_mb: 1024,
                timeout_secs: 10,
                sweep_interval_secs: 0,
            },
            rate_limit: RateLimitConfig {
                enabled: true,
                global_requests_per_second: 1000,
                global_burst: 1000,
                login: WindowLimit { limit: 10, window_secs: 60 },
                redeem: WindowLimit { limit: 5, window_secs: 300 },
                admin_login: WindowLimit { limit: 5, window_secs: 300 },
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
        }
    }
}
