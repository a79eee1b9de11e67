use std::time::Duration;

use anyhow::{Context, Result};

/// Process-wide configuration, loaded once at startup and never mutated.
///
/// Mandatory variables missing at startup are a fatal `ConfigurationError` —
/// the process should refuse to start rather than serve with a half-working
/// crypto or signing setup.
#[derive(Clone)]
pub struct AppConfig {
    /// 32 random bytes, base64url-encoded, used to derive the vault's AES-256 key.
    pub encryption_key: String,
    /// Symmetric secret for HS256 access-token signing.
    pub jwt_secret_key: String,
    /// This server's own canonical URL, used as `iss` and for metadata documents.
    pub server_url: String,
    pub database_url: String,

    pub schwab_app_key: Option<String>,
    pub schwab_app_secret: Option<String>,
    pub schwab_callback_url: Option<String>,

    /// Base path under which the protected resource is served, e.g. `/mcp`.
    pub protected_resource_path: String,

    pub janitor_interval: Duration,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub auth_code_ttl: Duration,
    pub upstream_state_ttl: Duration,
}

impl AppConfig {
    /// Loads configuration from the process environment, applying `.env` first
    /// if present. Missing mandatory variables are a hard error — callers
    /// should treat this as fatal and exit non-zero, never panic with a raw
    /// backtrace.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let encryption_key = require_env("ENCRYPTION_KEY")?;
        let jwt_secret_key = require_env("JWT_SECRET_KEY")?;
        let server_url = require_env("SERVER_URL")?.trim_end_matches('/').to_string();
        let database_url = require_env("DATABASE_URL")?;

        let protected_resource_path = std::env::var("PROTECTED_RESOURCE_PATH")
            .unwrap_or_else(|_| "/mcp".to_string());

        let janitor_interval_secs: u64 = std::env::var("JANITOR_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600);

        Ok(Self {
            encryption_key,
            jwt_secret_key,
            server_url,
            database_url,
            schwab_app_key: std::env::var("SCHWAB_APP_KEY").ok(),
            schwab_app_secret: std::env::var("SCHWAB_APP_SECRET").ok(),
            schwab_callback_url: std::env::var("SCHWAB_CALLBACK_URL").ok(),
            protected_resource_path,
            janitor_interval: Duration::from_secs(janitor_interval_secs),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(30 * 24 * 3600),
            auth_code_ttl: Duration::from_secs(10 * 60),
            upstream_state_ttl: Duration::from_secs(10 * 60),
        })
    }

    pub fn protected_resource_url(&self) -> String {
        format!("{}{}/", self.server_url, self.protected_resource_path)
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required environment variable {key}"))
}
