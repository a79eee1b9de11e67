use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;

use crate::config::AppConfig;

/// Central application state. Clone-friendly — `PgPool`, `Arc` and
/// `reqwest::Client` are all cheap to clone (they wrap an inner handle).
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub http_client: reqwest::Client,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(db: PgPool, config: AppConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");

        Self {
            db,
            config: Arc::new(config),
            http_client,
            start_time: Instant::now(),
        }
    }

    /// Test-only constructor — uses `connect_lazy` so no real DB connection is
    /// opened. Only suitable for tests that don't issue SQL (handler-shape
    /// tests); DB-backed tests use `#[sqlx::test]` instead.
    #[doc(hidden)]
    pub fn new_test(config: AppConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");

        let db = PgPool::connect_lazy("postgres://test@localhost:19999/test").expect("lazy pool");

        Self {
            db,
            config: Arc::new(config),
            http_client,
            start_time: Instant::now(),
        }
    }
}

/// Not `#[cfg(test)]` — integration tests under `tests/` depend on this
/// crate as an ordinary dependency, so a test-only item would be invisible
/// to them. Unit tests in `#[cfg(test)]` modules use it too.
pub fn test_config() -> AppConfig {
    use std::time::Duration;
    AppConfig {
        encryption_key: base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            [7u8; 32],
        ),
        jwt_secret_key: "test-secret-key-not-for-production-use-only".to_string(),
        server_url: "https://srv".to_string(),
        database_url: "postgres://test@localhost:19999/test".to_string(),
        schwab_app_key: None,
        schwab_app_secret: None,
        schwab_callback_url: None,
        protected_resource_path: "/mcp".to_string(),
        janitor_interval: Duration::from_secs(3600),
        access_token_ttl: Duration::from_secs(15 * 60),
        refresh_token_ttl: Duration::from_secs(30 * 24 * 3600),
        auth_code_ttl: Duration::from_secs(10 * 60),
        upstream_state_ttl: Duration::from_secs(10 * 60),
    }
}
