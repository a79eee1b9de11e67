use http::{header, HeaderValue};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use mcp_broker_gateway::config::AppConfig;
use mcp_broker_gateway::state::AppState;
use mcp_broker_gateway::{create_router, janitor};

fn build_app(state: AppState) -> axum::Router {
    // Metadata, authorize, and token endpoints are meant to be called
    // directly from browser-based MCP clients; there is no session cookie
    // to protect against CSRF, so a permissive CORS policy matches the rest
    // of the public-authorization-server ecosystem.
    let cors = CorsLayer::permissive();

    create_router(state)
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).with_ansi(true).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    // §A.1: missing mandatory config is fatal — log and exit non-zero
    // rather than panic with a raw backtrace.
    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "fatal: configuration error at startup");
            std::process::exit(1);
        }
    };

    // §4.2: small pool, target 10 active connections, burst to 20.
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .idle_timeout(std::time::Duration::from_secs(600))
        .max_lifetime(std::time::Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("database connection failed: {e}"))?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let janitor_interval = config.janitor_interval;
    let state = AppState::new(pool.clone(), config);

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let janitor_handle = janitor::spawn(pool, janitor_interval, stop_rx);

    let app = build_app(state);

    let port: u16 = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string()).parse()?;
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("mcp-broker-gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = stop_tx.send(true);
    let _ = janitor_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("shutdown signal received, starting graceful shutdown");
}
