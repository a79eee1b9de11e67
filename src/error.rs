use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Taxonomy of errors the gateway can produce. `ConfigurationError` is only
/// ever raised at startup — it is never returned from a request handler, but
/// keeping it in the same enum lets both code paths share `Display`/logging.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not authorized for this resource")]
    Authorization,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("upstream brokerage error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Extra context an `AuthenticationError` response must carry so the client
/// can retry correctly per RFC 6750's `WWW-Authenticate` conventions.
pub struct AuthChallenge {
    pub realm: String,
    pub error: Option<&'static str>,
    pub resource_metadata: Option<String>,
}

impl AppError {
    pub fn invalid_grant() -> Self {
        AppError::Validation("invalid_grant".to_string())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        AppError::Validation(format!("invalid_request: {}", msg.into()))
    }

    fn registered_code(&self) -> &'static str {
        match self {
            AppError::Authentication(_) => "invalid_token",
            AppError::Authorization => "unauthorized_client",
            AppError::Validation(msg) if msg.starts_with("invalid_grant") => "invalid_grant",
            AppError::Validation(_) => "invalid_request",
            AppError::Configuration(_) => "server_error",
            AppError::Upstream(_) => "server_error",
            AppError::Internal(_) | AppError::Database(_) => "server_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Authorization => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message surfaced to the client. Authentication/grant failures
    /// never disclose their internal cause — §7's non-disclosure rule.
    fn public_message(&self) -> String {
        match self {
            AppError::Authentication(_) => "authentication failed".to_string(),
            AppError::Authorization => "not authorized for this resource".to_string(),
            AppError::Validation(msg) if msg.starts_with("invalid_grant") => {
                "invalid_grant".to_string()
            }
            AppError::Validation(msg) => msg.clone(),
            AppError::Configuration(_) => "server misconfigured".to_string(),
            AppError::Upstream(_) => "upstream service error".to_string(),
            AppError::Internal(_) | AppError::Database(_) => "internal error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Database(e) => tracing::error!(error = %e, "database error"),
            AppError::Internal(e) => tracing::error!(error = %e, "internal error"),
            AppError::Upstream(msg) => tracing::warn!(cause = %msg, "upstream brokerage error"),
            AppError::Authentication(msg) => tracing::warn!(cause = %msg, "authentication failed"),
            _ => {}
        }

        let status = self.status();
        let code = self.registered_code();
        let body = Json(json!({ "error": code, "message": self.public_message() }));
        (status, body).into_response()
    }
}

/// Builds a 401 response carrying a `WWW-Authenticate` header per §4.6/§7.
pub fn unauthorized_with_challenge(challenge: AuthChallenge) -> Response {
    let mut value = format!("Bearer realm=\"{}\"", challenge.realm);
    if let Some(err) = challenge.error {
        value.push_str(&format!(", error=\"{err}\""));
    }
    if let Some(rm) = challenge.resource_metadata {
        value.push_str(&format!(", resource_metadata=\"{rm}\""));
    }

    let mut resp = (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "invalid_token", "message": "authentication failed" })),
    )
        .into_response();

    if let Ok(header) = HeaderValue::from_str(&value) {
        resp.headers_mut().insert(axum::http::header::WWW_AUTHENTICATE, header);
    }
    resp
}
