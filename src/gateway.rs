use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::error::{unauthorized_with_challenge, AuthChallenge};
use crate::state::AppState;
use crate::token_service;

/// Bound into request extensions by `require_bearer`, readable by any
/// downstream handler via `Extension<RequestContext>`. This is the Rust
/// analogue of the source's task-local `(user_id, token)` binding (§9) — an
/// explicit value threaded through the request, never process-global state,
/// so it cannot leak across concurrent requests.
#[derive(Clone)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub access_token: String,
}

/// Resource-gateway middleware (§4.6). Runs ahead of every handler under the
/// protected-resource path. On success it attaches a `RequestContext`
/// extension and calls through; on any verification failure it returns 401
/// immediately without reaching the handler.
pub async fn require_bearer(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let realm = state.config.server_url.clone();
    let resource_metadata = format!("{}/.well-known/oauth-protected-resource", state.config.server_url);

    let header_value = match req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(v) => v,
        None => {
            return unauthorized_with_challenge(AuthChallenge {
                realm,
                error: None,
                resource_metadata: Some(resource_metadata),
            });
        }
    };

    let token = match header_value.strip_prefix("Bearer ") {
        Some(t) if !t.is_empty() => t,
        _ => {
            return unauthorized_with_challenge(AuthChallenge {
                realm,
                error: None,
                resource_metadata: Some(resource_metadata),
            });
        }
    };

    let expected_audience = state.config.protected_resource_url();
    let verification = token_service::verify(&state.db, &state.config, token, &expected_audience).await;

    let (claims, _row) = match verification {
        Ok(v) => v,
        Err(_) => {
            return unauthorized_with_challenge(AuthChallenge {
                realm,
                error: Some("invalid_token"),
                resource_metadata: Some(resource_metadata),
            });
        }
    };

    let user_id = match Uuid::parse_str(&claims.sub) {
        Ok(id) => id,
        Err(_) => {
            return unauthorized_with_challenge(AuthChallenge {
                realm,
                error: Some("invalid_token"),
                resource_metadata: Some(resource_metadata),
            });
        }
    };

    req.extensions_mut().insert(RequestContext {
        user_id,
        access_token: token.to_string(),
    });

    // The binding lives only on this request's extensions; there is nothing
    // to explicitly clear afterward — it is dropped with the request.
    next.run(req).await
}
