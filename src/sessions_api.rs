use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;

use crate::error::AppError;
use crate::gateway::RequestContext;
use crate::models::{OAuthTokenRow, RevokeAllResponse, SessionInfo};
use crate::state::AppState;
use crate::token_service;

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<SessionInfo>>, AppError> {
    let rows = sqlx::query_as::<_, OAuthTokenRow>(
        "SELECT * FROM oauth_tokens WHERE user_id = $1 AND revoked = false ORDER BY created_at DESC",
    )
    .bind(ctx.user_id)
    .fetch_all(&state.db)
    .await?;

    let now = Utc::now();
    let sessions = rows
        .into_iter()
        .map(|r| SessionInfo {
            client_id: r.client_id,
            created_at: r.created_at,
            expires_at: r.expires_at,
            scope: r.scope,
            is_expired: r.expires_at <= now,
        })
        .collect();

    Ok(Json(sessions))
}

pub async fn revoke_current(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<serde_json::Value>, AppError> {
    let hash = token_service::sha256_hex(&ctx.access_token);

    sqlx::query("UPDATE oauth_tokens SET revoked = true WHERE token_hash = $1 AND user_id = $2 AND revoked = false")
        .bind(&hash)
        .bind(ctx.user_id)
        .execute(&state.db)
        .await?;

    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct RevokeAllQuery {
    #[serde(default)]
    pub client_id: Option<String>,
}

pub async fn revoke_all(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<RevokeAllQuery>,
) -> Result<Json<RevokeAllResponse>, AppError> {
    let result = if let Some(client_id) = &query.client_id {
        sqlx::query("UPDATE oauth_tokens SET revoked = true WHERE user_id = $1 AND revoked = false AND client_id = $2")
            .bind(ctx.user_id)
            .bind(client_id)
            .execute(&state.db)
            .await?
    } else {
        sqlx::query("UPDATE oauth_tokens SET revoked = true WHERE user_id = $1 AND revoked = false")
            .bind(ctx.user_id)
            .execute(&state.db)
            .await?
    };

    Ok(Json(RevokeAllResponse {
        revoked_count: result.rows_affected(),
    }))
}
