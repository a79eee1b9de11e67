use axum::extract::State;
use axum::Form;
use axum::Json;
use serde_json::json;

use crate::models::RevokeForm;
use crate::state::AppState;
use crate::token_service;

/// RFC 7009: always 200, even for unknown tokens — this prevents an attacker
/// from using the endpoint to scan for valid tokens. A client-id mismatch
/// silently succeeds without revoking, per the RFC.
pub async fn revoke(State(state): State<AppState>, Form(form): Form<RevokeForm>) -> Json<serde_json::Value> {
    let hash = token_service::sha256_hex(&form.token);

    let result = if let Some(client_id) = &form.client_id {
        sqlx::query(
            "UPDATE oauth_tokens SET revoked = true
             WHERE (token_hash = $1 OR refresh_token_hash = $1) AND client_id = $2",
        )
        .bind(&hash)
        .bind(client_id)
        .execute(&state.db)
        .await
    } else {
        sqlx::query("UPDATE oauth_tokens SET revoked = true WHERE token_hash = $1 OR refresh_token_hash = $1")
            .bind(&hash)
            .execute(&state.db)
            .await
    };

    if let Err(e) = result {
        tracing::warn!(error = %e, "revoke: database error, still returning 200 per RFC 7009");
    }

    Json(json!({ "success": true }))
}
