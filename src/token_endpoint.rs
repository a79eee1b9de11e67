use axum::extract::State;
use axum::Form;
use axum::Json;
use chrono::Utc;

use crate::error::AppError;
use crate::models::{OAuthCodeRow, OAuthTokenRow, TokenForm};
use crate::pkce;
use crate::state::AppState;
use crate::token_service;

pub async fn token(
    State(state): State<AppState>,
    Form(form): Form<TokenForm>,
) -> Result<Json<crate::models::TokenResponse>, AppError> {
    match form.grant_type.as_str() {
        "authorization_code" => authorization_code_grant(&state, form).await,
        "refresh_token" => refresh_token_grant(&state, form).await,
        _ => Err(AppError::invalid_request("unsupported grant_type")),
    }
}

async fn authorization_code_grant(
    state: &AppState,
    form: TokenForm,
) -> Result<Json<crate::models::TokenResponse>, AppError> {
    let (code, redirect_uri, code_verifier, client_id, resource) = match (
        form.code,
        form.redirect_uri,
        form.code_verifier,
        form.client_id,
        form.resource,
    ) {
        (Some(c), Some(r), Some(v), Some(ci), Some(res)) => (c, r, v, ci, res),
        _ => return Err(AppError::invalid_request("missing required parameters for authorization_code grant")),
    };

    if form.refresh_token.is_some() {
        return Err(AppError::invalid_request("ambiguous grant: both code and refresh_token set"));
    }

    let mut tx = state.db.begin().await?;

    // Single-use enforcement: the conditional UPDATE is the source of truth,
    // not an in-process lock — two concurrent redemptions race here and
    // exactly one sees rows_affected() == 1 (§5).
    let claimed = sqlx::query("UPDATE oauth_codes SET used = true WHERE code = $1 AND used = false")
        .bind(&code)
        .execute(&mut *tx)
        .await?;

    if claimed.rows_affected() == 0 {
        // Either never existed or already redeemed. §9 open question: we
        // additionally revoke the token(s) issued from a replayed code.
        // The data model keeps no code-to-token link, so this is narrowed
        // as tightly as the available columns allow — user_id, client_id,
        // *and* resource_parameter — rather than every token for the
        // (user_id, client_id) pair. It still isn't exact: a user with
        // multiple concurrent sessions for the same client and resource
        // loses all of them, not only the one derived from this code.
        if let Some(existing) = sqlx::query_as::<_, OAuthCodeRow>("SELECT * FROM oauth_codes WHERE code = $1")
            .bind(&code)
            .fetch_optional(&mut *tx)
            .await?
        {
            sqlx::query(
                "UPDATE oauth_tokens SET revoked = true
                 WHERE user_id = $1 AND client_id = $2 AND resource_parameter = $3 AND revoked = false",
            )
            .bind(existing.user_id)
            .bind(&existing.client_id)
            .bind(&existing.resource_parameter)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        return Err(AppError::invalid_grant());
    }

    let code_row = sqlx::query_as::<_, OAuthCodeRow>("SELECT * FROM oauth_codes WHERE code = $1")
        .bind(&code)
        .fetch_one(&mut *tx)
        .await?;

    if code_row.expires_at <= Utc::now() {
        tx.commit().await?;
        return Err(AppError::invalid_grant());
    }
    if code_row.redirect_uri != redirect_uri {
        tx.commit().await?;
        return Err(AppError::invalid_grant());
    }
    if code_row.resource_parameter != resource {
        tx.commit().await?;
        return Err(AppError::invalid_grant());
    }
    if code_row.client_id != client_id {
        tx.commit().await?;
        return Err(AppError::invalid_grant());
    }
    if !pkce::verify(&code_verifier, &code_row.code_challenge) {
        tx.commit().await?;
        return Err(AppError::invalid_grant());
    }

    let pair = token_service::mint(&state.config, code_row.user_id, &client_id, &resource, &code_row.scope)?;

    sqlx::query(
        "INSERT INTO oauth_tokens
            (token_hash, user_id, client_id, resource_parameter, scope, expires_at, refresh_token_hash, refresh_expires_at, revoked)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, false)",
    )
    .bind(&pair.access_token_hash)
    .bind(code_row.user_id)
    .bind(&client_id)
    .bind(&resource)
    .bind(&code_row.scope)
    .bind(pair.expires_at)
    .bind(&pair.refresh_token_hash)
    .bind(pair.refresh_expires_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let ttl_secs = state.config.access_token_ttl.as_secs() as i64;
    Ok(Json(token_service::to_response(&pair, &code_row.scope, ttl_secs)))
}

async fn refresh_token_grant(
    state: &AppState,
    form: TokenForm,
) -> Result<Json<crate::models::TokenResponse>, AppError> {
    let (refresh_token, client_id, resource) = match (form.refresh_token, form.client_id, form.resource) {
        (Some(r), Some(c), Some(res)) => (r, c, res),
        _ => return Err(AppError::invalid_request("missing required parameters for refresh_token grant")),
    };

    if form.code.is_some() {
        return Err(AppError::invalid_request("ambiguous grant: both code and refresh_token set"));
    }

    let refresh_hash = token_service::sha256_hex(&refresh_token);

    let mut tx = state.db.begin().await?;

    let row = sqlx::query_as::<_, OAuthTokenRow>(
        "SELECT * FROM oauth_tokens WHERE refresh_token_hash = $1 AND client_id = $2 AND revoked = false",
    )
    .bind(&refresh_hash)
    .bind(&client_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(AppError::invalid_grant)?;

    if row.refresh_expires_at <= Utc::now() {
        tx.commit().await?;
        return Err(AppError::invalid_grant());
    }
    if row.resource_parameter != resource {
        tx.commit().await?;
        return Err(AppError::invalid_grant());
    }

    let pair = token_service::mint(&state.config, row.user_id, &client_id, &resource, &row.scope)?;

    // Rotation: both hashes replace the previous row's in the same
    // transaction. `revoked` is left untouched rather than reset — sticky
    // revocation means a row already revoked must stay revoked (§3), though
    // the WHERE clause above already excludes revoked rows from matching.
    sqlx::query(
        "UPDATE oauth_tokens
         SET token_hash = $1, expires_at = $2, refresh_token_hash = $3, refresh_expires_at = $4
         WHERE token_hash = $5",
    )
    .bind(&pair.access_token_hash)
    .bind(pair.expires_at)
    .bind(&pair.refresh_token_hash)
    .bind(pair.refresh_expires_at)
    .bind(&row.token_hash)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let ttl_secs = state.config.access_token_ttl.as_secs() as i64;
    Ok(Json(token_service::to_response(&pair, &row.scope, ttl_secs)))
}
