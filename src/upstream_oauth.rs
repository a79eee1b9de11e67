use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use chrono::Utc;
use serde::Deserialize;

use crate::brokerage::schwab::SchwabClient;
use crate::brokerage::BrokerageClient;
use crate::error::AppError;
use crate::models::UpstreamOAuthStateRow;
use crate::pkce;
use crate::state::AppState;
use crate::users;
use crate::vault::Vault;

const SCHWAB_AUTHORIZE_URL: &str = "https://api.schwabapi.com/v1/oauth/authorize";
const SCHWAB_TOKEN_URL: &str = "https://api.schwabapi.com/v1/oauth/token";
const PLATFORM: &str = "schwab";

#[derive(Deserialize)]
pub struct InitiateQuery {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    pub state: String,
}

#[derive(Deserialize)]
struct SchwabTokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

/// `GET /setup/schwab/initiate` — builds a PKCE verifier, persists transient
/// state keyed by a random `state` value, and redirects to the brokerage.
pub async fn initiate(
    State(state): State<AppState>,
    Query(query): Query<InitiateQuery>,
) -> Result<Response, AppError> {
    let app_key = state
        .config
        .schwab_app_key
        .clone()
        .ok_or_else(|| AppError::Configuration("SCHWAB_APP_KEY not configured".to_string()))?;
    let callback_url = state
        .config
        .schwab_callback_url
        .clone()
        .ok_or_else(|| AppError::Configuration("SCHWAB_CALLBACK_URL not configured".to_string()))?;

    let pkce_pair = pkce::generate();
    let csrf_state = pkce::generate_state();
    let expires_at = Utc::now() + chrono::Duration::from_std(state.config.upstream_state_ttl).unwrap();

    sqlx::query(
        "INSERT INTO upstream_oauth_state (state, email, password, code_verifier, expires_at)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&csrf_state)
    .bind(&query.email)
    .bind(&query.password)
    .bind(&pkce_pair.verifier)
    .bind(expires_at)
    .execute(&state.db)
    .await?;

    let mut url = url::Url::parse(SCHWAB_AUTHORIZE_URL).expect("constant URL");
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &app_key)
        .append_pair("redirect_uri", &callback_url)
        .append_pair("state", &csrf_state)
        .append_pair("code_challenge", &pkce_pair.challenge)
        .append_pair("code_challenge_method", "S256");

    Ok(Redirect::to(url.as_str()).into_response())
}

/// `GET /setup/schwab/callback` — single-use regardless of outcome; the
/// state row is deleted whether the exchange succeeds or fails (§4.5).
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, AppError> {
    let pending = sqlx::query_as::<_, UpstreamOAuthStateRow>(
        "SELECT * FROM upstream_oauth_state WHERE state = $1",
    )
    .bind(&query.state)
    .fetch_optional(&state.db)
    .await?;

    sqlx::query("DELETE FROM upstream_oauth_state WHERE state = $1")
        .bind(&query.state)
        .execute(&state.db)
        .await?;

    let pending = pending.ok_or_else(|| AppError::invalid_request("unknown or expired upstream state"))?;
    if pending.expires_at <= Utc::now() {
        return Err(AppError::invalid_request("upstream state expired"));
    }

    let code = query.code.ok_or_else(|| AppError::invalid_request("missing code"))?;

    let app_key = state
        .config
        .schwab_app_key
        .clone()
        .ok_or_else(|| AppError::Configuration("SCHWAB_APP_KEY not configured".to_string()))?;
    let app_secret = state
        .config
        .schwab_app_secret
        .clone()
        .ok_or_else(|| AppError::Configuration("SCHWAB_APP_SECRET not configured".to_string()))?;
    let callback_url = state
        .config
        .schwab_callback_url
        .clone()
        .ok_or_else(|| AppError::Configuration("SCHWAB_CALLBACK_URL not configured".to_string()))?;

    let token_resp = state
        .http_client
        .post(SCHWAB_TOKEN_URL)
        .basic_auth(&app_key, Some(&app_secret))
        .timeout(std::time::Duration::from_secs(10))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", callback_url.as_str()),
            ("code_verifier", pending.code_verifier.as_str()),
        ])
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("token exchange request failed: {e}")))?;

    if !token_resp.status().is_success() {
        return Err(AppError::Upstream(format!(
            "token exchange returned {}",
            token_resp.status()
        )));
    }

    let tokens: SchwabTokenResponse = token_resp
        .json()
        .await
        .map_err(|e| AppError::Upstream(format!("malformed token response: {e}")))?;

    let brokerage = SchwabClient::new(state.http_client.clone());
    let account_number = brokerage
        .account_id(&tokens.access_token)
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    let password = pending
        .password
        .ok_or_else(|| AppError::invalid_request("no password captured for account creation"))?;
    let user = users::authenticate_or_create(&state.db, &pending.email, &password).await?;

    let vault = Vault::new(&state.config.encryption_key);
    let (encrypted_access_token, encrypted_account_number) =
        vault.encrypt_pair(&tokens.access_token, &account_number).map_err(|e| AppError::Internal(e))?;
    let encrypted_refresh_token = vault.encrypt(&tokens.refresh_token).map_err(|e| AppError::Internal(e))?;
    let token_expires_at = Utc::now() + chrono::Duration::seconds(tokens.expires_in);

    sqlx::query(
        "INSERT INTO user_credentials
            (user_id, platform, encrypted_access_token, encrypted_account_number, encrypted_refresh_token, token_expires_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (user_id, platform) DO UPDATE SET
            encrypted_access_token = EXCLUDED.encrypted_access_token,
            encrypted_account_number = EXCLUDED.encrypted_account_number,
            encrypted_refresh_token = EXCLUDED.encrypted_refresh_token,
            token_expires_at = EXCLUDED.token_expires_at,
            updated_at = now()",
    )
    .bind(user.user_id)
    .bind(PLATFORM)
    .bind(&encrypted_access_token)
    .bind(&encrypted_account_number)
    .bind(&encrypted_refresh_token)
    .bind(token_expires_at)
    .execute(&state.db)
    .await?;

    Ok(Html("<!doctype html><html><body><h1>Brokerage account linked</h1></body></html>").into_response())
}
