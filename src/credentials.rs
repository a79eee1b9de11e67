use axum::extract::State;
use axum::response::{Html, IntoResponse, Response};
use axum::{Extension, Form};

use crate::error::AppError;
use crate::gateway::RequestContext;
use crate::models::CredentialSetupForm;
use crate::state::AppState;
use crate::vault::Vault;

/// `GET /setup` — minimal inline form; no templating engine per scope.
pub async fn setup_form() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html><body>
<h1>Link a brokerage account</h1>
<form method="post" action="/setup">
  <label>Platform <input type="text" name="platform" required></label>
  <label>Access token <input type="text" name="access_token" required></label>
  <label>Account number <input type="text" name="account_number" required></label>
  <label>Refresh token <input type="text" name="refresh_token"></label>
  <label>Account hash <input type="text" name="account_hash"></label>
  <button type="submit">Save</button>
</form>
</body></html>"#,
    )
}

/// `POST /setup` — requires the caller to already be authenticated via the
/// resource-gateway middleware; persists an encrypted `UserCredential` row.
pub async fn setup_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(form): Form<CredentialSetupForm>,
) -> Result<Response, AppError> {
    let vault = Vault::new(&state.config.encryption_key);

    let (encrypted_access_token, encrypted_account_number) = vault
        .encrypt_pair(&form.access_token, &form.account_number)
        .map_err(AppError::Internal)?;

    let encrypted_refresh_token = form
        .refresh_token
        .as_deref()
        .map(|t| vault.encrypt(t))
        .transpose()
        .map_err(AppError::Internal)?;

    let encrypted_account_hash = form
        .account_hash
        .as_deref()
        .map(|t| vault.encrypt(t))
        .transpose()
        .map_err(AppError::Internal)?;

    sqlx::query(
        "INSERT INTO user_credentials
            (user_id, platform, encrypted_access_token, encrypted_account_number, encrypted_refresh_token, encrypted_account_hash, token_expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (user_id, platform) DO UPDATE SET
            encrypted_access_token = EXCLUDED.encrypted_access_token,
            encrypted_account_number = EXCLUDED.encrypted_account_number,
            encrypted_refresh_token = EXCLUDED.encrypted_refresh_token,
            encrypted_account_hash = EXCLUDED.encrypted_account_hash,
            token_expires_at = EXCLUDED.token_expires_at,
            updated_at = now()",
    )
    .bind(ctx.user_id)
    .bind(&form.platform)
    .bind(&encrypted_access_token)
    .bind(&encrypted_account_number)
    .bind(&encrypted_refresh_token)
    .bind(&encrypted_account_hash)
    .bind(form.token_expires_at)
    .execute(&state.db)
    .await?;

    Ok(Html("<!doctype html><html><body><h1>Credential saved</h1></body></html>").into_response())
}
