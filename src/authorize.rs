use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Form;
use chrono::Utc;

use crate::clients;
use crate::error::AppError;
use crate::models::{AuthorizeQuery, LoginForm};
use crate::pkce;
use crate::state::AppState;
use crate::users;

const SUPPORTED_SCOPES: &[&str] = &["trading"];

fn default_scope() -> &'static str {
    "trading"
}

fn validate_scope(scope: &str) -> Result<(), AppError> {
    if SUPPORTED_SCOPES.contains(&scope) {
        Ok(())
    } else {
        Err(AppError::invalid_request("unsupported scope"))
    }
}

/// `GET /authorize` — validates every parameter and renders a consent form
/// embedding them as hidden fields. HTML templating is out of scope per the
/// spec; this is deliberately minimal inline markup, not a UI.
///
/// Every validation failure here renders a user-facing HTML remediation page
/// rather than a JSON error body (§4.4) — this endpoint is loaded directly in
/// a browser, and a misregistered client should show the end user something
/// readable instead of a raw `{error,message}` blob. Note this never
/// redirects on failure: redirecting to an unvalidated `redirect_uri` would
/// turn this endpoint into an open redirector.
pub async fn authorize(
    State(state): State<AppState>,
    Query(params): Query<AuthorizeQuery>,
) -> Result<Response, AppError> {
    if params.response_type != "code" {
        return Ok(authorize_error_page("response_type must be code"));
    }

    let client = match clients::find_by_id(&state.db, &params.client_id).await? {
        Some(c) => c,
        None => return Ok(authorize_error_page("unknown client_id")),
    };

    if !client.redirect_uris.iter().any(|u| u == &params.redirect_uri) {
        return Ok(authorize_error_page("redirect_uri not registered for this client"));
    }

    if params.code_challenge_method != "S256" {
        return Ok(authorize_error_page("code_challenge_method must be S256"));
    }

    let scope = params.scope.clone().unwrap_or_else(|| default_scope().to_string());
    if validate_scope(&scope).is_err() {
        return Ok(authorize_error_page("unsupported scope"));
    }

    if params.resource.trim().is_empty() {
        return Ok(authorize_error_page("resource is required"));
    }

    let html = format!(
        r#"<!doctype html>
<html><body>
<h1>Authorize access</h1>
<form method="post" action="/authorize/login">
  <input type="hidden" name="client_id" value="{client_id}">
  <input type="hidden" name="redirect_uri" value="{redirect_uri}">
  <input type="hidden" name="state" value="{state}">
  <input type="hidden" name="code_challenge" value="{code_challenge}">
  <input type="hidden" name="code_challenge_method" value="{code_challenge_method}">
  <input type="hidden" name="resource" value="{resource}">
  <input type="hidden" name="scope" value="{scope}">
  <label>Email <input type="email" name="email" required></label>
  <label>Password <input type="password" name="password" required></label>
  <button type="submit">Continue</button>
</form>
</body></html>"#,
        client_id = html_escape(&params.client_id),
        redirect_uri = html_escape(&params.redirect_uri),
        state = html_escape(&params.state),
        code_challenge = html_escape(&params.code_challenge),
        code_challenge_method = html_escape(&params.code_challenge_method),
        resource = html_escape(&params.resource),
        scope = html_escape(&scope),
    );

    Ok(Html(html).into_response())
}

/// `POST /authorize/login` — authenticates (or silently creates) the user,
/// then issues a single-use authorization code and 303-redirects back to the
/// client. The 303 is mandatory: it forces a method switch to GET (§4.4).
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let client = clients::find_by_id(&state.db, &form.client_id)
        .await?
        .ok_or_else(|| AppError::invalid_request("unknown client_id"))?;

    if !client.redirect_uris.iter().any(|u| u == &form.redirect_uri) {
        return Err(AppError::invalid_request("redirect_uri not registered for this client"));
    }

    if form.code_challenge_method != "S256" {
        return Err(AppError::invalid_request("code_challenge_method must be S256"));
    }

    let scope = form.scope.clone().unwrap_or_else(|| default_scope().to_string());
    validate_scope(&scope)?;

    let user = users::authenticate_or_create(&state.db, &form.email, &form.password).await?;

    let code = pkce::generate_code();
    let expires_at = Utc::now() + chrono::Duration::from_std(state.config.auth_code_ttl).unwrap();

    sqlx::query(
        "INSERT INTO oauth_codes
            (code, user_id, client_id, redirect_uri, code_challenge, code_challenge_method, resource_parameter, scope, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(&code)
    .bind(user.user_id)
    .bind(&form.client_id)
    .bind(&form.redirect_uri)
    .bind(&form.code_challenge)
    .bind(&form.code_challenge_method)
    .bind(&form.resource)
    .bind(&scope)
    .bind(expires_at)
    .execute(&state.db)
    .await?;

    let mut location = parse_redirect_uri(&form.redirect_uri)?;
    location.query_pairs_mut().append_pair("code", &code).append_pair("state", &form.state);

    Ok(Redirect::to(location.as_str()).into_response())
}

fn parse_redirect_uri(uri: &str) -> Result<url::Url, AppError> {
    url::Url::parse(uri).map_err(|_| AppError::invalid_request("malformed redirect_uri"))
}

/// Renders a plain 400 HTML page for a rejected `GET /authorize`. Kept as
/// minimal inline markup, matching the consent form above.
fn authorize_error_page(message: &str) -> Response {
    let html = format!(
        r#"<!doctype html>
<html><body>
<h1>Authorization request rejected</h1>
<p>{message}</p>
</body></html>"#,
        message = html_escape(message),
    );
    (axum::http::StatusCode::BAD_REQUEST, Html(html)).into_response()
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
