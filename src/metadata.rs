use axum::extract::State;
use axum::Json;

use crate::models::{AuthorizationServerMetadata, ProtectedResourceMetadata};
use crate::state::AppState;

pub async fn authorization_server_metadata(State(state): State<AppState>) -> Json<AuthorizationServerMetadata> {
    let base = &state.config.server_url;
    Json(AuthorizationServerMetadata {
        issuer: base.clone(),
        authorization_endpoint: format!("{base}/authorize"),
        token_endpoint: format!("{base}/token"),
        registration_endpoint: format!("{base}/register"),
        revocation_endpoint: format!("{base}/revoke"),
        response_types_supported: vec!["code"],
        grant_types_supported: vec!["authorization_code", "refresh_token"],
        code_challenge_methods_supported: vec!["S256"],
        token_endpoint_auth_methods_supported: vec!["none", "client_secret_post"],
        scopes_supported: vec!["trading"],
    })
}

pub async fn protected_resource_metadata(State(state): State<AppState>) -> Json<ProtectedResourceMetadata> {
    Json(ProtectedResourceMetadata {
        resource: state.config.protected_resource_url(),
        authorization_servers: vec![state.config.server_url.clone()],
        scopes_supported: vec!["trading"],
        bearer_methods_supported: vec!["header"],
    })
}
