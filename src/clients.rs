use rand::RngCore;
use sqlx::PgPool;
use url::Url;

use crate::error::AppError;
use crate::models::OAuthClientRow;

fn generate_client_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("mcp-{}", hex::encode(bytes))
}

/// A redirect URI is acceptable if it's HTTPS, or loopback HTTP for local
/// development clients (`localhost`/`127.0.0.1`), per §3.
pub fn validate_redirect_uri(uri: &str) -> Result<(), AppError> {
    let parsed = Url::parse(uri).map_err(|_| AppError::invalid_request("malformed redirect_uri"))?;

    if parsed.scheme() == "https" {
        return Ok(());
    }

    let host_is_loopback = matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1"));
    if parsed.scheme() == "http" && host_is_loopback {
        return Ok(());
    }

    Err(AppError::invalid_request(
        "redirect_uri must be HTTPS or a loopback address",
    ))
}

pub async fn register(
    db: &PgPool,
    client_name: &str,
    redirect_uris: &[String],
) -> Result<OAuthClientRow, AppError> {
    if redirect_uris.is_empty() {
        return Err(AppError::invalid_request("redirect_uris must not be empty"));
    }
    for uri in redirect_uris {
        validate_redirect_uri(uri)?;
    }

    let client_id = generate_client_id();

    let row = sqlx::query_as::<_, OAuthClientRow>(
        "INSERT INTO oauth_clients (client_id, client_secret, client_name, redirect_uris, is_confidential)
         VALUES ($1, NULL, $2, $3, false) RETURNING *",
    )
    .bind(&client_id)
    .bind(client_name)
    .bind(redirect_uris)
    .fetch_one(db)
    .await?;

    Ok(row)
}

pub async fn find_by_id(db: &PgPool, client_id: &str) -> Result<Option<OAuthClientRow>, AppError> {
    let row = sqlx::query_as::<_, OAuthClientRow>("SELECT * FROM oauth_clients WHERE client_id = $1")
        .bind(client_id)
        .fetch_optional(db)
        .await?;
    Ok(row)
}
