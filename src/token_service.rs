use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::{OAuthTokenRow, TokenResponse};

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub client_id: String,
    pub scope: String,
}

pub struct MintedPair {
    pub access_token: String,
    pub access_token_hash: String,
    pub refresh_token: String,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

fn random_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Mints a fresh access+refresh pair. Does not touch the database; callers
/// persist the returned hashes as part of their own transaction.
pub fn mint(config: &AppConfig, user_id: Uuid, client_id: &str, audience: &str, scope: &str) -> Result<MintedPair, AppError> {
    let now = Utc::now();
    let expires_at = now + ChronoDuration::from_std(config.access_token_ttl).unwrap();
    let refresh_expires_at = now + ChronoDuration::from_std(config.refresh_token_ttl).unwrap();

    let claims = AccessTokenClaims {
        sub: user_id.to_string(),
        aud: audience.to_string(),
        iss: config.server_url.clone(),
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
        client_id: client_id.to_string(),
        scope: scope.to_string(),
    };

    let access_token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret_key.as_bytes()),
    )
    .map_err(|e| AppError::Internal(e.into()))?;

    let refresh_token = random_opaque_token();

    Ok(MintedPair {
        access_token_hash: sha256_hex(&access_token),
        refresh_token_hash: sha256_hex(&refresh_token),
        access_token,
        refresh_token,
        expires_at,
        refresh_expires_at,
    })
}

pub fn to_response(pair: &MintedPair, scope: &str, ttl_secs: i64) -> TokenResponse {
    TokenResponse {
        access_token: pair.access_token.clone(),
        token_type: "Bearer",
        expires_in: ttl_secs,
        refresh_token: pair.refresh_token.clone(),
        scope: scope.to_string(),
    }
}

/// Decodes and verifies a presented access token's signature and claims,
/// then cross-checks it against the persisted `OAuthToken` row and the
/// owning user. Strict audience match — no list-tolerance (§4.3).
///
/// On success returns the validated claims and the user's row. On a stale
/// token whose user no longer exists, the token is revoked as a side effect
/// before the error is returned.
pub async fn verify(
    db: &PgPool,
    config: &AppConfig,
    presented_token: &str,
    expected_audience: &str,
) -> Result<(AccessTokenClaims, OAuthTokenRow), AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[expected_audience]);
    validation.set_issuer(&[config.server_url.as_str()]);
    validation.validate_exp = true;
    // §4.3: clock-skew tolerance is zero, not jsonwebtoken's 60s default.
    validation.leeway = 0;

    let data = decode::<AccessTokenClaims>(
        presented_token,
        &DecodingKey::from_secret(config.jwt_secret_key.as_bytes()),
        &validation,
    )
    .map_err(|e| AppError::Authentication(e.to_string()))?;

    let claims = data.claims;
    let token_hash = sha256_hex(presented_token);

    let row = sqlx::query_as::<_, OAuthTokenRow>(
        "SELECT * FROM oauth_tokens WHERE token_hash = $1 AND revoked = false",
    )
    .bind(&token_hash)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::Authentication("token not found or revoked".to_string()))?;

    if row.expires_at <= Utc::now() {
        return Err(AppError::Authentication("token expired".to_string()));
    }

    let user_exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE user_id = $1)")
        .bind(row.user_id)
        .fetch_one(db)
        .await?;

    if !user_exists {
        sqlx::query("UPDATE oauth_tokens SET revoked = true WHERE token_hash = $1")
            .bind(&token_hash)
            .execute(db)
            .await?;
        return Err(AppError::Authentication("user no longer exists".to_string()));
    }

    Ok((claims, row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_config;

    #[test]
    fn mint_round_trips_sub_and_aud() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let pair = mint(&config, user_id, "mcp-client", "https://srv/mcp/", "trading").unwrap();

        let validation_key = DecodingKey::from_secret(config.jwt_secret_key.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["https://srv/mcp/"]);
        validation.set_issuer(&[config.server_url.as_str()]);

        let data = decode::<AccessTokenClaims>(&pair.access_token, &validation_key, &validation).unwrap();
        assert_eq!(data.claims.sub, user_id.to_string());
        assert_eq!(data.claims.aud, "https://srv/mcp/");
    }

    #[test]
    fn mint_rejects_under_wrong_audience() {
        let config = test_config();
        let pair = mint(&config, Uuid::new_v4(), "mcp-client", "https://srv/mcp/", "trading").unwrap();

        let validation_key = DecodingKey::from_secret(config.jwt_secret_key.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["https://other/mcp/"]);
        validation.set_issuer(&[config.server_url.as_str()]);

        assert!(decode::<AccessTokenClaims>(&pair.access_token, &validation_key, &validation).is_err());
    }

    #[test]
    fn sha256_hex_is_deterministic() {
        assert_eq!(sha256_hex("abc"), sha256_hex("abc"));
        assert_ne!(sha256_hex("abc"), sha256_hex("abd"));
    }
}
