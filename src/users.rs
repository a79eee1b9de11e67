use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::UserRow;

const BCRYPT_COST: u32 = 10;
/// bcrypt silently truncates beyond 72 bytes anyway; truncate explicitly so
/// the stored hash and a later verification agree on what was hashed.
const BCRYPT_MAX_BYTES: usize = 72;

/// Emails are normalized to lowercase on every write and lookup — otherwise
/// `User@x.com` and `user@x.com` would collide at the unique index but
/// silently resolve to different accounts depending on case (§9).
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn truncate_password(password: &str) -> &str {
    if password.len() <= BCRYPT_MAX_BYTES {
        return password;
    }
    let mut end = BCRYPT_MAX_BYTES;
    while !password.is_char_boundary(end) {
        end -= 1;
    }
    &password[..end]
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    bcrypt::hash(truncate_password(password), BCRYPT_COST)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(truncate_password(password), hash).unwrap_or(false)
}

pub async fn find_by_email(db: &PgPool, email: &str) -> Result<Option<UserRow>, AppError> {
    let normalized = normalize_email(email);
    let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = $1")
        .bind(normalized)
        .fetch_optional(db)
        .await?;
    Ok(row)
}

pub async fn find_by_id(db: &PgPool, user_id: Uuid) -> Result<Option<UserRow>, AppError> {
    let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(db)
        .await?;
    Ok(row)
}

pub async fn create(db: &PgPool, email: &str, password: &str) -> Result<UserRow, AppError> {
    let normalized = normalize_email(email);
    let password_hash = hash_password(password)?;
    let user_id = Uuid::new_v4();

    let row = sqlx::query_as::<_, UserRow>(
        "INSERT INTO users (user_id, email, password_hash) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(user_id)
    .bind(normalized)
    .bind(password_hash)
    .fetch_one(db)
    .await?;

    Ok(row)
}

/// Authenticates by email/password, creating the account on first sight if
/// the email is unknown. This dual-purpose behavior is the `/authorize/login`
/// contract specified in §4.4/§9 — flagged, not silently changed, per the
/// spec's explicit instruction to surface rather than guess intent here.
pub async fn authenticate_or_create(db: &PgPool, email: &str, password: &str) -> Result<UserRow, AppError> {
    if let Some(existing) = find_by_email(db, email).await? {
        if verify_password(password, &existing.password_hash) {
            return Ok(existing);
        }
        return Err(AppError::Authentication("invalid credentials".to_string()));
    }

    tracing::warn!(email = %normalize_email(email), "creating account implicitly via /authorize/login");
    create(db, email, password).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("password123").unwrap();
        assert!(verify_password("password123", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn truncates_passwords_over_72_bytes() {
        let long = "a".repeat(100);
        let hash = hash_password(&long).unwrap();
        // Anything sharing the first 72 bytes verifies identically.
        let also_long = "a".repeat(72) + "different-tail-beyond-72-bytes";
        assert!(verify_password(&also_long, &hash));
    }

    #[test]
    fn normalizes_email_case() {
        assert_eq!(normalize_email("User@X.com"), "user@x.com");
        assert_eq!(normalize_email("  user@x.com "), "user@x.com");
    }
}
