use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Spawns the janitor loop, woken every `interval`. Each sweep's three
/// deletions are independent transactions — a failure in one must not
/// prevent the others from running, and none of them should crash the
/// process (§4.8).
pub fn spawn(db: PgPool, interval: std::time::Duration, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    run_once(&db).await;
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        tracing::info!("janitor: stop signal received, exiting");
                        return;
                    }
                }
            }
        }
    })
}

pub async fn run_once(db: &PgPool) {
    let now = Utc::now();

    if let Err(e) = cleanup_expired_codes(db, now).await {
        tracing::warn!(error = %e, "janitor: cleanup_expired_codes failed");
    }
    if let Err(e) = cleanup_expired_tokens(db, now).await {
        tracing::warn!(error = %e, "janitor: cleanup_expired_tokens failed");
    }
    if let Err(e) = cleanup_revoked_tokens(db, now).await {
        tracing::warn!(error = %e, "janitor: cleanup_revoked_tokens failed");
    }
}

async fn cleanup_expired_codes(db: &PgPool, now: chrono::DateTime<Utc>) -> Result<(), sqlx::Error> {
    let cutoff = now - ChronoDuration::hours(1);
    let mut tx = db.begin().await?;
    let result = sqlx::query("DELETE FROM oauth_codes WHERE expires_at < $1")
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    tracing::info!(deleted = result.rows_affected(), "janitor: expired codes purged");
    Ok(())
}

async fn cleanup_expired_tokens(db: &PgPool, now: chrono::DateTime<Utc>) -> Result<(), sqlx::Error> {
    let cutoff = now - ChronoDuration::days(1);
    let mut tx = db.begin().await?;
    let result = sqlx::query(
        "DELETE FROM oauth_tokens WHERE expires_at < $1 AND refresh_expires_at < $1",
    )
    .bind(cutoff)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    tracing::info!(deleted = result.rows_affected(), "janitor: expired tokens purged");
    Ok(())
}

async fn cleanup_revoked_tokens(db: &PgPool, now: chrono::DateTime<Utc>) -> Result<(), sqlx::Error> {
    let cutoff = now - ChronoDuration::days(7);
    let mut tx = db.begin().await?;
    let result = sqlx::query("DELETE FROM oauth_tokens WHERE revoked = true AND created_at < $1")
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    tracing::info!(deleted = result.rows_affected(), "janitor: revoked tokens purged");
    Ok(())
}
