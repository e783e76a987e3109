//! Pool setup for the token tables.

use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Open the pool and apply pending migrations from `migrations/`.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, AppError> {
    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connecting to PostgreSQL"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .connect(&config.url)
        .await
        .map_err(|e| setup_error("connect", e))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| setup_error("migrate", e))?;

    tracing::info!("Token tables ready");
    Ok(pool)
}

fn setup_error(step: &'static str, err: impl std::fmt::Display) -> AppError {
    tracing::error!(step = step, error = %err, "PostgreSQL setup failed");
    AppError::DatabaseError(anyhow::anyhow!("PostgreSQL {} failed: {}", step, err))
}
