use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use renec_core::config::PostgresConfig;

/// Connect and run migrations.
///
/// Returns None when PostgreSQL is not configured. A configured database
/// that cannot be reached is an error: the queue must not silently fall
/// back to process memory.
pub async fn init_pg_pool(config: &PostgresConfig) -> anyhow::Result<Option<PgPool>> {
    if !config.is_configured() {
        warn!("PG_USERNAME not set, PostgreSQL backends disabled");
        return Ok(None);
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await
        .with_context(|| format!("connecting to PostgreSQL at {}", config.host))?;
    info!(host = %config.host, db = %config.database, "PostgreSQL connected");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("running database migrations")?;
    info!("database migrations applied");
    Ok(Some(pool))
}
