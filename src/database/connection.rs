use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::errors::Result;

pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;

    tracing::info!("✅ PostgreSQL connection pool established");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| crate::errors::AppError::Database(e.into()))?;
    tracing::info!("Database migrations applied");
    Ok(())
}
