use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::db::DbError;

/// Open a connection pool, retrying with exponential backoff
///
/// Gives up after five attempts spread over roughly half a minute.
#[instrument(skip(database_url))]
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, DbError> {
    info!("Connecting to database...");

    let backoff = ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(16))
        .with_max_times(5);

    let pool = (|| async move {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
    })
    .retry(backoff)
    .notify(|err: &sqlx::Error, delay: Duration| {
        warn!(
            error = %err,
            retry_in_secs = delay.as_secs(),
            "Database connection failed, retrying"
        );
    })
    .await?;

    info!("Database connection established");
    Ok(pool)
}

#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}
