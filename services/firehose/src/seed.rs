//! One-shot identity seed query.
//!
//! Invoked once before the session starts; the result is merged with the
//! static allow-list to form the watch-set. Out of scope for the session's
//! runtime behavior.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::DatabaseConfig;

/// Fetch the watched identity strings from the seed database.
pub async fn fetch_identities(config: &DatabaseConfig) -> Result<Vec<String>> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout())
        .connect(&config.url)
        .await
        .context("failed to connect to seed database")?;

    let rows: Vec<(String,)> = sqlx::query_as(&config.seed_query)
        .fetch_all(&pool)
        .await
        .context("identity seed query failed")?;

    pool.close().await;

    let identities: Vec<String> = rows.into_iter().map(|(did,)| did).collect();
    info!(count = identities.len(), "fetched seed identities");

    Ok(identities)
}
