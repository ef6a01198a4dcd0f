use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;

/// Pool whose acquire wait is bounded so a saturated database fails fast.
pub async fn init_db(database_url: &str, acquire_timeout: Duration) -> Result<MySqlPool> {
    MySqlPoolOptions::new()
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
        .context("Failed to connect to database")
}
