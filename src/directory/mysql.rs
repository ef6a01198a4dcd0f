use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use sqlx::MySqlPool;

use crate::directory::{Resolution, TagDirectory};
use crate::error::DirectoryError;
use crate::model::employee::Employee;

/// Directory backed by the `employees` table.
///
/// Tag resolutions and block lookups are cached for a short TTL so a busy
/// reader does not hit the database on every tap. Keep the TTL short: tags
/// get reassigned.
pub struct MySqlDirectory {
    pool: MySqlPool,
    tags: Cache<String, Option<String>>,
    blocks: Cache<String, bool>,
}

impl MySqlDirectory {
    pub fn new(pool: MySqlPool, cache_ttl: Duration) -> Self {
        Self {
            pool,
            tags: Cache::builder()
                .max_capacity(100_000) // tune based on headcount
                .time_to_live(cache_ttl)
                .build(),
            blocks: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(cache_ttl)
                .build(),
        }
    }
}

#[async_trait]
impl TagDirectory for MySqlDirectory {
    async fn resolve(&self, tag: &str) -> Result<Resolution, DirectoryError> {
        // concurrent misses for one tag share a single query
        let employee_id = self
            .tags
            .try_get_with(tag.to_owned(), async {
                sqlx::query_scalar::<_, String>(
                    r#"
                    SELECT employee_id
                    FROM employees
                    WHERE rfid_tag = ?
                    AND is_active = 1
                    "#,
                )
                .bind(tag)
                .fetch_optional(&self.pool)
                .await
            })
            .await
            .map_err(|e| DirectoryError::Unavailable {
                reason: e.to_string(),
            })?;

        Ok(match employee_id {
            Some(employee_id) => Resolution::Employee(employee_id),
            None => Resolution::Unknown,
        })
    }

    async fn employee(&self, employee_id: &str) -> Result<Option<Employee>, DirectoryError> {
        let employee = sqlx::query_as::<_, Employee>(
            r#"
            SELECT employee_id, name, rfid_tag, is_active
            FROM employees
            WHERE employee_id = ?
            "#,
        )
        .bind(employee_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(employee)
    }

    async fn block_registered(&self, block: &str) -> Result<bool, DirectoryError> {
        self.blocks
            .try_get_with(block.to_owned(), async {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    SELECT COUNT(*)
                    FROM blocks
                    WHERE block = ?
                    "#,
                )
                .bind(block)
                .fetch_one(&self.pool)
                .await
                .map(|count| count > 0)
            })
            .await
            .map_err(|e| DirectoryError::Unavailable {
                reason: e.to_string(),
            })
    }
}
