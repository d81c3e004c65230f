use async_trait::async_trait;
use chrono::{DateTime, Utc};

use signoff_core::{StoreError, UserDirectory, UserId};

use super::backend;
use crate::DbPool;

/// Identity lookups against the `app_user` table. Unknown users are
/// reported inactive rather than an error.
pub struct SqlUserDirectory {
    pool: DbPool,
}

impl SqlUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_user(
        &self,
        user: &UserId,
        display_name: Option<&str>,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO app_user (id, display_name, active, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 active = excluded.active",
        )
        .bind(&user.0)
        .bind(display_name)
        .bind(i64::from(active))
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}

#[async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn is_active(&self, user: &UserId) -> Result<bool, StoreError> {
        let active: Option<i64> =
            sqlx::query_scalar("SELECT active FROM app_user WHERE id = ?")
                .bind(&user.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        Ok(active == Some(1))
    }
}
