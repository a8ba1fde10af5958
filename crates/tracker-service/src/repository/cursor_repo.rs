//! 游标仓储

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, instrument};

use super::traits::{CursorState, CursorStore};
use crate::error::Result;

#[derive(sqlx::FromRow)]
struct CursorRow {
    next_cursor: Option<String>,
    last_published_cursor: Option<String>,
    consumer_version: i64,
}

pub struct CursorRepository {
    pool: PgPool,
}

impl CursorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for CursorRepository {
    async fn load(&self, event_id: i64) -> Result<CursorState> {
        let row = sqlx::query_as::<_, CursorRow>(
            r#"
            SELECT next_cursor, last_published_cursor, consumer_version
            FROM change_cursors
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|r| CursorState {
                next_cursor: r.next_cursor,
                last_published_cursor: r.last_published_cursor,
                consumer_version: r.consumer_version,
            })
            .unwrap_or_default())
    }

    async fn record_published(&self, event_id: i64, cursor: &str, next_cursor: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO change_cursors (event_id, next_cursor, last_published_cursor, consumer_version, updated_at)
            VALUES ($1, $2, $3, 0, NOW())
            ON CONFLICT (event_id)
            DO UPDATE SET next_cursor = EXCLUDED.next_cursor,
                          last_published_cursor = EXCLUDED.last_published_cursor,
                          updated_at = NOW()
            "#,
        )
        .bind(event_id)
        .bind(next_cursor)
        .bind(cursor)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn bump_consumer_version(&self, event_id: i64) -> Result<i64> {
        let version: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO change_cursors (event_id, consumer_version, updated_at)
            VALUES ($1, 1, NOW())
            ON CONFLICT (event_id)
            DO UPDATE SET consumer_version = change_cursors.consumer_version + 1, updated_at = NOW()
            RETURNING consumer_version
            "#,
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        info!(event_id, version, "消费组版本已递增");
        Ok(version)
    }
}
