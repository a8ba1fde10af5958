//! 匹配记录仓储
//!
//! 批量写入使用 UNNEST 展开列数组，一条 INSERT 写入一批。
//! 幂等键为 (objective_id, user_id, change_id, item_id)，重复写入直接忽略。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use league_shared::objectives::{MatchCandidate, ObjectiveId, ObjectiveMatch, StashObservation, SyncStatus};
use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument};

use super::traits::MatchStore;
use crate::error::Result;

const INSERT_MATCHES: &str = r#"
    INSERT INTO objective_matches
        (objective_id, user_id, number, timestamp, change_id, stash_id, item_id)
    SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::bigint[], $4::timestamptz[],
                         $5::text[], $6::text[], $7::text[])
    ON CONFLICT (objective_id, user_id, change_id, item_id) DO NOTHING
"#;

#[derive(sqlx::FromRow)]
struct MatchRow {
    id: i64,
    objective_id: i64,
    user_id: i64,
    number: i64,
    timestamp: DateTime<Utc>,
    change_id: Option<String>,
    stash_id: Option<String>,
    item_id: Option<String>,
}

impl From<MatchRow> for ObjectiveMatch {
    fn from(row: MatchRow) -> Self {
        Self {
            id: row.id,
            objective_id: row.objective_id,
            user_id: row.user_id,
            number: row.number,
            timestamp: row.timestamp,
            change_id: row.change_id,
            stash_id: row.stash_id,
            item_id: row.item_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ObservationRow {
    stash_id: String,
    observed_at: DateTime<Utc>,
    item_ids: Vec<String>,
}

pub struct MatchRepository {
    pool: PgPool,
    batch_size: usize,
}

impl MatchRepository {
    pub fn new(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    /// 在事务中分批写入
    async fn insert_in_tx(tx: &mut PgConnection, candidates: &[MatchCandidate], batch_size: usize) -> Result<u64> {
        let mut inserted = 0;
        for chunk in candidates.chunks(batch_size) {
            let objective_ids: Vec<i64> = chunk.iter().map(|c| c.objective_id).collect();
            let user_ids: Vec<i64> = chunk.iter().map(|c| c.user_id).collect();
            let numbers: Vec<i64> = chunk.iter().map(|c| c.number).collect();
            let timestamps: Vec<DateTime<Utc>> = chunk.iter().map(|c| c.timestamp).collect();
            let change_ids: Vec<Option<String>> = chunk.iter().map(|c| c.change_id.clone()).collect();
            let stash_ids: Vec<Option<String>> = chunk.iter().map(|c| c.stash_id.clone()).collect();
            let item_ids: Vec<Option<String>> = chunk.iter().map(|c| c.item_id.clone()).collect();

            let result = sqlx::query(INSERT_MATCHES)
                .bind(&objective_ids)
                .bind(&user_ids)
                .bind(&numbers)
                .bind(&timestamps)
                .bind(&change_ids)
                .bind(&stash_ids)
                .bind(&item_ids)
                .execute(&mut *tx)
                .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }
}

#[async_trait]
impl MatchStore for MatchRepository {
    async fn insert_matches(&self, candidates: &[MatchCandidate]) -> Result<u64> {
        if candidates.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let inserted = Self::insert_in_tx(&mut tx, candidates, self.batch_size).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn mark_syncing(&self, objective_ids: &[ObjectiveId], target_cursor: Option<String>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO objective_sync_state (objective_id, status, target_cursor, updated_at)
            SELECT id, $2, $3, NOW() FROM UNNEST($1::bigint[]) AS id
            ON CONFLICT (objective_id)
            DO UPDATE SET status = EXCLUDED.status,
                          target_cursor = EXCLUDED.target_cursor,
                          updated_at = NOW()
            "#,
        )
        .bind(objective_ids)
        .bind(SyncStatus::Syncing.as_str())
        .bind(target_cursor)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, backlog), fields(backlog = backlog.len()))]
    async fn complete_sync(&self, objective_ids: &[ObjectiveId], backlog: &[MatchCandidate]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM objective_matches WHERE objective_id = ANY($1)")
            .bind(objective_ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let inserted = Self::insert_in_tx(&mut tx, backlog, self.batch_size).await?;

        sqlx::query(
            r#"
            INSERT INTO objective_sync_state (objective_id, status, target_cursor, updated_at)
            SELECT id, $2, NULL, NOW() FROM UNNEST($1::bigint[]) AS id
            ON CONFLICT (objective_id)
            DO UPDATE SET status = EXCLUDED.status, target_cursor = NULL, updated_at = NOW()
            "#,
        )
        .bind(objective_ids)
        .bind(SyncStatus::Synced.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            objectives = objective_ids.len(),
            deleted,
            inserted,
            "同步完成，匹配记录已替换"
        );
        Ok(inserted)
    }

    async fn load_matches(&self, event_id: i64) -> Result<Vec<ObjectiveMatch>> {
        let rows = sqlx::query_as::<_, MatchRow>(
            r#"
            SELECT m.id, m.objective_id, m.user_id, m.number, m.timestamp,
                   m.change_id, m.stash_id, m.item_id
            FROM objective_matches m
            JOIN objectives o ON o.id = m.objective_id
            WHERE o.event_id = $1
            ORDER BY m.id
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ObjectiveMatch::from).collect())
    }

    async fn upsert_observations(&self, event_id: i64, observations: &[StashObservation]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for observation in observations {
            sqlx::query(
                r#"
                INSERT INTO stash_observations (stash_id, event_id, observed_at, item_ids)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (stash_id, event_id)
                DO UPDATE SET observed_at = EXCLUDED.observed_at, item_ids = EXCLUDED.item_ids
                WHERE stash_observations.observed_at <= EXCLUDED.observed_at
                "#,
            )
            .bind(&observation.stash_id)
            .bind(event_id)
            .bind(observation.observed_at)
            .bind(&observation.item_ids)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_observations(&self, event_id: i64) -> Result<Vec<StashObservation>> {
        let rows = sqlx::query_as::<_, ObservationRow>(
            "SELECT stash_id, observed_at, item_ids FROM stash_observations WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StashObservation {
                stash_id: r.stash_id,
                observed_at: r.observed_at,
                item_ids: r.item_ids,
            })
            .collect())
    }
}
