//! 周期性计分
//!
//! 每个周期从存储读取目标、匹配、队伍和仓库观测，执行一次计分，
//! 有变化时把变化和队伍总分发布到赛事的计分变更 topic。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use league_shared::kafka::{KafkaProducer, topics};
use league_shared::objectives::TeamId;
use scoring_engine::{ScoreChange, ScoringEngine, ScoringInput};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::jobs::wait_or_shutdown;
use crate::repository::{MatchStore, ObjectiveSource};

/// 发布到计分变更 topic 的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    pub event_id: i64,
    pub changes: Vec<ScoreChange>,
    pub totals: BTreeMap<TeamId, f64>,
    pub computed_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScoreSink: Send + Sync {
    async fn publish(&self, update: &ScoreUpdate) -> Result<()>;
}

pub struct KafkaScoreSink {
    producer: KafkaProducer,
}

impl KafkaScoreSink {
    pub fn new(producer: KafkaProducer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl ScoreSink for KafkaScoreSink {
    async fn publish(&self, update: &ScoreUpdate) -> Result<()> {
        let topic = topics::score_changes(update.event_id);
        self.producer
            .send_json(&topic, &update.event_id.to_string(), update)
            .await?;
        Ok(())
    }
}

pub struct ScoringLoop {
    event_id: i64,
    source: Arc<dyn ObjectiveSource>,
    store: Arc<dyn MatchStore>,
    sink: Arc<dyn ScoreSink>,
    engine: ScoringEngine,
    interval: Duration,
}

impl ScoringLoop {
    pub fn new(
        event_id: i64,
        source: Arc<dyn ObjectiveSource>,
        store: Arc<dyn MatchStore>,
        sink: Arc<dyn ScoreSink>,
        interval: Duration,
    ) -> Self {
        Self {
            event_id,
            source,
            store,
            sink,
            engine: ScoringEngine::new(event_id),
            interval,
        }
    }

    async fn load_input(&self) -> Result<ScoringInput> {
        Ok(ScoringInput {
            objectives: self.source.load_objectives(self.event_id).await?,
            matches: self.store.load_matches(self.event_id).await?,
            teams: self.source.load_teams(self.event_id).await?,
            observations: self.store.load_observations(self.event_id).await?,
        })
    }

    /// 执行一次计分；没有变化时不发布，返回 `None`
    pub async fn score_once(&self) -> Result<Option<ScoreUpdate>> {
        let input = self.load_input().await?;
        let pass = self.engine.run_pass(input).await?;

        if pass.changes.is_empty() {
            debug!(event_id = self.event_id, "计分无变化");
            return Ok(None);
        }

        let update = ScoreUpdate {
            event_id: self.event_id,
            changes: pass.changes,
            totals: pass.totals,
            computed_at: Utc::now(),
        };
        self.sink.publish(&update).await?;
        info!(event_id = self.event_id, changes = update.changes.len(), "计分变化已发布");
        Ok(Some(update))
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(event_id = self.event_id, interval_secs = self.interval.as_secs(), "计分循环已启动");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.score_once().await {
                Ok(_) => {}
                Err(e) => {
                    // 丢弃上一次快照，下个周期重新发布全部分数
                    self.engine.reset();
                    warn!(event_id = self.event_id, code = e.code(), error = %e, "计分失败，下个周期重试");
                }
            }
            if wait_or_shutdown(&mut shutdown, self.interval).await {
                break;
            }
        }
        info!(event_id = self.event_id, "计分循环已停止");
        Ok(())
    }
}
