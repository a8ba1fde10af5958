//! 玩家目标轮询
//!
//! 玩家状态由外部刷新器写入注册表。每个周期对全部玩家求值，
//! 只有数量相对上一周期发生变化的命中才写入匹配记录。
//! 玩家匹配没有批次游标，以轮询时间作为 `change_id`，
//! 同一玩家同一目标的多次进度各占一行。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use league_shared::objectives::{MatchCandidate, ObjectiveId, UserId};
use objective_matcher::{PlayerObjectiveChecker, PlayerRegistry};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::jobs::wait_or_shutdown;
use crate::repository::{MatchStore, ObjectiveSource};

/// 玩家匹配的 `change_id`
pub fn player_change_id(polled_at: DateTime<Utc>) -> String {
    format!("player@{}", polled_at.timestamp_millis())
}

pub struct PlayerPollLoop {
    event_id: i64,
    registry: PlayerRegistry,
    source: Arc<dyn ObjectiveSource>,
    store: Arc<dyn MatchStore>,
    interval: Duration,
    checker: Mutex<(i64, Arc<PlayerObjectiveChecker>)>,
    last_numbers: Mutex<HashMap<(UserId, ObjectiveId), i64>>,
}

impl PlayerPollLoop {
    pub fn new(
        event_id: i64,
        registry: PlayerRegistry,
        source: Arc<dyn ObjectiveSource>,
        store: Arc<dyn MatchStore>,
        interval: Duration,
    ) -> Self {
        Self {
            event_id,
            registry,
            source,
            store,
            interval,
            checker: Mutex::new((i64::MIN, Arc::new(PlayerObjectiveChecker::default()))),
            last_numbers: Mutex::new(HashMap::new()),
        }
    }

    /// 注册赛事全部账号，已注册的保持原状态
    async fn register_accounts(&self) -> Result<()> {
        let accounts = self.source.load_accounts(self.event_id).await?;
        for (account_name, user_id) in &accounts {
            if self.registry.get(*user_id).is_none() {
                self.registry.register(*user_id, account_name);
            }
        }
        Ok(())
    }

    /// 目标集合版本变化时重建检查器
    async fn current_checker(&self) -> Result<Arc<PlayerObjectiveChecker>> {
        let version = self.source.objective_set_version(self.event_id).await?;
        {
            let guard = self.checker.lock();
            if guard.0 == version {
                return Ok(Arc::clone(&guard.1));
            }
        }

        let objectives = self.source.load_objectives(self.event_id).await?;
        let checker = Arc::new(PlayerObjectiveChecker::build(&objectives));
        info!(event_id = self.event_id, version, objectives = checker.len(), "玩家目标检查器已重建");
        *self.checker.lock() = (version, Arc::clone(&checker));
        Ok(checker)
    }

    /// 一个周期的求值；只返回数量变化的命中
    pub fn tick(&self, checker: &PlayerObjectiveChecker, now: DateTime<Utc>) -> Vec<MatchCandidate> {
        let mut last = self.last_numbers.lock();
        let mut candidates = Vec::new();
        let change_id = player_change_id(now);

        for state in self.registry.snapshot_all() {
            for completion in checker.check(&state) {
                let key = (state.user_id, completion.objective_id);
                if last.insert(key, completion.number) == Some(completion.number) {
                    continue;
                }
                candidates.push(MatchCandidate {
                    objective_id: completion.objective_id,
                    user_id: state.user_id,
                    number: completion.number,
                    timestamp: now,
                    change_id: Some(change_id.clone()),
                    stash_id: None,
                    item_id: None,
                });
            }
        }
        candidates
    }

    pub async fn poll_once(&self) -> Result<usize> {
        // 队伍成员可能随时变化，与目标集合版本无关
        self.register_accounts().await?;
        let checker = self.current_checker().await?;
        let candidates = self.tick(&checker, Utc::now());
        if !candidates.is_empty() {
            self.store.insert_matches(&candidates).await?;
        }
        debug!(event_id = self.event_id, changed = candidates.len(), "玩家目标轮询完成");
        Ok(candidates.len())
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(event_id = self.event_id, interval_secs = self.interval.as_secs(), "玩家轮询已启动");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.poll_once().await {
                Ok(_) => {}
                Err(e) if e.is_storage() => return Err(e),
                Err(e) => warn!(event_id = self.event_id, code = e.code(), error = %e, "玩家轮询失败"),
            }
            if wait_or_shutdown(&mut shutdown, self.interval).await {
                break;
            }
        }
        info!(event_id = self.event_id, "玩家轮询已停止");
        Ok(())
    }
}
