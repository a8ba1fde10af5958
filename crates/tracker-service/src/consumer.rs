//! 消费循环
//!
//! 按日志顺序消费批次：对被追踪账号的仓库页逐个物品求值，产出候选匹配并记录仓库观测。
//! 同步期间候选匹配进入积压区，消费游标到达目标后一次性替换待同步目标的匹配记录。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use league_shared::config::KafkaConfig;
use league_shared::kafka::{KafkaConsumer, topics};
use league_shared::objectives::{
    MatchCandidate, Objective, ObjectiveId, ObjectiveType, StashObservation, SyncStatus, UserId,
};
use league_shared::observability::metrics;
use league_shared::stash::StashChangeBatch;
use objective_matcher::{MatchingEngine, TimeValidation};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::cursor::ChangeCursor;
use crate::error::Result;
use crate::jobs::wait_or_shutdown;
use crate::repository::{CursorStore, MatchStore, ObjectiveSource};
use crate::sync_state::SyncTracker;

/// 单个批次的处理结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub candidates: usize,
    pub written: u64,
    /// 本批次完成同步的目标
    pub synced: Vec<ObjectiveId>,
}

pub struct BatchProcessor {
    event_id: i64,
    engine: Arc<MatchingEngine>,
    tracker: Arc<SyncTracker>,
    store: Arc<dyn MatchStore>,
    accounts: RwLock<HashMap<String, UserId>>,
}

impl BatchProcessor {
    pub fn new(
        event_id: i64,
        engine: Arc<MatchingEngine>,
        tracker: Arc<SyncTracker>,
        store: Arc<dyn MatchStore>,
    ) -> Self {
        Self {
            event_id,
            engine,
            tracker,
            store,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<MatchingEngine> {
        &self.engine
    }

    pub fn tracker(&self) -> &Arc<SyncTracker> {
        &self.tracker
    }

    /// 替换被追踪账号表（账号名 -> 用户）
    pub fn set_accounts(&self, accounts: HashMap<String, UserId>) {
        *self.accounts.write() = accounts;
    }

    #[instrument(skip(self, batch), fields(event_id = self.event_id, cursor = %batch.cursor))]
    pub async fn process(&self, batch: &StashChangeBatch) -> Result<BatchOutcome> {
        let started = Instant::now();
        let cursor: ChangeCursor = batch.cursor.parse()?;
        let syncing = self.tracker.is_syncing();

        let (candidates, observations, items) = self.evaluate(batch, syncing);

        if !observations.is_empty() {
            self.store.upsert_observations(self.event_id, &observations).await?;
        }

        let mut outcome = BatchOutcome {
            candidates: candidates.len(),
            ..BatchOutcome::default()
        };

        if syncing {
            self.tracker.accumulate(candidates);
            metrics::set_sync_backlog(self.event_id, self.tracker.backlog_len());

            if let Some(completion) = self.tracker.observe(&cursor) {
                outcome.written = self
                    .store
                    .complete_sync(&completion.objectives, &completion.backlog)
                    .await?;
                outcome.synced = completion.objectives;
                metrics::set_sync_backlog(self.event_id, 0);
            }
        } else if !candidates.is_empty() {
            outcome.written = self.store.insert_matches(&candidates).await?;
        }

        if outcome.written > 0 {
            metrics::record_matches_flushed(self.event_id, outcome.written as usize);
        }
        metrics::record_batch_consumed(self.event_id, items, started.elapsed().as_secs_f64());

        debug!(
            candidates = outcome.candidates,
            written = outcome.written,
            syncing,
            "批次已处理"
        );
        Ok(outcome)
    }

    /// 返回 (候选匹配, 仓库观测, 求值物品数)
    ///
    /// 同步期间待同步目标关闭有效窗口校验，其余目标仍以批次时间校验，
    /// 重放时不会给已同步目标补出窗口外的匹配。
    fn evaluate(
        &self,
        batch: &StashChangeBatch,
        syncing: bool,
    ) -> (Vec<MatchCandidate>, Vec<StashObservation>, usize) {
        let accounts = self.accounts.read();
        let at = TimeValidation::At(batch.timestamp);

        let mut candidates = Vec::new();
        let mut observations = Vec::new();
        let mut items = 0;

        for stash in &batch.stashes {
            let Some(user_id) = stash
                .account_name
                .as_deref()
                .and_then(|name| accounts.get(name).copied())
            else {
                continue;
            };

            observations.push(StashObservation {
                stash_id: stash.id.clone(),
                observed_at: batch.timestamp,
                item_ids: stash.items.iter().filter_map(|i| i.id.clone()).collect(),
            });

            for item in &stash.items {
                items += 1;

                let mut completions = self.engine.evaluate(item, at);
                if syncing {
                    completions.retain(|c| !self.tracker.is_pending(c.objective_id));
                    completions.extend(
                        self.engine
                            .evaluate(item, TimeValidation::Disabled)
                            .into_iter()
                            .filter(|c| self.tracker.is_pending(c.objective_id)),
                    );
                }

                candidates.extend(completions.into_iter().map(|c| MatchCandidate {
                    objective_id: c.objective_id,
                    user_id,
                    number: c.number,
                    timestamp: batch.timestamp,
                    change_id: Some(batch.cursor.clone()),
                    stash_id: Some(stash.id.clone()),
                    item_id: item.id.clone(),
                }));
            }
        }

        (candidates, observations, items)
    }
}

/// 只有物品目标由日志重放产出
fn needs_sync(objective_type: ObjectiveType, status: SyncStatus) -> bool {
    objective_type == ObjectiveType::Item && status != SyncStatus::Synced
}

pub struct ConsumeLoop {
    event_id: i64,
    kafka: KafkaConfig,
    source: Arc<dyn ObjectiveSource>,
    store: Arc<dyn MatchStore>,
    cursors: Arc<dyn CursorStore>,
    processor: Arc<BatchProcessor>,
    refresh_interval: Duration,
}

impl ConsumeLoop {
    pub fn new(
        event_id: i64,
        kafka: KafkaConfig,
        source: Arc<dyn ObjectiveSource>,
        store: Arc<dyn MatchStore>,
        cursors: Arc<dyn CursorStore>,
        processor: Arc<BatchProcessor>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            event_id,
            kafka,
            source,
            store,
            cursors,
            processor,
            refresh_interval,
        }
    }

    /// 加载目标和账号，需要时开始同步；返回本次使用的消费组版本
    ///
    /// 日志为空时没有可重放的内容，待同步目标直接标记为已同步。
    /// 否则递增消费组版本从日志起点重放，目标游标为最后一个已写入批次的游标。
    #[instrument(skip(self), fields(event_id = self.event_id))]
    pub async fn prepare(&self) -> Result<i64> {
        let objectives = self.source.load_objectives(self.event_id).await?;
        let version = self.source.objective_set_version(self.event_id).await?;
        let skipped = self.processor.engine().reload(version, &objectives);
        if !skipped.is_empty() {
            warn!(?skipped, "部分目标条件编译失败，已跳过");
        }
        self.processor
            .set_accounts(self.source.load_accounts(self.event_id).await?);

        let pending: Vec<ObjectiveId> = objectives
            .iter()
            .filter(|o| needs_sync(o.objective_type, o.sync_status))
            .map(|o| o.id)
            .collect();

        let state = self.cursors.load(self.event_id).await?;
        if pending.is_empty() {
            return Ok(state.consumer_version);
        }

        match state.last_published_cursor {
            None => {
                self.store.complete_sync(&pending, &[]).await?;
                info!(objectives = pending.len(), "日志为空，目标直接标记为已同步");
                Ok(state.consumer_version)
            }
            Some(target) => {
                let target_cursor: ChangeCursor = target.parse()?;
                self.store.mark_syncing(&pending, Some(target)).await?;
                let consumer_version = self.cursors.bump_consumer_version(self.event_id).await?;
                self.processor.tracker().begin(pending, target_cursor);
                Ok(consumer_version)
            }
        }
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let version = self.prepare().await?;

        let topic = topics::for_event(&self.kafka.topic_prefix, self.event_id);
        let group = topics::consumer_group(&self.kafka.consumer_group_prefix, self.event_id, version);
        let consumer = KafkaConsumer::new(&self.kafka, &group)?;
        consumer.subscribe(&[topic.as_str()])?;

        info!(event_id = self.event_id, topic = %topic, group = %group, "消费循环已启动");

        let refresher = tokio::spawn(refresh_objectives(
            self.event_id,
            Arc::clone(&self.source),
            Arc::clone(&self.processor),
            self.refresh_interval,
            shutdown.clone(),
        ));

        let processor = Arc::clone(&self.processor);
        let result = consumer
            .start(shutdown, |msg| {
                let processor = Arc::clone(&processor);
                async move {
                    let batch: StashChangeBatch = msg.deserialize_payload()?;
                    processor
                        .process(&batch)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.into_shared())
                }
            })
            .await;

        refresher.abort();
        info!(event_id = self.event_id, "消费循环已停止");
        Ok(result?)
    }
}

/// 目标集合版本变化时重新编译派发表并刷新账号表
///
/// 新增的目标要等下一次启动消费任务时才会重放补齐历史。
async fn refresh_objectives(
    event_id: i64,
    source: Arc<dyn ObjectiveSource>,
    processor: Arc<BatchProcessor>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if wait_or_shutdown(&mut shutdown, interval).await {
            return;
        }

        let refreshed = reload_objectives(event_id, source.as_ref(), &processor).await;

        match refreshed {
            Ok(Some(objectives)) => {
                let unsynced = objectives
                    .iter()
                    .filter(|o| needs_sync(o.objective_type, o.sync_status))
                    .count();
                if unsynced > 0 {
                    warn!(event_id, unsynced, "存在未同步的新目标，重启消费任务后补齐历史");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(event_id, code = e.code(), error = %e, "刷新目标失败"),
        }
    }
}

/// 版本未变时返回 `None`
async fn reload_objectives(
    event_id: i64,
    source: &dyn ObjectiveSource,
    processor: &BatchProcessor,
) -> Result<Option<Vec<Objective>>> {
    let version = source.objective_set_version(event_id).await?;
    if version == processor.engine().version() {
        return Ok(None);
    }
    let objectives = source.load_objectives(event_id).await?;
    processor.engine().reload_if_changed(version, &objectives);
    processor.set_accounts(source.load_accounts(event_id).await?);
    info!(event_id, version, objectives = objectives.len(), "目标集合已刷新");
    Ok(Some(objectives))
}

#[cfg(test)]
mod tests {
    use league_shared::objectives::{NumberField, ValidityWindow};
    use league_shared::test_utils::{ItemBuilder, TestDataGenerator, ts};
    use objective_matcher::Normalizer;

    use super::*;
    use crate::repository::{CursorState, MockCursorStore, MockMatchStore, MockObjectiveSource};

    fn processor(store: MockMatchStore, objectives: &[Objective]) -> BatchProcessor {
        let engine = Arc::new(MatchingEngine::new(Normalizer::default()));
        engine.reload(1, objectives);
        let processor = BatchProcessor::new(7, engine, Arc::new(SyncTracker::new()), Arc::new(store));
        processor.set_accounts(HashMap::from([("alice".to_string(), 10)]));
        processor
    }

    fn objectives() -> Vec<Objective> {
        vec![
            TestDataGenerator::base_type_objective(1, "Chaos Orb").with_number_field(NumberField::StackSize),
            TestDataGenerator::base_type_objective(2, "Exalted Orb")
                .with_window(ValidityWindow::new(Some(ts(100)), None)),
        ]
    }

    fn batch() -> StashChangeBatch {
        TestDataGenerator::batch(
            "3-4",
            "3-5",
            ts(10),
            vec![
                TestDataGenerator::stash(
                    "s1",
                    "alice",
                    "Settlers",
                    vec![
                        ItemBuilder::new("Chaos Orb").id("i1").stack_size(7).build(),
                        ItemBuilder::new("Exalted Orb").id("i2").build(),
                    ],
                ),
                TestDataGenerator::stash("s2", "mallory", "Settlers", vec![ItemBuilder::new("Chaos Orb").id("i3").build()]),
            ],
        )
    }

    #[tokio::test]
    async fn test_process_inserts_tracked_matches() {
        let mut store = MockMatchStore::new();
        store
            .expect_upsert_observations()
            .times(1)
            .withf(|event_id, obs| *event_id == 7 && obs.len() == 1 && obs[0].item_ids == vec!["i1", "i2"])
            .returning(|_, _| Ok(()));
        store
            .expect_insert_matches()
            .times(1)
            .withf(|candidates: &[MatchCandidate]| {
                // 目标 2 的有效窗口在批次时间之后
                candidates.len() == 1
                    && candidates[0].objective_id == 1
                    && candidates[0].number == 7
                    && candidates[0].change_id.as_deref() == Some("3-4")
                    && candidates[0].item_id.as_deref() == Some("i1")
            })
            .returning(|c| Ok(c.len() as u64));

        let outcome = processor(store, &objectives()).process(&batch()).await.unwrap();
        assert_eq!(outcome.candidates, 1);
        assert_eq!(outcome.written, 1);
    }

    #[tokio::test]
    async fn test_syncing_disables_window_for_pending_only() {
        let mut store = MockMatchStore::new();
        store.expect_upsert_observations().returning(|_, _| Ok(()));
        store.expect_insert_matches().never();
        store
            .expect_complete_sync()
            .times(1)
            .withf(|ids, backlog| ids == [2] && backlog.len() == 2)
            .returning(|_, backlog| Ok(backlog.len() as u64));

        let processor = processor(store, &objectives());
        processor.tracker().begin([2], "3-4".parse().unwrap());

        let outcome = processor.process(&batch()).await.unwrap();
        assert_eq!(outcome.synced, vec![2]);
        assert_eq!(outcome.written, 2);
        assert!(!processor.tracker().is_syncing());
    }

    #[tokio::test]
    async fn test_invalid_cursor_is_rejected() {
        let processor = processor(MockMatchStore::new(), &objectives());
        let mut bad = batch();
        bad.cursor = "abc".to_string();
        let err = processor.process(&bad).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_CURSOR");
    }

    fn consume_loop(source: MockObjectiveSource, store: MockMatchStore, cursors: MockCursorStore) -> ConsumeLoop {
        let engine = Arc::new(MatchingEngine::new(Normalizer::default()));
        let store: Arc<dyn MatchStore> = Arc::new(store);
        let processor = Arc::new(BatchProcessor::new(
            7,
            engine,
            Arc::new(SyncTracker::new()),
            Arc::clone(&store),
        ));
        ConsumeLoop::new(
            7,
            KafkaConfig::default(),
            Arc::new(source),
            store,
            Arc::new(cursors),
            processor,
            Duration::from_secs(60),
        )
    }

    fn source_with(objectives: Vec<Objective>) -> MockObjectiveSource {
        let mut source = MockObjectiveSource::new();
        source
            .expect_load_objectives()
            .returning(move |_| Ok(objectives.clone()));
        source.expect_objective_set_version().returning(|_| Ok(3));
        source
            .expect_load_accounts()
            .returning(|_| Ok(HashMap::new()));
        source
    }

    #[tokio::test]
    async fn test_prepare_begins_replay_for_desynced_objectives() {
        let objectives = vec![
            TestDataGenerator::base_type_objective(1, "Chaos Orb").with_sync_status(SyncStatus::Synced),
            TestDataGenerator::base_type_objective(2, "Exalted Orb").with_sync_status(SyncStatus::Desynced),
        ];

        let mut cursors = MockCursorStore::new();
        cursors.expect_load().returning(|_| {
            Ok(CursorState {
                next_cursor: Some("8-1".to_string()),
                last_published_cursor: Some("8-0".to_string()),
                consumer_version: 2,
            })
        });
        cursors.expect_bump_consumer_version().times(1).returning(|_| Ok(3));

        let mut store = MockMatchStore::new();
        store
            .expect_mark_syncing()
            .times(1)
            .withf(|ids, target| ids == [2] && target.as_deref() == Some("8-0"))
            .returning(|_, _| Ok(()));

        let consume = consume_loop(source_with(objectives), store, cursors);
        assert_eq!(consume.prepare().await.unwrap(), 3);
        assert_eq!(consume.processor.engine().version(), 3);
        assert_eq!(consume.processor.tracker().pending(), vec![2]);
        assert_eq!(consume.processor.tracker().target().unwrap().to_string(), "8-0");
    }

    #[tokio::test]
    async fn test_prepare_with_empty_log_marks_synced() {
        let objectives = vec![TestDataGenerator::base_type_objective(2, "Exalted Orb")
            .with_sync_status(SyncStatus::Desynced)];

        let mut cursors = MockCursorStore::new();
        cursors.expect_load().returning(|_| Ok(CursorState::default()));
        cursors.expect_bump_consumer_version().never();

        let mut store = MockMatchStore::new();
        store
            .expect_complete_sync()
            .times(1)
            .withf(|ids, backlog| ids == [2] && backlog.is_empty())
            .returning(|_, _| Ok(0));

        let consume = consume_loop(source_with(objectives), store, cursors);
        assert_eq!(consume.prepare().await.unwrap(), 0);
        assert!(!consume.processor.tracker().is_syncing());
    }

    #[test]
    fn test_needs_sync() {
        assert!(needs_sync(ObjectiveType::Item, SyncStatus::Desynced));
        assert!(needs_sync(ObjectiveType::Item, SyncStatus::Syncing));
        assert!(!needs_sync(ObjectiveType::Item, SyncStatus::Synced));
        assert!(!needs_sync(ObjectiveType::Player, SyncStatus::Desynced));
    }
}
