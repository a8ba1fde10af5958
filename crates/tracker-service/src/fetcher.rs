//! 抓取循环
//!
//! 从持久化游标（或配置的起始游标）开始反复拉取变更页，过滤到赛事的物品池后
//! 写入持久日志。只有写入成功后才推进并持久化游标；写入或持久化失败时循环终止。
//! 拉取错误按类型退避，连续错误达到阈值时熔断终止。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use league_shared::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use league_shared::config::FeedConfig;
use league_shared::observability::metrics;
use league_shared::stash::{ChangePage, PublicStash, StashChangeBatch};
use objective_matcher::Normalizer;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::batch_log::BatchLog;
use crate::cursor::ChangeCursor;
use crate::error::{Result, SyncError};
use crate::feed::ChangeFeedClient;
use crate::jobs::wait_or_shutdown;
use crate::repository::CursorStore;

/// 一次运行的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub pages: u64,
    pub last_cursor: Option<String>,
}

pub struct FetchLoop {
    event_id: i64,
    league: String,
    feed: Arc<dyn ChangeFeedClient>,
    log: Arc<dyn BatchLog>,
    cursors: Arc<dyn CursorStore>,
    normalizer: Normalizer,
    config: FeedConfig,
    breaker: CircuitBreaker,
}

impl FetchLoop {
    pub fn new(
        event_id: i64,
        league: impl Into<String>,
        feed: Arc<dyn ChangeFeedClient>,
        log: Arc<dyn BatchLog>,
        cursors: Arc<dyn CursorStore>,
        normalizer: Normalizer,
        config: FeedConfig,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new(format!("change-feed-{event_id}"))
                .with_failure_threshold(config.max_consecutive_errors),
        );
        Self {
            event_id,
            league: league.into(),
            feed,
            log,
            cursors,
            normalizer,
            config,
            breaker,
        }
    }

    async fn starting_cursor(&self) -> Result<Option<String>> {
        let state = self.cursors.load(self.event_id).await?;
        Ok(state.next_cursor.or_else(|| self.config.bootstrap_cursor.clone()))
    }

    /// 运行直到收到关闭信号、熔断或存储失败
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<FetchSummary> {
        let mut cursor = self.starting_cursor().await?;
        let mut summary = FetchSummary::default();

        info!(
            event_id = self.event_id,
            league = %self.league,
            cursor = cursor.as_deref().unwrap_or("<latest>"),
            "抓取循环已启动"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let result = tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }

                r = self.feed.fetch_page(cursor.clone()) => r,
            };

            match result {
                Ok(page) => {
                    self.breaker.record_success();

                    let next = page.next_change_id.clone();
                    let caught_up = cursor.as_deref() == Some(next.as_str());

                    if !(caught_up && page.stashes.is_empty()) {
                        let batch = self.to_batch(cursor.as_deref(), page);
                        metrics::record_page_fetched(self.event_id, batch.stashes.len());

                        self.log.publish(self.event_id, &batch).await?;
                        metrics::record_batch_published(self.event_id);
                        self.cursors
                            .record_published(self.event_id, &batch.cursor, &next)
                            .await?;
                        summary.pages += 1;
                    }

                    summary.last_cursor = Some(next.clone());
                    cursor = Some(next);

                    if caught_up
                        && wait_or_shutdown(
                            &mut shutdown,
                            Duration::from_secs(self.config.idle_wait_seconds),
                        )
                        .await
                    {
                        break;
                    }
                }
                Err(e) => {
                    metrics::record_fetch_error(self.event_id, e.code());

                    if self.breaker.record_failure() == CircuitState::Open {
                        let consecutive_failures = self.breaker.consecutive_failures();
                        error!(
                            event_id = self.event_id,
                            consecutive_failures,
                            error = %e,
                            "变更流连续失败，抓取循环终止"
                        );
                        return Err(SyncError::CircuitOpen {
                            consecutive_failures,
                        });
                    }

                    let backoff = e.backoff(&self.config);
                    warn!(
                        event_id = self.event_id,
                        code = e.code(),
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "拉取变更页失败，稍后重试"
                    );
                    if wait_or_shutdown(&mut shutdown, backoff).await {
                        break;
                    }
                }
            }
        }

        info!(
            event_id = self.event_id,
            pages = summary.pages,
            cursor = summary.last_cursor.as_deref().unwrap_or(""),
            "抓取循环已停止"
        );
        Ok(summary)
    }

    /// 过滤到赛事物品池并打包成批次
    fn to_batch(&self, cursor: Option<&str>, page: ChangePage) -> StashChangeBatch {
        let stashes = page
            .stashes
            .into_iter()
            .filter_map(|stash| self.filter_stash(stash))
            .collect();

        StashChangeBatch {
            cursor: cursor.map_or_else(|| ChangeCursor::origin().to_string(), str::to_string),
            next_cursor: page.next_change_id,
            stashes,
            timestamp: Utc::now(),
        }
    }

    /// 只保留赛事赛季的仓库页；清空的仓库页也保留，它表示物品已离开
    fn filter_stash(&self, mut stash: PublicStash) -> Option<PublicStash> {
        let in_league = match stash.league.as_deref() {
            Some(league) => league == self.league,
            None => stash.items.is_empty(),
        };
        if !in_league {
            return None;
        }
        stash.items.retain(|item| !self.normalizer.is_excluded(item));
        Some(stash)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use league_shared::config::NormalizationRule;
    use league_shared::test_utils::{ItemBuilder, TestDataGenerator};

    use super::*;
    use crate::batch_log::MockBatchLog;
    use crate::feed::{FeedError, MockChangeFeedClient};
    use crate::repository::{CursorState, MockCursorStore};

    fn config() -> FeedConfig {
        FeedConfig {
            default_retry_after_seconds: 0,
            error_backoff_seconds: 0,
            idle_wait_seconds: 0,
            ..FeedConfig::default()
        }
    }

    fn page(next: &str, stashes: Vec<PublicStash>) -> ChangePage {
        ChangePage {
            next_change_id: next.to_string(),
            stashes,
        }
    }

    fn cursor_store(next: Option<&str>) -> MockCursorStore {
        let mut store = MockCursorStore::new();
        let state = CursorState {
            next_cursor: next.map(String::from),
            ..CursorState::default()
        };
        store.expect_load().returning(move |_| Ok(state.clone()));
        store
    }

    fn fetch_loop(feed: MockChangeFeedClient, log: MockBatchLog, cursors: MockCursorStore) -> FetchLoop {
        FetchLoop::new(
            1,
            "Settlers",
            Arc::new(feed),
            Arc::new(log),
            Arc::new(cursors),
            Normalizer::new(vec![NormalizationRule::ExcludeFrameType {
                frame_types: vec![9],
            }]),
            config(),
        )
    }

    #[tokio::test]
    async fn test_consecutive_errors_trip_breaker() {
        let mut feed = MockChangeFeedClient::new();
        feed.expect_fetch_page()
            .times(5)
            .returning(|_| Err(FeedError::Http { status: 503 }));

        let mut log = MockBatchLog::new();
        log.expect_publish().never();

        let (_tx, rx) = watch::channel(false);
        let err = fetch_loop(feed, log, cursor_store(Some("1-1")))
            .run(rx)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::CircuitOpen { consecutive_failures: 5 }));
    }

    #[tokio::test]
    async fn test_success_resets_error_count_and_persists_after_publish() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut feed = MockChangeFeedClient::new();
        let counter = Arc::clone(&calls);
        feed.expect_fetch_page().returning(move |cursor| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(FeedError::RateLimited {
                    retry_after_secs: Some(0),
                }),
                2 => {
                    assert_eq!(cursor.as_deref(), Some("1-1"));
                    Ok(page(
                        "1-2",
                        vec![
                            TestDataGenerator::stash(
                                "s1",
                                "alice",
                                "Settlers",
                                vec![
                                    ItemBuilder::new("Chaos Orb").build(),
                                    ItemBuilder::new("Leather Belt").frame_type(9).build(),
                                ],
                            ),
                            TestDataGenerator::stash("s2", "bob", "Standard", vec![ItemBuilder::new("Chaos Orb").build()]),
                        ],
                    ))
                }
                _ => Err(FeedError::Transport("connection reset".to_string())),
            }
        });

        let mut log = MockBatchLog::new();
        log.expect_publish()
            .times(1)
            .withf(|event_id, batch| {
                *event_id == 1
                    && batch.cursor == "1-1"
                    && batch.next_cursor == "1-2"
                    && batch.stashes.len() == 1
                    && batch.stashes[0].items.len() == 1
            })
            .returning(|_, _| Ok(()));

        let mut cursors = cursor_store(Some("1-1"));
        cursors
            .expect_record_published()
            .times(1)
            .withf(|event_id, cursor, next| *event_id == 1 && cursor == "1-1" && next == "1-2")
            .returning(|_, _, _| Ok(()));

        let (_tx, rx) = watch::channel(false);
        let err = fetch_loop(feed, log, cursors).run(rx).await.unwrap_err();
        assert_eq!(err.code(), "CIRCUIT_OPEN");
        // 2 次限流 + 1 次成功 + 5 次连续错误
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_publish_failure_stops_without_advancing_cursor() {
        let mut feed = MockChangeFeedClient::new();
        feed.expect_fetch_page()
            .times(1)
            .returning(|_| Ok(page("2-0", vec![])));

        let mut log = MockBatchLog::new();
        log.expect_publish()
            .times(1)
            .returning(|_, _| Err(SyncError::LogWrite("broker unavailable".to_string())));

        let mut cursors = cursor_store(None);
        cursors.expect_record_published().never();

        let (_tx, rx) = watch::channel(false);
        let err = fetch_loop(feed, log, cursors).run(rx).await.unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let mut feed = MockChangeFeedClient::new();
        feed.expect_fetch_page().never();

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let summary = fetch_loop(feed, MockBatchLog::new(), cursor_store(None))
            .run(rx)
            .await
            .unwrap();
        assert_eq!(summary, FetchSummary::default());
    }

    #[test]
    fn test_first_page_from_latest_uses_origin_cursor() {
        let fetcher = fetch_loop(MockChangeFeedClient::new(), MockBatchLog::new(), MockCursorStore::new());

        let first = fetcher.to_batch(None, page("3-7", vec![]));
        let cursor: ChangeCursor = first.cursor.parse().unwrap();
        let next: ChangeCursor = first.next_cursor.parse().unwrap();
        assert!(cursor.is_origin());
        assert!(cursor < next);

        let resumed = fetcher.to_batch(Some("3-7"), page("3-9", vec![]));
        assert_eq!(resumed.cursor, "3-7");
    }

    #[test]
    fn test_filter_keeps_emptied_stash() {
        let fetcher = fetch_loop(MockChangeFeedClient::new(), MockBatchLog::new(), MockCursorStore::new());
        let mut emptied = TestDataGenerator::stash("s3", "alice", "Settlers", vec![]);
        emptied.league = None;
        assert!(fetcher.filter_stash(emptied).is_some());

        let other = TestDataGenerator::stash("s4", "bob", "Standard", vec![]);
        assert!(fetcher.filter_stash(other).is_none());
    }
}
