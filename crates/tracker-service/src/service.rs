//! 服务装配
//!
//! 持有仓储、Kafka 生产者和变更流客户端，按任务类型组装对应的循环交给任务管理器运行。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use league_shared::config::AppConfig;
use league_shared::database::Database;
use league_shared::kafka::KafkaProducer;
use objective_matcher::{MatchingEngine, Normalizer, PlayerRegistry};
use tracing::info;

use crate::batch_log::KafkaBatchLog;
use crate::consumer::{BatchProcessor, ConsumeLoop};
use crate::error::{Result, SyncError};
use crate::feed::{ChangeFeedClient, HttpChangeFeedClient};
use crate::fetcher::FetchLoop;
use crate::jobs::{JobRequest, JobRunner, JobStatus, JobType};
use crate::player_poll::PlayerPollLoop;
use crate::repository::{
    CursorRepository, CursorStore, MatchRepository, MatchStore, ObjectiveRepository, ObjectiveSource,
};
use crate::scoring_loop::{KafkaScoreSink, ScoringLoop};
use crate::sync_state::SyncTracker;

pub struct TrackerService {
    config: AppConfig,
    objectives: Arc<dyn ObjectiveSource>,
    matches: Arc<dyn MatchStore>,
    cursors: Arc<dyn CursorStore>,
    feed: Arc<dyn ChangeFeedClient>,
    producer: KafkaProducer,
    runner: JobRunner,
    players: DashMap<i64, PlayerRegistry>,
}

impl TrackerService {
    pub fn new(config: AppConfig, db: &Database) -> Result<Self> {
        let pool = db.pool().clone();
        let feed = HttpChangeFeedClient::new(&config.feed)?;
        let producer = KafkaProducer::new(&config.kafka)?;

        Ok(Self {
            objectives: Arc::new(ObjectiveRepository::new(pool.clone())),
            matches: Arc::new(MatchRepository::new(pool.clone(), config.sync.flush_batch_size)),
            cursors: Arc::new(CursorRepository::new(pool)),
            feed: Arc::new(feed),
            producer,
            runner: JobRunner::new(),
            players: DashMap::new(),
            config,
        })
    }

    fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.config.matching.normalization.clone())
    }

    /// 赛事的玩家注册表，外部刷新器通过它写入玩家状态
    pub fn player_registry(&self, event_id: i64) -> PlayerRegistry {
        self.players.entry(event_id).or_default().clone()
    }

    pub async fn start_job(&self, request: JobRequest) -> Result<()> {
        let event_id = request.event_id;
        let event = self
            .objectives
            .load_event(event_id)
            .await?
            .ok_or(SyncError::EventNotFound(event_id))?;

        match request.job_type {
            JobType::Fetch => {
                let fetch = FetchLoop::new(
                    event_id,
                    event.league,
                    Arc::clone(&self.feed),
                    Arc::new(KafkaBatchLog::new(
                        self.producer.clone(),
                        self.config.kafka.topic_prefix.clone(),
                    )),
                    Arc::clone(&self.cursors),
                    self.normalizer(),
                    self.config.feed.clone(),
                );
                self.runner
                    .start(request, move |rx| async move { fetch.run(rx).await.map(|_| ()) })
            }
            JobType::Consume => {
                let engine = Arc::new(MatchingEngine::new(self.normalizer()));
                let processor = Arc::new(BatchProcessor::new(
                    event_id,
                    engine,
                    Arc::new(SyncTracker::new()),
                    Arc::clone(&self.matches),
                ));
                let consume = ConsumeLoop::new(
                    event_id,
                    self.config.kafka.clone(),
                    Arc::clone(&self.objectives),
                    Arc::clone(&self.matches),
                    Arc::clone(&self.cursors),
                    processor,
                    Duration::from_secs(self.config.sync.objective_refresh_seconds),
                );
                self.runner.start(request, move |rx| consume.run(rx))
            }
            JobType::PlayerPoll => {
                let poll = PlayerPollLoop::new(
                    event_id,
                    self.player_registry(event_id),
                    Arc::clone(&self.objectives),
                    Arc::clone(&self.matches),
                    Duration::from_secs(self.config.sync.player_poll_interval_seconds),
                );
                self.runner
                    .start(request, move |rx| async move { poll.run(rx).await })
            }
            JobType::Score => {
                let scoring = ScoringLoop::new(
                    event_id,
                    Arc::clone(&self.objectives),
                    Arc::clone(&self.matches),
                    Arc::new(KafkaScoreSink::new(self.producer.clone())),
                    Duration::from_secs(self.config.sync.scoring_interval_seconds),
                );
                self.runner
                    .start(request, move |rx| async move { scoring.run(rx).await })
            }
        }
    }

    pub async fn stop_job(&self, event_id: i64, job_type: JobType) -> bool {
        self.runner.stop(event_id, job_type).await
    }

    pub fn jobs(&self) -> Vec<JobStatus> {
        self.runner.statuses()
    }

    /// 启动配置中声明的任务
    pub async fn start_configured_jobs(&self) -> Result<usize> {
        let mut started = 0;
        for spec in &self.config.jobs {
            for request in JobRequest::from_spec(spec)? {
                self.start_job(request).await?;
                started += 1;
            }
        }
        info!(started, "配置中的任务已启动");
        Ok(started)
    }

    pub async fn shutdown(&self) {
        self.runner.stop_all().await;
    }
}
