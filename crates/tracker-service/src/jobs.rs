//! 后台任务管理
//!
//! 每个 (赛事, 任务类型) 同时至多运行一个任务。任务通过 watch 通道接收关闭信号，
//! 到达结束时间时由任务自身的计时分支发出关闭信号，然后等待任务自然退出。

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use league_shared::config::JobSpec;
use league_shared::error::TrackerError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{Result, SyncError};

/// 等待一段时间，期间收到关闭信号则提前返回 `true`
pub(crate) async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        biased;

        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        _ = tokio::time::sleep(duration) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobType {
    /// 拉取变更流写入持久日志
    Fetch,
    /// 消费持久日志产出匹配记录
    Consume,
    /// 轮询玩家状态
    PlayerPoll,
    /// 周期性计分
    Score,
}

impl JobType {
    pub const ALL: &'static [JobType] = &[Self::Fetch, Self::Consume, Self::PlayerPoll, Self::Score];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "FETCH",
            Self::Consume => "CONSUME",
            Self::PlayerPoll => "PLAYER_POLL",
            Self::Score => "SCORE",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                SyncError::Shared(TrackerError::UnknownVariant {
                    kind: "JobType",
                    value: s.to_string(),
                })
            })
    }
}

/// 启动任务的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub event_id: i64,
    pub job_type: JobType,
    /// 缺省时一直运行到手动停止
    pub ends_at: Option<DateTime<Utc>>,
}

impl JobRequest {
    pub fn new(event_id: i64, job_type: JobType) -> Self {
        Self {
            event_id,
            job_type,
            ends_at: None,
        }
    }

    pub fn ending_at(mut self, ends_at: DateTime<Utc>) -> Self {
        self.ends_at = Some(ends_at);
        self
    }

    pub fn running_for(self, duration: chrono::Duration) -> Self {
        self.ending_at(Utc::now() + duration)
    }

    /// 展开配置中的任务声明；`ends_at` 优先于 `duration_minutes`
    pub fn from_spec(spec: &JobSpec) -> Result<Vec<Self>> {
        let ends_at = spec.ends_at.or_else(|| {
            spec.duration_minutes
                .and_then(|m| i64::try_from(m).ok())
                .map(|m| Utc::now() + chrono::Duration::minutes(m))
        });

        spec.job_types
            .iter()
            .map(|t| {
                Ok(Self {
                    event_id: spec.event_id,
                    job_type: t.parse()?,
                    ends_at,
                })
            })
            .collect()
    }
}

/// 运行中任务的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub event_id: i64,
    pub job_type: JobType,
    pub started_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub finished: bool,
}

struct RunningJob {
    shutdown: Arc<watch::Sender<bool>>,
    handle: JoinHandle<()>,
    started_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
}

type JobKey = (i64, JobType);

#[derive(Default)]
pub struct JobRunner {
    jobs: DashMap<JobKey, RunningJob>,
}

impl JobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动任务
    ///
    /// `job` 接收关闭信号并返回任务本体。同一键已有未结束的任务时返回
    /// `JobAlreadyRunning`；结束时间已过时返回 `JobExpired`。
    pub fn start<F, Fut>(&self, request: JobRequest, job: F) -> Result<()>
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let JobRequest {
            event_id,
            job_type,
            ends_at,
        } = request;

        if ends_at.is_some_and(|t| t <= Utc::now()) {
            return Err(SyncError::JobExpired {
                event_id,
                job_type: job_type.to_string(),
            });
        }

        let key = (event_id, job_type);
        if self.jobs.get(&key).is_some_and(|j| !j.handle.is_finished()) {
            return Err(SyncError::JobAlreadyRunning {
                event_id,
                job_type: job_type.to_string(),
            });
        }

        let (tx, rx) = watch::channel(false);
        let shutdown = Arc::new(tx);
        let deadline_signal = Arc::clone(&shutdown);
        let fut = job(rx);

        let handle = tokio::spawn(async move {
            let deadline = async move {
                match ends_at {
                    Some(t) => {
                        let remaining = (t - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                        tokio::time::sleep(remaining).await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::pin!(fut);
            tokio::pin!(deadline);

            let result = tokio::select! {
                r = &mut fut => r,
                _ = &mut deadline => {
                    info!(event_id, job_type = %job_type, "任务到达结束时间，发送关闭信号");
                    let _ = deadline_signal.send(true);
                    fut.await
                }
            };

            match result {
                Ok(()) => info!(event_id, job_type = %job_type, "任务已结束"),
                Err(e) => error!(event_id, job_type = %job_type, code = e.code(), error = %e, "任务异常终止"),
            }
        });

        info!(event_id, job_type = %job_type, ends_at = ?ends_at, "任务已启动");
        self.jobs.insert(
            key,
            RunningJob {
                shutdown,
                handle,
                started_at: Utc::now(),
                ends_at,
            },
        );
        Ok(())
    }

    pub fn is_running(&self, event_id: i64, job_type: JobType) -> bool {
        self.jobs
            .get(&(event_id, job_type))
            .is_some_and(|j| !j.handle.is_finished())
    }

    /// 停止任务并等待其退出；任务不存在时返回 `false`
    pub async fn stop(&self, event_id: i64, job_type: JobType) -> bool {
        let Some((_, job)) = self.jobs.remove(&(event_id, job_type)) else {
            return false;
        };
        let _ = job.shutdown.send(true);
        if let Err(e) = job.handle.await {
            warn!(event_id, job_type = %job_type, error = %e, "等待任务退出失败");
        }
        true
    }

    /// 按 (赛事, 类型) 排序
    pub fn statuses(&self) -> Vec<JobStatus> {
        let mut statuses: Vec<JobStatus> = self
            .jobs
            .iter()
            .map(|entry| {
                let (event_id, job_type) = *entry.key();
                JobStatus {
                    event_id,
                    job_type,
                    started_at: entry.started_at,
                    ends_at: entry.ends_at,
                    finished: entry.handle.is_finished(),
                }
            })
            .collect();
        statuses.sort_by_key(|s| (s.event_id, s.job_type));
        statuses
    }

    /// 停止全部任务
    pub async fn stop_all(&self) {
        let keys: Vec<JobKey> = self.jobs.iter().map(|e| *e.key()).collect();
        let jobs: Vec<RunningJob> = keys
            .iter()
            .filter_map(|k| self.jobs.remove(k))
            .map(|(_, job)| job)
            .collect();

        // 先全部发信号再等待，各任务并行退出
        for job in &jobs {
            let _ = job.shutdown.send(true);
        }
        let results = futures::future::join_all(jobs.into_iter().map(|j| j.handle)).await;
        let failed = results.iter().filter(|r| r.is_err()).count();

        info!(stopped = keys.len(), failed, "全部任务已停止");
    }
}
