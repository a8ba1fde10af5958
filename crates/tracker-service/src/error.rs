//! 抓取与同步服务错误类型

use league_shared::error::TrackerError;
use objective_matcher::MatcherError;
use scoring_engine::ScoringError;
use thiserror::Error;

use crate::feed::FeedError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("变更流请求失败: {0}")]
    Feed(#[from] FeedError),

    #[error("连续 {consecutive_failures} 次错误，抓取循环终止")]
    CircuitOpen { consecutive_failures: u32 },

    #[error("无效的变更游标: {0}")]
    InvalidCursor(String),

    #[error("持久日志写入失败: {0}")]
    LogWrite(String),

    #[error("赛事不存在: {0}")]
    EventNotFound(i64),

    #[error("任务已在运行: event_id={event_id}, job_type={job_type}")]
    JobAlreadyRunning { event_id: i64, job_type: String },

    #[error("任务结束时间已过: event_id={event_id}, job_type={job_type}")]
    JobExpired { event_id: i64, job_type: String },

    #[error(transparent)]
    Matcher(#[from] MatcherError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Shared(#[from] TrackerError),
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Feed(e) => e.code(),
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::InvalidCursor(_) => "INVALID_CURSOR",
            Self::LogWrite(_) => "LOG_WRITE_FAILED",
            Self::EventNotFound(_) => "EVENT_NOT_FOUND",
            Self::JobAlreadyRunning { .. } => "JOB_ALREADY_RUNNING",
            Self::JobExpired { .. } => "JOB_EXPIRED",
            Self::Matcher(e) => e.code(),
            Self::Scoring(e) => e.code(),
            Self::Database(_) => "DATABASE_ERROR",
            Self::Shared(e) => e.code(),
        }
    }

    /// 存储类错误：循环应终止而不是丢弃数据
    pub fn is_storage(&self) -> bool {
        match self {
            Self::LogWrite(_) | Self::Database(_) => true,
            Self::Shared(e) => e.is_storage(),
            _ => false,
        }
    }

    /// 转成共享错误，供 Kafka 消费回调返回
    pub fn into_shared(self) -> TrackerError {
        match self {
            Self::Shared(e) => e,
            Self::Database(e) => TrackerError::Database(e),
            other => TrackerError::Internal(format!("[{}] {other}", other.code())),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
