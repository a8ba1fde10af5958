//! 抓取、同步与计分服务
//!
//! - 抓取循环：拉取公共仓库变更流，过滤后写入赛事的持久日志
//! - 消费循环：按日志顺序求值物品目标，写入匹配记录，负责新目标的重放同步
//! - 玩家轮询：周期性对玩家状态求值
//! - 计分循环：周期性计分并发布变化

pub mod batch_log;
pub mod consumer;
pub mod cursor;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod jobs;
pub mod player_poll;
pub mod repository;
pub mod scoring_loop;
pub mod service;
pub mod sync_state;

pub use consumer::{BatchOutcome, BatchProcessor, ConsumeLoop};
pub use cursor::ChangeCursor;
pub use error::{Result, SyncError};
pub use fetcher::{FetchLoop, FetchSummary};
pub use jobs::{JobRequest, JobRunner, JobStatus, JobType};
pub use player_poll::PlayerPollLoop;
pub use service::TrackerService;
pub use sync_state::{SyncCompletion, SyncTracker};
