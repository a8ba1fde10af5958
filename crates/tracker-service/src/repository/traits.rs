//! 仓储 Trait 定义

use std::collections::HashMap;

use async_trait::async_trait;
use league_shared::objectives::{
    MatchCandidate, Objective, ObjectiveId, ObjectiveMatch, StashObservation, Team, UserId,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 赛事基本信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventInfo {
    pub id: i64,
    pub name: String,
    /// 赛事对应的游戏赛季，抓取时只保留该赛季的仓库页
    pub league: String,
    /// 目标集合版本，CRUD 层每次修改目标时递增
    pub objective_version: i64,
}

/// 赛事的游标记录
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    /// 下一次抓取的游标
    pub next_cursor: Option<String>,
    /// 最近一次成功写入持久日志的批次游标
    pub last_published_cursor: Option<String>,
    /// 当前消费组版本
    pub consumer_version: i64,
}

/// 目标、队伍与账号（只读）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectiveSource: Send + Sync {
    async fn load_event(&self, event_id: i64) -> Result<Option<EventInfo>>;
    async fn objective_set_version(&self, event_id: i64) -> Result<i64>;
    /// 赛事的全部目标（含条件、计分预设和同步状态）
    async fn load_objectives(&self, event_id: i64) -> Result<Vec<Objective>>;
    async fn load_teams(&self, event_id: i64) -> Result<Vec<Team>>;
    /// 账号名 -> 用户 ID，仅包含赛事队伍成员
    async fn load_accounts(&self, event_id: i64) -> Result<HashMap<String, UserId>>;
}

/// 匹配记录、仓库页观测与同步状态
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// 幂等批量写入，返回实际插入的行数
    async fn insert_matches(&self, candidates: &[MatchCandidate]) -> Result<u64>;

    /// 把目标标记为同步中
    async fn mark_syncing(&self, objective_ids: &[ObjectiveId], target_cursor: Option<String>) -> Result<()>;

    /// 同步完成：一个事务内删除这些目标的旧记录、写入积压记录并标记为已同步
    ///
    /// `backlog` 中不属于 `objective_ids` 的记录按幂等方式写入。
    async fn complete_sync(&self, objective_ids: &[ObjectiveId], backlog: &[MatchCandidate]) -> Result<u64>;

    async fn load_matches(&self, event_id: i64) -> Result<Vec<ObjectiveMatch>>;

    /// 只会用更新的观测覆盖旧观测
    async fn upsert_observations(&self, event_id: i64, observations: &[StashObservation]) -> Result<()>;

    async fn load_observations(&self, event_id: i64) -> Result<Vec<StashObservation>>;
}

/// 游标记录
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, event_id: i64) -> Result<CursorState>;

    /// 批次写入持久日志之后记录进度
    async fn record_published(&self, event_id: i64, cursor: &str, next_cursor: &str) -> Result<()>;

    /// 递增并返回消费组版本
    async fn bump_consumer_version(&self, event_id: i64) -> Result<i64>;
}
