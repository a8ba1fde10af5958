//! 计分引擎错误类型

use league_shared::error::TrackerError;
use league_shared::objectives::ObjectiveId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("目标树为空")]
    EmptyTree,

    #[error("重复的目标 ID: {0}")]
    DuplicateObjective(ObjectiveId),

    #[error("目标 {objective_id} 的父目标 {parent_id} 不存在")]
    MissingParent {
        objective_id: ObjectiveId,
        parent_id: ObjectiveId,
    },

    #[error("目标树必须恰有一个根节点，实际有 {0} 个")]
    RootCount(usize),

    #[error("目标树存在环：{0} 个目标无法从根节点到达")]
    Unreachable(usize),

    #[error("计分预设无效: 目标 {objective_id} - {reason}")]
    InvalidPreset {
        objective_id: ObjectiveId,
        reason: String,
    },

    #[error("聚合任务失败: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Shared(#[from] TrackerError),
}

impl ScoringError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyTree => "EMPTY_TREE",
            Self::DuplicateObjective(_) => "DUPLICATE_OBJECTIVE",
            Self::MissingParent { .. } => "MISSING_PARENT",
            Self::RootCount(_) => "ROOT_COUNT",
            Self::Unreachable(_) => "UNREACHABLE_OBJECTIVE",
            Self::InvalidPreset { .. } => "INVALID_PRESET",
            Self::TaskFailed(_) => "TASK_FAILED",
            Self::Shared(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScoringError>;
