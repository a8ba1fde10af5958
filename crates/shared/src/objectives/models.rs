//! 目标、匹配记录和计分预设

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conditions::Condition;

pub type ObjectiveId = i64;
pub type TeamId = i64;
pub type UserId = i64;

text_enum! {
    /// 目标类型
    pub enum ObjectiveType {
        Item => "ITEM",
        Player => "PLAYER",
        Submission => "SUBMISSION",
    }
}

text_enum! {
    /// 聚合策略：如何把多个用户的匹配记录合成队伍在该目标上的单一结果
    pub enum AggregationPolicy {
        Earliest => "EARLIEST",
        EarliestFreshItem => "EARLIEST_FRESH_ITEM",
        SumLatest => "SUM_LATEST",
        Maximum => "MAXIMUM",
        Minimum => "MINIMUM",
    }
}

text_enum! {
    /// 目标的同步状态，新建目标默认为 DESYNCED
    #[derive(Default)]
    pub enum SyncStatus {
        Synced => "SYNCED",
        Syncing => "SYNCING",
        #[default]
        Desynced => "DESYNCED",
    }
}

text_enum! {
    /// 匹配记录携带的数量来源
    #[derive(Default)]
    pub enum NumberField {
        #[default]
        One => "ONE",
        StackSize => "STACK_SIZE",
        PlayerLevel => "PLAYER_LEVEL",
        Pantheon => "PANTHEON",
        AscendancyPoints => "ASCENDANCY_POINTS",
        AtlasPoints => "ATLAS_POINTS",
        PlayerScore => "PLAYER_SCORE",
    }
}

text_enum! {
    /// 计分策略
    pub enum ScoringPolicy {
        Presence => "PRESENCE",
        PointsFromValue => "POINTS_FROM_VALUE",
        RankedTime => "RANKED_TIME",
        RankedValue => "RANKED_VALUE",
        RankedReverse => "RANKED_REVERSE",
        RankedCompletion => "RANKED_COMPLETION",
        BonusPerCompletion => "BONUS_PER_COMPLETION",
        BingoN => "BINGO_N",
    }
}

/// 有效时间窗口，两端均可缺省
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl ValidityWindow {
    pub fn new(valid_from: Option<DateTime<Utc>>, valid_to: Option<DateTime<Utc>>) -> Self {
        Self {
            valid_from,
            valid_to,
        }
    }

    /// 时间点是否落在窗口内（闭区间）
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let after_start = self.valid_from.is_none_or(|t| at >= t);
        let before_end = self.valid_to.is_none_or(|t| at <= t);
        after_start && before_end
    }
}

/// 计分预设
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPreset {
    pub id: i64,
    pub policy: ScoringPolicy,
    /// 分数档位，排名类策略按名次取档
    #[serde(default)]
    pub points: Vec<f64>,
    /// POINTS_FROM_VALUE 的分数上限
    #[serde(default)]
    pub point_cap: Option<f64>,
    /// BINGO_N 需要完成的子目标数
    #[serde(default)]
    pub bingo_n: Option<u32>,
}

impl ScoringPreset {
    pub fn new(id: i64, policy: ScoringPolicy, points: Vec<f64>) -> Self {
        Self {
            id,
            policy,
            points,
            point_cap: None,
            bingo_n: None,
        }
    }

    /// 第 `index` 档分数，超出档位返回 0
    pub fn tier(&self, index: usize) -> f64 {
        self.points.get(index).copied().unwrap_or(0.0)
    }
}

/// 目标（计分单元）
///
/// 目标组成一棵严格的树：根节点没有父节点，其余节点恰有一个父节点。
/// 有子节点的目标即为分类（Category）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub id: ObjectiveId,
    pub name: String,
    pub parent_id: Option<ObjectiveId>,
    pub objective_type: ObjectiveType,
    pub required_amount: i64,
    pub aggregation: AggregationPolicy,
    #[serde(default)]
    pub number_field: NumberField,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// 无法解析的条件行原文；非空时该目标不参与匹配
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreadable_conditions: Vec<String>,
    #[serde(default)]
    pub window: ValidityWindow,
    #[serde(default)]
    pub scoring_preset: Option<ScoringPreset>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

impl Objective {
    pub fn new(id: ObjectiveId, name: impl Into<String>, objective_type: ObjectiveType) -> Self {
        Self {
            id,
            name: name.into(),
            parent_id: None,
            objective_type,
            required_amount: 1,
            aggregation: AggregationPolicy::Earliest,
            number_field: NumberField::One,
            conditions: Vec::new(),
            unreadable_conditions: Vec::new(),
            window: ValidityWindow::default(),
            scoring_preset: None,
            sync_status: SyncStatus::Synced,
        }
    }

    pub fn with_parent(mut self, parent_id: ObjectiveId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_unreadable_condition(mut self, raw: impl Into<String>) -> Self {
        self.unreadable_conditions.push(raw.into());
        self
    }

    pub fn with_required_amount(mut self, amount: i64) -> Self {
        self.required_amount = amount;
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationPolicy) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_number_field(mut self, number_field: NumberField) -> Self {
        self.number_field = number_field;
        self
    }

    pub fn with_window(mut self, window: ValidityWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_scoring(mut self, preset: ScoringPreset) -> Self {
        self.scoring_preset = Some(preset);
        self
    }

    pub fn with_sync_status(mut self, status: SyncStatus) -> Self {
        self.sync_status = status;
        self
    }
}

/// 匹配引擎产出、尚未持久化的匹配记录
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub objective_id: ObjectiveId,
    pub user_id: UserId,
    pub number: i64,
    pub timestamp: DateTime<Utc>,
    /// 产生该匹配的变更批次游标
    pub change_id: Option<String>,
    pub stash_id: Option<String>,
    pub item_id: Option<String>,
}

/// 已持久化的匹配记录，写入后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveMatch {
    /// 自增主键，即插入顺序
    pub id: i64,
    pub objective_id: ObjectiveId,
    pub user_id: UserId,
    pub number: i64,
    pub timestamp: DateTime<Utc>,
    pub change_id: Option<String>,
    pub stash_id: Option<String>,
    pub item_id: Option<String>,
}

impl ObjectiveMatch {
    pub fn from_candidate(id: i64, candidate: MatchCandidate) -> Self {
        Self {
            id,
            objective_id: candidate.objective_id,
            user_id: candidate.user_id,
            number: candidate.number,
            timestamp: candidate.timestamp,
            change_id: candidate.change_id,
            stash_id: candidate.stash_id,
            item_id: candidate.item_id,
        }
    }
}

/// 被追踪仓库页的最近一次观测
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashObservation {
    pub stash_id: String,
    pub observed_at: DateTime<Utc>,
    pub item_ids: Vec<String>,
}

/// 队伍及其成员
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub user_ids: Vec<UserId>,
}
