//! 玩家目标
//!
//! 每个玩家一条记录，放在单独的锁后面。角色、赛季账号、角色名三个刷新器
//! 彼此独立，各自在锁内读改写自己负责的字段，不会覆盖对方的更新。
//! 轮询循环每个周期对全部记录求值玩家目标。

use std::sync::Arc;

use dashmap::DashMap;
use league_shared::objectives::{ConditionField, NumberField, Objective, ObjectiveId, ObjectiveType, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::compiler::{Matcher, compile_objective};
use crate::dispatch::Completion;
use crate::evaluator::{FieldSource, FieldValue};

/// 玩家累计状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub user_id: UserId,
    pub account_name: String,
    pub character_id: Option<String>,
    pub character_name: Option<String>,
    pub level: i64,
    /// 是否已解锁主神能力
    pub pantheon: bool,
    pub ascendancy_points: i64,
    pub atlas_points: i64,
}

impl PlayerState {
    pub fn new(user_id: UserId, account_name: impl Into<String>) -> Self {
        Self {
            user_id,
            account_name: account_name.into(),
            ..Self::default()
        }
    }

    /// 综合进度分
    pub fn composite_score(&self) -> i64 {
        self.level / 10 + self.ascendancy_points / 2 + i64::from(self.pantheon) + self.atlas_points / 10
    }

    /// 目标数量字段对应的取值
    pub fn number(&self, field: NumberField) -> i64 {
        match field {
            NumberField::PlayerLevel => self.level,
            NumberField::Pantheon => i64::from(self.pantheon),
            NumberField::AscendancyPoints => self.ascendancy_points,
            NumberField::AtlasPoints => self.atlas_points,
            NumberField::PlayerScore => self.composite_score(),
            NumberField::One | NumberField::StackSize => 1,
        }
    }
}

impl FieldSource for PlayerState {
    fn field(&self, field: ConditionField) -> Option<FieldValue<'_>> {
        match field {
            ConditionField::PlayerLevel => Some(FieldValue::Int(self.level)),
            ConditionField::Pantheon => Some(FieldValue::Bool(self.pantheon)),
            ConditionField::AscendancyPoints => Some(FieldValue::Int(self.ascendancy_points)),
            ConditionField::AtlasPoints => Some(FieldValue::Int(self.atlas_points)),
            ConditionField::PlayerScore => Some(FieldValue::Int(self.composite_score())),
            _ => None,
        }
    }
}

/// 角色刷新器的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    pub character_id: String,
    pub level: i64,
    pub ascendancy_points: i64,
    pub pantheon: bool,
}

/// 赛季账号刷新器的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueAccountSnapshot {
    pub atlas_points: i64,
}

/// 玩家注册表
#[derive(Clone, Default)]
pub struct PlayerRegistry {
    players: Arc<DashMap<UserId, Arc<Mutex<PlayerState>>>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// 注册玩家，已存在时保留原记录
    pub fn register(&self, user_id: UserId, account_name: &str) -> Arc<Mutex<PlayerState>> {
        self.players
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(PlayerState::new(user_id, account_name))))
            .clone()
    }

    fn record(&self, user_id: UserId) -> Option<Arc<Mutex<PlayerState>>> {
        // 先克隆 Arc 再加锁，避免持有分片锁时等待玩家锁
        self.players.get(&user_id).map(|r| Arc::clone(r.value()))
    }

    /// 角色刷新器：只写等级、升华点、主神和角色 ID
    pub fn update_character(&self, user_id: UserId, snapshot: &CharacterSnapshot) -> bool {
        let Some(record) = self.record(user_id) else {
            warn!(user_id, "未注册的玩家，忽略角色刷新");
            return false;
        };
        let mut state = record.lock();
        state.character_id = Some(snapshot.character_id.clone());
        state.level = snapshot.level;
        state.ascendancy_points = snapshot.ascendancy_points;
        state.pantheon = snapshot.pantheon;
        true
    }

    /// 赛季账号刷新器：只写地图天赋点
    pub fn update_league_account(&self, user_id: UserId, snapshot: LeagueAccountSnapshot) -> bool {
        let Some(record) = self.record(user_id) else {
            warn!(user_id, "未注册的玩家，忽略账号刷新");
            return false;
        };
        record.lock().atlas_points = snapshot.atlas_points;
        true
    }

    /// 角色名刷新器：只写角色名
    pub fn update_character_name(&self, user_id: UserId, name: &str) -> bool {
        let Some(record) = self.record(user_id) else {
            warn!(user_id, "未注册的玩家，忽略角色名刷新");
            return false;
        };
        record.lock().character_name = Some(name.to_string());
        true
    }

    pub fn get(&self, user_id: UserId) -> Option<PlayerState> {
        self.record(user_id).map(|r| r.lock().clone())
    }

    /// 全部玩家状态的一致快照（每条记录各自在锁内复制），按用户 ID 升序
    pub fn snapshot_all(&self) -> Vec<PlayerState> {
        let records: Vec<_> = self.players.iter().map(|r| Arc::clone(r.value())).collect();
        let mut states: Vec<_> = records.iter().map(|r| r.lock().clone()).collect();
        states.sort_by_key(|s| s.user_id);
        states
    }
}

struct PlayerChecker {
    objective_id: ObjectiveId,
    matcher: Matcher,
    number_field: NumberField,
}

/// 玩家目标检查器：目标 ID -> 玩家状态上的纯函数
#[derive(Default)]
pub struct PlayerObjectiveChecker {
    checkers: Vec<PlayerChecker>,
}

impl PlayerObjectiveChecker {
    /// 只收录 PLAYER 目标，编译失败的跳过
    pub fn build(objectives: &[Objective]) -> Self {
        let mut checkers: Vec<PlayerChecker> = objectives
            .iter()
            .filter(|o| o.objective_type == ObjectiveType::Player)
            .filter_map(|objective| match compile_objective(objective) {
                Ok(compiled) => Some(PlayerChecker {
                    objective_id: objective.id,
                    matcher: compiled.matcher,
                    number_field: objective.number_field,
                }),
                Err(e) => {
                    warn!(
                        objective_id = objective.id,
                        code = e.code(),
                        error = %e,
                        "玩家目标条件编译失败，已跳过"
                    );
                    None
                }
            })
            .collect();
        checkers.sort_by_key(|c| c.objective_id);

        Self { checkers }
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    /// 返回该玩家满足的全部目标，按目标 ID 升序
    pub fn check(&self, state: &PlayerState) -> Vec<Completion> {
        self.checkers
            .iter()
            .filter(|c| c.matcher.matches(state))
            .map(|c| Completion {
                objective_id: c.objective_id,
                number: state.number(c.number_field),
            })
            .collect()
    }
}
