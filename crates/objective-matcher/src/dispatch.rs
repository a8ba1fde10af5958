//! 派发表与匹配引擎
//!
//! 派发表是不可变快照：判别字段 -> 字段取值 -> 检查器列表，外加一个通配桶。
//! 每个物品只查自己取值对应的桶和通配桶，而不是逐个检查所有目标。
//! 目标集合变化时整体重建，通过 `ArcSwap` 原子替换，读取端无锁。

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use league_shared::objectives::{NumberField, Objective, ObjectiveId, ObjectiveType, ValidityWindow};
use league_shared::stash::Item;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::compiler::{DiscriminatorField, Matcher, compile_objective};
use crate::normalize::Normalizer;

/// 有效窗口校验方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeValidation {
    /// 以给定时间校验每个目标的有效窗口
    At(DateTime<Utc>),
    /// 历史重放时关闭校验
    Disabled,
}

impl TimeValidation {
    fn permits(&self, window: &ValidityWindow) -> bool {
        match self {
            Self::At(at) => window.contains(*at),
            Self::Disabled => true,
        }
    }
}

/// 一次命中：(目标, 数量)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Completion {
    pub objective_id: ObjectiveId,
    pub number: i64,
}

/// 单个物品目标的检查器
#[derive(Debug)]
pub struct ObjectiveChecker {
    pub objective_id: ObjectiveId,
    matcher: Matcher,
    window: ValidityWindow,
    number_field: NumberField,
}

impl ObjectiveChecker {
    pub fn check(&self, item: &Item, validation: TimeValidation) -> Option<Completion> {
        if !validation.permits(&self.window) || !self.matcher.matches(item) {
            return None;
        }

        let number = match self.number_field {
            NumberField::StackSize => item.stack_size.unwrap_or(1),
            _ => 1,
        };

        Some(Completion {
            objective_id: self.objective_id,
            number,
        })
    }
}

/// 不可变派发表
#[derive(Debug, Default)]
pub struct DispatchTable {
    version: i64,
    by_field: HashMap<DiscriminatorField, HashMap<String, Vec<Arc<ObjectiveChecker>>>>,
    wildcard: Vec<Arc<ObjectiveChecker>>,
    /// 全部检查器，按目标 ID 升序
    all: Vec<Arc<ObjectiveChecker>>,
    /// 编译失败被跳过的目标
    skipped: Vec<ObjectiveId>,
}

impl DispatchTable {
    /// 从目标集合构建派发表，只收录 ITEM 目标
    ///
    /// 编译失败的目标被跳过并记录 warn 日志，不影响其他目标。
    pub fn build(version: i64, objectives: &[Objective]) -> Self {
        let mut table = Self {
            version,
            ..Self::default()
        };

        for objective in objectives
            .iter()
            .filter(|o| o.objective_type == ObjectiveType::Item)
        {
            let compiled = match compile_objective(objective) {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        objective_id = objective.id,
                        objective_name = %objective.name,
                        code = e.code(),
                        error = %e,
                        "目标条件编译失败，已跳过"
                    );
                    table.skipped.push(objective.id);
                    continue;
                }
            };

            let checker = Arc::new(ObjectiveChecker {
                objective_id: objective.id,
                matcher: compiled.matcher,
                window: objective.window,
                number_field: objective.number_field,
            });

            match compiled.discriminator {
                Some(discriminator) => {
                    let buckets = table.by_field.entry(discriminator.field).or_default();
                    for value in discriminator.values {
                        buckets.entry(value).or_default().push(Arc::clone(&checker));
                    }
                }
                None => table.wildcard.push(Arc::clone(&checker)),
            }
            table.all.push(checker);
        }

        table.all.sort_by_key(|c| c.objective_id);

        info!(
            version,
            checkers = table.all.len(),
            wildcard = table.wildcard.len(),
            skipped = table.skipped.len(),
            "派发表已构建"
        );
        table
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn skipped(&self) -> &[ObjectiveId] {
        &self.skipped
    }

    pub fn wildcard_len(&self) -> usize {
        self.wildcard.len()
    }

    /// 检查物品完成了哪些目标，结果按目标 ID 升序
    pub fn check_for_completions(&self, item: &Item, validation: TimeValidation) -> Vec<Completion> {
        let mut completions = Vec::new();

        for (field, buckets) in &self.by_field {
            if let Some(checkers) = buckets.get(field.value_of(item)) {
                completions.extend(checkers.iter().filter_map(|c| c.check(item, validation)));
            }
        }
        completions.extend(self.wildcard.iter().filter_map(|c| c.check(item, validation)));

        completions.sort_unstable();
        completions
    }

    /// 逐个检查全部目标，不走分桶；用于校验派发结果
    pub fn check_by_full_scan(&self, item: &Item, validation: TimeValidation) -> Vec<Completion> {
        self.all
            .iter()
            .filter_map(|c| c.check(item, validation))
            .collect()
    }
}

/// 匹配引擎
///
/// 持有当前派发表快照和归一化步骤。可通过 Arc 在消费循环之间共享。
pub struct MatchingEngine {
    table: ArcSwap<DispatchTable>,
    normalizer: Normalizer,
}

impl MatchingEngine {
    pub fn new(normalizer: Normalizer) -> Self {
        Self {
            table: ArcSwap::from_pointee(DispatchTable::default()),
            normalizer,
        }
    }

    /// 当前快照
    pub fn snapshot(&self) -> Arc<DispatchTable> {
        self.table.load_full()
    }

    pub fn version(&self) -> i64 {
        self.table.load().version()
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// 用新的目标集合重建并替换派发表，返回被跳过的目标
    pub fn reload(&self, version: i64, objectives: &[Objective]) -> Vec<ObjectiveId> {
        let table = DispatchTable::build(version, objectives);
        let skipped = table.skipped().to_vec();
        self.table.store(Arc::new(table));
        skipped
    }

    /// 版本变化时才重建
    pub fn reload_if_changed(&self, version: i64, objectives: &[Objective]) -> bool {
        if self.version() == version {
            debug!(version, "目标集合版本未变化");
            return false;
        }
        self.reload(version, objectives);
        true
    }

    /// 归一化后检查物品；被排除的物品不产生任何命中
    pub fn evaluate(&self, item: &Item, validation: TimeValidation) -> Vec<Completion> {
        match self.normalizer.normalize(item) {
            Some(normalized) => self
                .table
                .load()
                .check_for_completions(&normalized, validation),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use league_shared::objectives::{Condition, ConditionField, Operator};
    use league_shared::test_utils::{ItemBuilder, TestDataGenerator, ts};

    fn objectives() -> Vec<Objective> {
        vec![
            TestDataGenerator::base_type_objective(1, "Mirror of Kalandra"),
            TestDataGenerator::base_type_objective(2, "Chaos Orb")
                .with_number_field(NumberField::StackSize),
            Objective::new(3, "any six link", ObjectiveType::Item).with_conditions(vec![
                Condition::new(ConditionField::MaxLinks, Operator::Eq, "6"),
            ]),
            Objective::new(4, "broken", ObjectiveType::Item).with_conditions(vec![
                Condition::new(ConditionField::Ilvl, Operator::Gt, "high"),
            ]),
            Objective::new(5, "player", ObjectiveType::Player).with_conditions(vec![
                Condition::new(ConditionField::PlayerLevel, Operator::Gt, "90"),
            ]),
        ]
    }

    #[test]
    fn test_build_skips_invalid_and_non_item() {
        let table = DispatchTable::build(7, &objectives());
        assert_eq!(table.version(), 7);
        assert_eq!(table.len(), 3);
        assert_eq!(table.wildcard_len(), 1);
        assert_eq!(table.skipped(), &[4]);
    }

    #[test]
    fn test_unreadable_conditions_never_match_everything() {
        // 唯一的条件无法解析，不能退化为空条件的通配目标
        let objectives = vec![
            TestDataGenerator::base_type_objective(1, "Mirror of Kalandra"),
            Objective::new(2, "unreadable", ObjectiveType::Item).with_unreadable_condition("NAME STARTS_WITH Mir"),
        ];
        let table = DispatchTable::build(1, &objectives);
        assert_eq!(table.skipped(), &[2]);
        assert_eq!(table.wildcard_len(), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_stack_size_number() {
        let table = DispatchTable::build(1, &objectives());
        let chaos = ItemBuilder::new("Chaos Orb").stack_size(20).build();

        let completions = table.check_for_completions(&chaos, TimeValidation::Disabled);
        assert_eq!(
            completions,
            vec![Completion {
                objective_id: 2,
                number: 20
            }]
        );
    }

    #[test]
    fn test_bucket_and_wildcard_both_hit() {
        let table = DispatchTable::build(1, &objectives());
        let mirror = ItemBuilder::new("Mirror of Kalandra").linked_sockets(6).build();

        let ids: Vec<_> = table
            .check_for_completions(&mirror, TimeValidation::Disabled)
            .into_iter()
            .map(|c| c.objective_id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_validity_window() {
        let objective = TestDataGenerator::base_type_objective(1, "Chaos Orb")
            .with_window(ValidityWindow::new(Some(ts(0)), Some(ts(100))));
        let table = DispatchTable::build(1, &[objective]);
        let chaos = ItemBuilder::new("Chaos Orb").build();

        assert_eq!(table.check_for_completions(&chaos, TimeValidation::At(ts(50))).len(), 1);
        assert!(table.check_for_completions(&chaos, TimeValidation::At(ts(101))).is_empty());
        assert_eq!(table.check_for_completions(&chaos, TimeValidation::Disabled).len(), 1);
    }

    #[test]
    fn test_engine_reload_swaps_snapshot() {
        let engine = MatchingEngine::new(Normalizer::default());
        let old = engine.snapshot();
        assert!(old.is_empty());

        assert!(engine.reload_if_changed(2, &objectives()));
        assert!(!engine.reload_if_changed(2, &objectives()));
        assert_eq!(engine.version(), 2);
        // 旧快照仍可用
        assert!(old.is_empty());
        assert_eq!(engine.snapshot().len(), 3);
    }

    #[test]
    fn test_engine_normalizes_before_matching() {
        use league_shared::config::NormalizationRule;

        let engine = MatchingEngine::new(Normalizer::new(vec![
            NormalizationRule::ExcludeFrameType {
                frame_types: vec![9],
            },
        ]));
        engine.reload(1, &objectives());

        let foil_mirror = ItemBuilder::new("Mirror of Kalandra").frame_type(9).build();
        assert!(engine.evaluate(&foil_mirror, TimeValidation::Disabled).is_empty());
    }
}
