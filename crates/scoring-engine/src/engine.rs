//! 计分引擎
//!
//! 一次计分：建树 → 并发聚合 → 自底向上计分 → 与上一次快照比较。
//! 只保留上一次快照用于比较，不做持久化。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use league_shared::objectives::{Objective, ObjectiveMatch, StashObservation, Team, TeamId, UserId};
use league_shared::observability::metrics;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::aggregation::{AggregationInput, aggregate_all};
use crate::diff::{ScoreChange, diff};
use crate::error::Result;
use crate::scoring::{ScoreSnapshot, score_tree, team_totals};
use crate::tree::ObjectiveTree;

/// 一次计分所需的数据，由调用方从存储中读取
#[derive(Debug, Clone, Default)]
pub struct ScoringInput {
    pub objectives: Vec<Objective>,
    pub matches: Vec<ObjectiveMatch>,
    pub teams: Vec<Team>,
    pub observations: Vec<StashObservation>,
}

/// 一次计分的结果
#[derive(Debug, Clone)]
pub struct ScoringPass {
    pub snapshot: Arc<ScoreSnapshot>,
    /// 相对上一次快照的变化
    pub changes: Vec<ScoreChange>,
    pub totals: BTreeMap<TeamId, f64>,
}

pub struct ScoringEngine {
    event_id: i64,
    previous: Mutex<Option<Arc<ScoreSnapshot>>>,
}

impl ScoringEngine {
    pub fn new(event_id: i64) -> Self {
        Self {
            event_id,
            previous: Mutex::new(None),
        }
    }

    pub fn event_id(&self) -> i64 {
        self.event_id
    }

    /// 上一次计分的快照
    pub fn previous(&self) -> Option<Arc<ScoreSnapshot>> {
        self.previous.lock().clone()
    }

    /// 执行一次计分并替换上一次快照
    #[instrument(skip(self, input), fields(event_id = self.event_id))]
    pub async fn run_pass(&self, input: ScoringInput) -> Result<ScoringPass> {
        let started = Instant::now();

        let tree = ObjectiveTree::build(input.objectives)?;

        let mut team_of: HashMap<UserId, TeamId> = HashMap::new();
        for team in &input.teams {
            for &user_id in &team.user_ids {
                if let Some(existing) = team_of.insert(user_id, team.id) {
                    warn!(user_id, existing, team_id = team.id, "用户属于多个队伍，以后者为准");
                }
            }
        }
        let team_ids: Vec<TeamId> = input.teams.iter().map(|t| t.id).collect();

        let aggregation_input = AggregationInput::new(
            tree.leaves().cloned().collect(),
            input.matches,
            team_of,
            &input.observations,
        );
        let aggregations = aggregate_all(Arc::new(aggregation_input)).await?;

        let snapshot = Arc::new(score_tree(&tree, &aggregations, &team_ids));
        let totals = team_totals(&snapshot);

        let changes = {
            let mut previous = self.previous.lock();
            let changes = match previous.as_deref() {
                Some(before) => diff(before, &snapshot),
                None => diff(&ScoreSnapshot::new(), &snapshot),
            };
            *previous = Some(Arc::clone(&snapshot));
            changes
        };

        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_scoring_pass(self.event_id, changes.len(), elapsed);

        if changes.is_empty() {
            debug!(scores = snapshot.len(), "得分无变化");
        } else {
            info!(
                scores = snapshot.len(),
                changes = changes.len(),
                teams = totals.len(),
                elapsed_secs = elapsed,
                "计分完成"
            );
        }

        Ok(ScoringPass {
            snapshot,
            changes,
            totals,
        })
    }

    /// 清空上一次快照，下一次计分会把全部得分视为新增
    pub fn reset(&self) {
        *self.previous.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use league_shared::objectives::{ObjectiveType, ScoringPolicy, ScoringPreset};
    use league_shared::test_utils::{TestDataGenerator, ts};

    fn input(matches: Vec<ObjectiveMatch>) -> ScoringInput {
        ScoringInput {
            objectives: vec![
                Objective::new(1, "root", ObjectiveType::Item),
                TestDataGenerator::base_type_objective(2, "Mirror of Kalandra")
                    .with_parent(1)
                    .with_scoring(ScoringPreset::new(1, ScoringPolicy::Presence, vec![10.0])),
            ],
            matches,
            teams: vec![
                Team {
                    id: 1,
                    name: "red".to_string(),
                    user_ids: vec![10],
                },
                Team {
                    id: 2,
                    name: "blue".to_string(),
                    user_ids: vec![20],
                },
            ],
            observations: vec![],
        }
    }

    #[tokio::test]
    async fn test_first_pass_adds_everything() {
        let engine = ScoringEngine::new(1);
        let pass = engine.run_pass(input(vec![])).await.unwrap();
        assert_eq!(pass.snapshot.len(), 4);
        assert_eq!(pass.changes.len(), 4);
        assert!(engine.previous().is_some());
    }

    #[tokio::test]
    async fn test_new_match_changes_only_affected_scores() {
        let engine = ScoringEngine::new(1);
        engine.run_pass(input(vec![])).await.unwrap();

        let pass = engine
            .run_pass(input(vec![TestDataGenerator::stored_match(1, 2, 10, 1, ts(0))]))
            .await
            .unwrap();

        let keys: Vec<_> = pass.changes.iter().map(ScoreChange::key).collect();
        // 叶子得分和根节点的完成状态都变化
        assert_eq!(keys, vec![(1, 1), (2, 1)]);
        assert_eq!(pass.totals[&1], 10.0);
        assert_eq!(pass.totals[&2], 0.0);
    }

    #[tokio::test]
    async fn test_invalid_tree_is_rejected() {
        let engine = ScoringEngine::new(1);
        let mut bad = input(vec![]);
        bad.objectives.push(Objective::new(3, "orphan", ObjectiveType::Item));
        let err = engine.run_pass(bad).await.unwrap_err();
        assert_eq!(err.code(), "ROOT_COUNT");
        assert!(engine.previous().is_none());
    }
}
