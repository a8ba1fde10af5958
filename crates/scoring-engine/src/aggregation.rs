//! 聚合
//!
//! 把同一目标下多个用户的匹配记录按队伍合成一个结果。五种策略互斥，
//! 每种策略作为一个独立任务并发计算，全部完成后才进入计分。

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use league_shared::objectives::{
    AggregationPolicy, Objective, ObjectiveId, ObjectiveMatch, StashObservation, TeamId, UserId,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ScoringError};

/// 队伍在某个目标上的聚合结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedMatch {
    pub objective_id: ObjectiveId,
    pub team_id: TeamId,
    /// 代表性匹配的用户
    pub user_id: UserId,
    pub number: i64,
    pub timestamp: DateTime<Utc>,
    /// 代表性匹配的记录 ID
    pub match_id: i64,
    pub finished: bool,
}

/// 目标 -> 队伍 -> 聚合结果
pub type Aggregations = HashMap<ObjectiveId, HashMap<TeamId, AggregatedMatch>>;

/// 物品新鲜度索引：物品最近一次出现在哪个仓库页
#[derive(Debug, Clone, Default)]
pub struct FreshnessIndex {
    latest: HashMap<String, (DateTime<Utc>, String)>,
}

impl FreshnessIndex {
    /// 同一物品出现在多个仓库页时取观测时间最新者，时间相同取仓库页 ID 较大者
    pub fn from_observations(observations: &[StashObservation]) -> Self {
        let mut latest: HashMap<String, (DateTime<Utc>, String)> = HashMap::new();

        for observation in observations {
            for item_id in &observation.item_ids {
                let candidate = (observation.observed_at, observation.stash_id.clone());
                match latest.get(item_id) {
                    Some(existing) if *existing >= candidate => {}
                    _ => {
                        latest.insert(item_id.clone(), candidate);
                    }
                }
            }
        }

        Self { latest }
    }

    /// 匹配记录对应的物品是否仍在产生该记录的仓库页中
    pub fn is_fresh(&self, m: &ObjectiveMatch) -> bool {
        let (Some(item_id), Some(stash_id)) = (&m.item_id, &m.stash_id) else {
            return false;
        };
        self.latest
            .get(item_id)
            .is_some_and(|(_, latest_stash)| latest_stash == stash_id)
    }
}

/// 一次聚合所需的全部输入
#[derive(Debug, Clone, Default)]
pub struct AggregationInput {
    pub objectives: Vec<Objective>,
    pub matches: HashMap<ObjectiveId, Vec<ObjectiveMatch>>,
    pub team_of: HashMap<UserId, TeamId>,
    pub freshness: FreshnessIndex,
}

impl AggregationInput {
    pub fn new(
        objectives: Vec<Objective>,
        matches: Vec<ObjectiveMatch>,
        team_of: HashMap<UserId, TeamId>,
        observations: &[StashObservation],
    ) -> Self {
        let mut by_objective: HashMap<ObjectiveId, Vec<ObjectiveMatch>> = HashMap::new();
        for m in matches {
            by_objective.entry(m.objective_id).or_default().push(m);
        }
        Self {
            objectives,
            matches: by_objective,
            team_of,
            freshness: FreshnessIndex::from_observations(observations),
        }
    }
}

/// 并发执行五种策略，合并结果
pub async fn aggregate_all(input: Arc<AggregationInput>) -> Result<Aggregations> {
    let tasks = AggregationPolicy::ALL.iter().copied().map(|policy| {
        let input = Arc::clone(&input);
        tokio::spawn(async move {
            input
                .objectives
                .iter()
                .filter(|o| o.aggregation == policy)
                .map(|o| {
                    let matches = input.matches.get(&o.id).map(Vec::as_slice).unwrap_or(&[]);
                    (o.id, aggregate_objective(o, matches, &input.team_of, &input.freshness))
                })
                .collect::<Vec<_>>()
        })
    });

    let results = futures::future::try_join_all(tasks)
        .await
        .map_err(|e| ScoringError::TaskFailed(e.to_string()))?;

    let aggregations: Aggregations = results.into_iter().flatten().collect();
    debug!(objectives = aggregations.len(), "聚合完成");
    Ok(aggregations)
}

/// 单个目标按队伍聚合
pub fn aggregate_objective(
    objective: &Objective,
    matches: &[ObjectiveMatch],
    team_of: &HashMap<UserId, TeamId>,
    freshness: &FreshnessIndex,
) -> HashMap<TeamId, AggregatedMatch> {
    let mut by_team: HashMap<TeamId, Vec<&ObjectiveMatch>> = HashMap::new();
    for m in matches {
        // 不属于任何队伍的用户不参与计分
        if let Some(&team_id) = team_of.get(&m.user_id) {
            by_team.entry(team_id).or_default().push(m);
        }
    }

    by_team
        .into_iter()
        .filter_map(|(team_id, team_matches)| {
            aggregate_team(objective, team_id, &team_matches, freshness).map(|a| (team_id, a))
        })
        .collect()
}

fn aggregate_team(
    objective: &Objective,
    team_id: TeamId,
    matches: &[&ObjectiveMatch],
    freshness: &FreshnessIndex,
) -> Option<AggregatedMatch> {
    let required = objective.required_amount;

    match objective.aggregation {
        AggregationPolicy::Earliest => earliest(matches.iter().copied(), required)
            .map(|m| from_match(objective, team_id, m, m.number >= required)),

        AggregationPolicy::EarliestFreshItem => {
            earliest(matches.iter().copied().filter(|m| freshness.is_fresh(m)), required)
                .map(|m| from_match(objective, team_id, m, m.number >= required))
        }

        AggregationPolicy::SumLatest => sum_latest(objective, team_id, matches),

        AggregationPolicy::Maximum => matches
            .iter()
            .copied()
            .min_by(|a, b| b.number.cmp(&a.number).then_with(|| earlier(a, b)))
            .map(|m| from_match(objective, team_id, m, m.number >= required)),

        AggregationPolicy::Minimum => matches
            .iter()
            .copied()
            .min_by(|a, b| a.number.cmp(&b.number).then_with(|| earlier(a, b)))
            .map(|m| from_match(objective, team_id, m, required == 0 || m.number <= required)),
    }
}

/// 时间更早者在前，时间相同按记录 ID
fn earlier(a: &ObjectiveMatch, b: &ObjectiveMatch) -> Ordering {
    a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id))
}

/// 第一个达到要求数量的匹配；都未达到时取数量最大者
fn earliest<'a>(
    matches: impl Iterator<Item = &'a ObjectiveMatch>,
    required: i64,
) -> Option<&'a ObjectiveMatch> {
    matches.min_by(|a, b| {
        let a_reached = a.number >= required;
        let b_reached = b.number >= required;
        b_reached
            .cmp(&a_reached)
            .then_with(|| {
                if a_reached {
                    Ordering::Equal
                } else {
                    b.number.cmp(&a.number)
                }
            })
            .then_with(|| earlier(a, b))
    })
}

/// 每个用户最近一次观测（该用户最新时间戳上的全部匹配）之和
fn sum_latest(
    objective: &Objective,
    team_id: TeamId,
    matches: &[&ObjectiveMatch],
) -> Option<AggregatedMatch> {
    let mut latest_by_user: HashMap<UserId, DateTime<Utc>> = HashMap::new();
    for m in matches {
        latest_by_user
            .entry(m.user_id)
            .and_modify(|t| *t = (*t).max(m.timestamp))
            .or_insert(m.timestamp);
    }

    let contributing: Vec<&ObjectiveMatch> = matches
        .iter()
        .copied()
        .filter(|m| latest_by_user.get(&m.user_id) == Some(&m.timestamp))
        .collect();

    let total: i64 = contributing.iter().map(|m| m.number).sum();
    // 代表记录：贡献者中最新的一条
    let representative = contributing
        .iter()
        .copied()
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| b.id.cmp(&a.id)))?;

    Some(AggregatedMatch {
        objective_id: objective.id,
        team_id,
        user_id: representative.user_id,
        number: total,
        timestamp: representative.timestamp,
        match_id: representative.id,
        finished: total >= objective.required_amount,
    })
}

fn from_match(
    objective: &Objective,
    team_id: TeamId,
    m: &ObjectiveMatch,
    finished: bool,
) -> AggregatedMatch {
    AggregatedMatch {
        objective_id: objective.id,
        team_id,
        user_id: m.user_id,
        number: m.number,
        timestamp: m.timestamp,
        match_id: m.id,
        finished,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use league_shared::objectives::ObjectiveType;
    use league_shared::test_utils::{TestDataGenerator, ts};

    fn objective(policy: AggregationPolicy, required: i64) -> Objective {
        Objective::new(1, "test", ObjectiveType::Item)
            .with_aggregation(policy)
            .with_required_amount(required)
    }

    fn teams() -> HashMap<UserId, TeamId> {
        HashMap::from([(10, 1), (11, 1), (20, 2)])
    }

    fn run(objective: &Objective, matches: &[ObjectiveMatch]) -> HashMap<TeamId, AggregatedMatch> {
        aggregate_objective(objective, matches, &teams(), &FreshnessIndex::default())
    }

    #[test]
    fn test_earliest_prefers_first_reaching_requirement() {
        let matches = vec![
            TestDataGenerator::stored_match(1, 1, 10, 3, ts(0)),
            TestDataGenerator::stored_match(2, 1, 11, 10, ts(50)),
            TestDataGenerator::stored_match(3, 1, 10, 12, ts(100)),
        ];
        let result = run(&objective(AggregationPolicy::Earliest, 10), &matches);
        let team = &result[&1];
        assert_eq!(team.match_id, 2);
        assert!(team.finished);
    }

    #[test]
    fn test_earliest_falls_back_to_highest_number() {
        let matches = vec![
            TestDataGenerator::stored_match(1, 1, 10, 3, ts(0)),
            TestDataGenerator::stored_match(2, 1, 11, 7, ts(50)),
            TestDataGenerator::stored_match(3, 1, 10, 7, ts(40)),
        ];
        let team = &run(&objective(AggregationPolicy::Earliest, 10), &matches)[&1];
        assert_eq!(team.match_id, 3);
        assert_eq!(team.number, 7);
        assert!(!team.finished);
    }

    #[test]
    fn test_ties_break_by_lowest_id() {
        let matches = vec![
            TestDataGenerator::stored_match(5, 1, 10, 1, ts(0)),
            TestDataGenerator::stored_match(4, 1, 11, 1, ts(0)),
        ];
        let team = &run(&objective(AggregationPolicy::Earliest, 1), &matches)[&1];
        assert_eq!(team.match_id, 4);
    }

    #[test]
    fn test_sum_latest() {
        let matches = vec![
            // 用户 10 的旧观测不计入
            TestDataGenerator::stored_match(1, 1, 10, 40, ts(0)),
            TestDataGenerator::stored_match(2, 1, 10, 5, ts(60)),
            TestDataGenerator::stored_match(3, 1, 10, 6, ts(60)),
            TestDataGenerator::stored_match(4, 1, 11, 20, ts(30)),
        ];
        let team = &run(&objective(AggregationPolicy::SumLatest, 30), &matches)[&1];
        assert_eq!(team.number, 31);
        assert!(team.finished);
        assert_eq!(team.timestamp, ts(60));
    }

    #[test]
    fn test_maximum_and_minimum() {
        let matches = vec![
            TestDataGenerator::stored_match(1, 1, 10, 80, ts(10)),
            TestDataGenerator::stored_match(2, 1, 11, 95, ts(20)),
            TestDataGenerator::stored_match(3, 1, 20, 95, ts(5)),
        ];
        let max = run(&objective(AggregationPolicy::Maximum, 90), &matches);
        assert_eq!(max[&1].number, 95);
        assert!(max[&1].finished);

        let min = run(&objective(AggregationPolicy::Minimum, 85), &matches);
        assert_eq!(min[&1].number, 80);
        assert!(min[&1].finished);
        assert!(!min[&2].finished);

        let any = run(&objective(AggregationPolicy::Minimum, 0), &matches);
        assert!(any[&2].finished);
    }

    #[test]
    fn test_users_without_team_are_ignored() {
        let matches = vec![TestDataGenerator::stored_match(1, 1, 99, 1, ts(0))];
        assert!(run(&objective(AggregationPolicy::Earliest, 1), &matches).is_empty());
    }

    #[test]
    fn test_freshness_index() {
        let index = FreshnessIndex::from_observations(&[
            StashObservation {
                stash_id: "S1".to_string(),
                observed_at: ts(0),
                item_ids: vec!["X".to_string()],
            },
            StashObservation {
                stash_id: "S2".to_string(),
                observed_at: ts(3600),
                item_ids: vec!["X".to_string()],
            },
        ]);

        assert!(index.is_fresh(&TestDataGenerator::item_match(1, 1, 20, ts(0), "S2", "X")));
        assert!(!index.is_fresh(&TestDataGenerator::item_match(2, 1, 10, ts(0), "S1", "X")));
        assert!(!index.is_fresh(&TestDataGenerator::stored_match(3, 1, 10, 1, ts(0))));
    }

    #[tokio::test]
    async fn test_aggregate_all_runs_every_policy() {
        let objectives: Vec<Objective> = AggregationPolicy::ALL
            .iter()
            .enumerate()
            .map(|(i, policy)| {
                Objective::new(i as i64 + 1, "o", ObjectiveType::Item).with_aggregation(*policy)
            })
            .collect();
        let matches: Vec<ObjectiveMatch> = objectives
            .iter()
            .map(|o| TestDataGenerator::item_match(o.id, o.id, 10, ts(0), "S1", "X"))
            .collect();
        let observations = vec![StashObservation {
            stash_id: "S1".to_string(),
            observed_at: ts(0),
            item_ids: vec!["X".to_string()],
        }];

        let input = AggregationInput::new(objectives, matches, teams(), &observations);
        let aggregations = aggregate_all(Arc::new(input)).await.unwrap();

        assert_eq!(aggregations.len(), AggregationPolicy::ALL.len());
        assert!(aggregations.values().all(|teams| teams.contains_key(&1)));
    }
}
