//! 计分
//!
//! 按目标树自底向上求值：叶子从聚合结果取值，分类从子节点的得分取值，
//! 然后套用节点上的计分预设。每个 (节点, 队伍) 都会产出一条得分。

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use league_shared::objectives::{ObjectiveId, ScoringPolicy, ScoringPreset, TeamId};
use serde::{Deserialize, Serialize};

use crate::aggregation::Aggregations;
use crate::tree::{ObjectiveTree, TreeNode};

/// 得分的稳定标识：(节点, 队伍)
pub type ScoreKey = (ObjectiveId, TeamId);

/// 一次计分的完整结果
pub type ScoreSnapshot = BTreeMap<ScoreKey, Score>;

/// 单个节点上单个队伍的得分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub objective_id: ObjectiveId,
    pub team_id: TeamId,
    pub points: f64,
    /// 名次，从 1 开始；非排名策略或未上榜为 0
    pub rank: u32,
    pub finished: bool,
    /// 完成（或贡献）时间
    pub timestamp: Option<DateTime<Utc>>,
    /// 叶子为聚合数量，分类为已完成子节点数
    pub value: i64,
}

/// 计分前的原始结果
#[derive(Debug, Clone, Copy)]
struct Outcome {
    value: i64,
    finished: bool,
    timestamp: Option<DateTime<Utc>>,
    /// 是否有任何进度
    present: bool,
}

/// 对整棵树计分
pub fn score_tree(tree: &ObjectiveTree, aggregations: &Aggregations, teams: &[TeamId]) -> ScoreSnapshot {
    let mut teams = teams.to_vec();
    teams.sort_unstable();
    teams.dedup();

    // 节点下标 -> 队伍 -> 得分
    let mut by_node: HashMap<usize, HashMap<TeamId, Score>> = HashMap::with_capacity(tree.len());

    for &idx in tree.bottom_up() {
        let node = tree.node(idx);
        let outcomes: Vec<(TeamId, Outcome)> = teams
            .iter()
            .map(|&team_id| (team_id, outcome(node, team_id, aggregations, &by_node)))
            .collect();

        let scores = match &node.objective.scoring_preset {
            Some(preset) => apply_preset(node, preset, &outcomes, &by_node),
            None => outcomes
                .iter()
                .map(|&(team_id, o)| unranked(node.id(), team_id, o, 0.0))
                .collect(),
        };
        by_node.insert(idx, scores.into_iter().map(|s| (s.team_id, s)).collect());
    }

    by_node
        .into_values()
        .flat_map(HashMap::into_values)
        .map(|s| ((s.objective_id, s.team_id), s))
        .collect()
}

/// 各队伍总分
pub fn team_totals(snapshot: &ScoreSnapshot) -> BTreeMap<TeamId, f64> {
    let mut totals = BTreeMap::new();
    for score in snapshot.values() {
        *totals.entry(score.team_id).or_insert(0.0) += score.points;
    }
    totals
}

fn outcome(
    node: &TreeNode,
    team_id: TeamId,
    aggregations: &Aggregations,
    by_node: &HashMap<usize, HashMap<TeamId, Score>>,
) -> Outcome {
    if node.is_leaf() {
        return match aggregations.get(&node.id()).and_then(|teams| teams.get(&team_id)) {
            Some(m) => Outcome {
                value: m.number,
                finished: m.finished,
                timestamp: Some(m.timestamp),
                present: true,
            },
            None => Outcome {
                value: 0,
                finished: false,
                timestamp: None,
                present: false,
            },
        };
    }

    let finished_children: Vec<&Score> = node
        .children
        .iter()
        .filter_map(|child| by_node.get(child).and_then(|scores| scores.get(&team_id)))
        .filter(|s| s.finished)
        .collect();

    let count = finished_children.len();
    Outcome {
        value: count as i64,
        finished: count == node.children.len(),
        timestamp: finished_children.iter().filter_map(|s| s.timestamp).max(),
        present: count > 0,
    }
}

fn unranked(objective_id: ObjectiveId, team_id: TeamId, o: Outcome, points: f64) -> Score {
    Score {
        objective_id,
        team_id,
        points,
        rank: 0,
        finished: o.finished,
        timestamp: o.timestamp,
        value: o.value,
    }
}

fn apply_preset(
    node: &TreeNode,
    preset: &ScoringPreset,
    outcomes: &[(TeamId, Outcome)],
    by_node: &HashMap<usize, HashMap<TeamId, Score>>,
) -> Vec<Score> {
    let id = node.id();

    match preset.policy {
        ScoringPolicy::Presence => outcomes
            .iter()
            .map(|&(team_id, o)| {
                let points = if o.finished { preset.tier(0) } else { 0.0 };
                unranked(id, team_id, o, points)
            })
            .collect(),

        ScoringPolicy::PointsFromValue => outcomes
            .iter()
            .map(|&(team_id, o)| {
                let raw = o.value as f64 * preset.tier(0);
                let points = preset.point_cap.map_or(raw, |cap| raw.min(cap));
                unranked(id, team_id, o, points)
            })
            .collect(),

        ScoringPolicy::RankedTime => {
            let mut eligible: Vec<(TeamId, DateTime<Utc>)> = outcomes
                .iter()
                .filter(|(_, o)| o.finished)
                .filter_map(|&(team_id, o)| o.timestamp.map(|t| (team_id, t)))
                .collect();
            eligible.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
            ranked(id, preset, outcomes, &competition_ranks(&eligible))
        }

        ScoringPolicy::RankedValue => {
            let mut eligible = present_values(outcomes);
            eligible.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            ranked(id, preset, outcomes, &competition_ranks(&eligible))
        }

        ScoringPolicy::RankedReverse => {
            let mut eligible = present_values(outcomes);
            eligible.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
            ranked(id, preset, outcomes, &competition_ranks(&eligible))
        }

        ScoringPolicy::RankedCompletion => {
            // 完成子节点数降序，同数时最后一次完成越早越靠前
            let mut eligible: Vec<(TeamId, (i64, Option<DateTime<Utc>>))> = outcomes
                .iter()
                .filter(|(_, o)| o.value > 0)
                .map(|&(team_id, o)| (team_id, (o.value, o.timestamp)))
                .collect();
            eligible.sort_by(|(a_team, (a_count, a_at)), (b_team, (b_count, b_at))| {
                b_count
                    .cmp(a_count)
                    .then(a_at.cmp(b_at))
                    .then(a_team.cmp(b_team))
            });
            ranked(id, preset, outcomes, &competition_ranks(&eligible))
        }

        ScoringPolicy::BonusPerCompletion => {
            let mut bonus: HashMap<TeamId, f64> = HashMap::new();
            for child in &node.children {
                let Some(child_scores) = by_node.get(child) else {
                    continue;
                };
                let mut finishers: Vec<(TeamId, DateTime<Utc>)> = child_scores
                    .values()
                    .filter(|s| s.finished)
                    .filter_map(|s| s.timestamp.map(|t| (s.team_id, t)))
                    .collect();
                finishers.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

                for (team_id, rank) in competition_ranks(&finishers) {
                    *bonus.entry(team_id).or_insert(0.0) += preset.tier(rank as usize - 1);
                }
            }
            outcomes
                .iter()
                .map(|&(team_id, o)| {
                    let points = bonus.get(&team_id).copied().unwrap_or(0.0);
                    unranked(id, team_id, o, points)
                })
                .collect()
        }

        ScoringPolicy::BingoN => bingo(node, preset, outcomes, by_node),
    }
}

fn present_values(outcomes: &[(TeamId, Outcome)]) -> Vec<(TeamId, i64)> {
    outcomes
        .iter()
        .filter(|(_, o)| o.present)
        .map(|&(team_id, o)| (team_id, o.value))
        .collect()
}

/// 第 N 个子节点完成时整个分类即完成，按该时刻排名；多完成的子节点不再加分
fn bingo(
    node: &TreeNode,
    preset: &ScoringPreset,
    outcomes: &[(TeamId, Outcome)],
    by_node: &HashMap<usize, HashMap<TeamId, Score>>,
) -> Vec<Score> {
    let n = preset.bingo_n.unwrap_or(1).max(1) as usize;

    let bingo_at: HashMap<TeamId, Option<DateTime<Utc>>> = outcomes
        .iter()
        .map(|&(team_id, _)| {
            let mut times: Vec<DateTime<Utc>> = node
                .children
                .iter()
                .filter_map(|child| by_node.get(child).and_then(|scores| scores.get(&team_id)))
                .filter(|s| s.finished)
                .filter_map(|s| s.timestamp)
                .collect();
            times.sort_unstable();
            (team_id, times.get(n - 1).copied())
        })
        .collect();

    let mut eligible: Vec<(TeamId, DateTime<Utc>)> = bingo_at
        .iter()
        .filter_map(|(&team_id, at)| at.map(|t| (team_id, t)))
        .collect();
    eligible.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
    let ranks: HashMap<TeamId, u32> = competition_ranks(&eligible).into_iter().collect();

    outcomes
        .iter()
        .map(|&(team_id, o)| {
            let at = bingo_at.get(&team_id).copied().flatten();
            let rank = ranks.get(&team_id).copied().unwrap_or(0);
            Score {
                objective_id: node.id(),
                team_id,
                points: if rank > 0 { preset.tier(rank as usize - 1) } else { 0.0 },
                rank,
                finished: at.is_some(),
                timestamp: at.or(o.timestamp),
                value: o.value,
            }
        })
        .collect()
}

fn ranked(
    id: ObjectiveId,
    preset: &ScoringPreset,
    outcomes: &[(TeamId, Outcome)],
    ranks: &[(TeamId, u32)],
) -> Vec<Score> {
    let ranks: HashMap<TeamId, u32> = ranks.iter().copied().collect();
    outcomes
        .iter()
        .map(|&(team_id, o)| {
            let rank = ranks.get(&team_id).copied().unwrap_or(0);
            let points = if rank > 0 { preset.tier(rank as usize - 1) } else { 0.0 };
            Score {
                rank,
                ..unranked(id, team_id, o, points)
            }
        })
        .collect()
}

/// 标准竞赛排名（1, 1, 3）：输入已按排序键排好，键相同的队伍名次相同
fn competition_ranks<K: PartialEq>(sorted: &[(TeamId, K)]) -> Vec<(TeamId, u32)> {
    let mut ranks = Vec::with_capacity(sorted.len());
    let mut current = 0u32;
    for (i, (team_id, key)) in sorted.iter().enumerate() {
        if i == 0 || sorted[i - 1].1 != *key {
            current = i as u32 + 1;
        }
        ranks.push((*team_id, current));
    }
    ranks
}
