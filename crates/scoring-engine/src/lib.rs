//! 聚合与计分引擎
//!
//! 把匹配记录按队伍聚合，再沿目标树自底向上计分，并与上一次快照比较。

pub mod aggregation;
pub mod diff;
pub mod engine;
pub mod error;
pub mod scoring;
pub mod tree;

pub use aggregation::{
    AggregatedMatch, AggregationInput, Aggregations, FreshnessIndex, aggregate_all,
    aggregate_objective,
};
pub use diff::{ChangeKind, ScoreChange, classify, diff};
pub use engine::{ScoringEngine, ScoringInput, ScoringPass};
pub use error::{Result, ScoringError};
pub use scoring::{Score, ScoreKey, ScoreSnapshot, score_tree, team_totals};
pub use tree::{ObjectiveTree, TreeNode};
