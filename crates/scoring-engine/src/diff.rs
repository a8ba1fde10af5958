//! 得分差异
//!
//! 新快照与上一次快照按 (节点, 队伍) 逐字段比较，只有变化的条目向下游传播。

use serde::{Deserialize, Serialize};

use crate::scoring::{Score, ScoreKey, ScoreSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
    Unchanged,
}

/// 单条得分变化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreChange {
    Added { score: Score },
    Removed { score: Score },
    Changed { previous: Score, current: Score },
}

impl ScoreChange {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Added { .. } => ChangeKind::Added,
            Self::Removed { .. } => ChangeKind::Removed,
            Self::Changed { .. } => ChangeKind::Changed,
        }
    }

    pub fn key(&self) -> ScoreKey {
        let score = match self {
            Self::Added { score } | Self::Removed { score } => score,
            Self::Changed { current, .. } => current,
        };
        (score.objective_id, score.team_id)
    }
}

/// 单个标识的分类
pub fn classify(previous: Option<&Score>, current: Option<&Score>) -> ChangeKind {
    match (previous, current) {
        (None, Some(_)) => ChangeKind::Added,
        (Some(_), None) => ChangeKind::Removed,
        (Some(p), Some(c)) if p != c => ChangeKind::Changed,
        _ => ChangeKind::Unchanged,
    }
}

/// 两次快照的差异，按标识升序；未变化的条目不出现
pub fn diff(previous: &ScoreSnapshot, current: &ScoreSnapshot) -> Vec<ScoreChange> {
    let mut changes = Vec::new();

    for (key, score) in current {
        let before = previous.get(key);
        match classify(before, Some(score)) {
            ChangeKind::Added => changes.push(ScoreChange::Added {
                score: score.clone(),
            }),
            ChangeKind::Changed => {
                if let Some(before) = before {
                    changes.push(ScoreChange::Changed {
                        previous: before.clone(),
                        current: score.clone(),
                    });
                }
            }
            ChangeKind::Removed | ChangeKind::Unchanged => {}
        }
    }

    changes.extend(
        previous
            .iter()
            .filter(|(key, _)| !current.contains_key(key))
            .map(|(_, score)| ScoreChange::Removed {
                score: score.clone(),
            }),
    );

    changes.sort_by_key(ScoreChange::key);
    changes
}
