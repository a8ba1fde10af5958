//! 目标树
//!
//! 目标以父指针行存储，加载时转成内存 arena：节点按下标存放，
//! 子节点通过下标访问，并预先计算自底向上的求值顺序。
//! 计分热路径只按这个顺序遍历，不做递归。

use std::collections::HashMap;

use league_shared::objectives::{Objective, ObjectiveId, ScoringPolicy};

use crate::error::{Result, ScoringError};

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub objective: Objective,
    pub parent: Option<usize>,
    /// 子节点下标，按目标 ID 升序
    pub children: Vec<usize>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn id(&self) -> ObjectiveId {
        self.objective.id
    }
}

#[derive(Debug, Clone)]
pub struct ObjectiveTree {
    nodes: Vec<TreeNode>,
    index: HashMap<ObjectiveId, usize>,
    root: usize,
    /// 后序遍历：子节点总在父节点之前
    bottom_up: Vec<usize>,
}

impl ObjectiveTree {
    /// 从父指针行构建
    ///
    /// 校验：非空、ID 唯一、父节点存在、恰有一个根、无环，以及计分预设参数完整。
    pub fn build(objectives: Vec<Objective>) -> Result<Self> {
        if objectives.is_empty() {
            return Err(ScoringError::EmptyTree);
        }

        let mut objectives = objectives;
        objectives.sort_by_key(|o| o.id);

        let mut index = HashMap::with_capacity(objectives.len());
        for (i, objective) in objectives.iter().enumerate() {
            if index.insert(objective.id, i).is_some() {
                return Err(ScoringError::DuplicateObjective(objective.id));
            }
            validate_preset(objective)?;
        }

        let mut nodes: Vec<TreeNode> = Vec::with_capacity(objectives.len());
        let mut roots = Vec::new();
        for (i, objective) in objectives.into_iter().enumerate() {
            let parent = match objective.parent_id {
                Some(parent_id) => Some(*index.get(&parent_id).ok_or(
                    ScoringError::MissingParent {
                        objective_id: objective.id,
                        parent_id,
                    },
                )?),
                None => {
                    roots.push(i);
                    None
                }
            };
            nodes.push(TreeNode {
                objective,
                parent,
                children: Vec::new(),
            });
        }

        if roots.len() != 1 {
            return Err(ScoringError::RootCount(roots.len()));
        }
        let root = roots[0];

        // 节点已按 ID 排序，子节点列表自然有序
        for i in 0..nodes.len() {
            if let Some(parent) = nodes[i].parent {
                nodes[parent].children.push(i);
            }
        }

        let bottom_up = post_order(&nodes, root);
        if bottom_up.len() != nodes.len() {
            return Err(ScoringError::Unreachable(nodes.len() - bottom_up.len()));
        }

        Ok(Self {
            nodes,
            index,
            root,
            bottom_up,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[self.root]
    }

    pub fn node(&self, idx: usize) -> &TreeNode {
        &self.nodes[idx]
    }

    pub fn get(&self, id: ObjectiveId) -> Option<&TreeNode> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    /// 自底向上的节点下标
    pub fn bottom_up(&self) -> &[usize] {
        &self.bottom_up
    }

    /// 全部叶子目标
    pub fn leaves(&self) -> impl Iterator<Item = &Objective> {
        self.nodes.iter().filter(|n| n.is_leaf()).map(|n| &n.objective)
    }
}

fn post_order(nodes: &[TreeNode], root: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(nodes.len());
    // (节点, 是否已展开子节点)
    let mut stack = vec![(root, false)];

    while let Some((idx, expanded)) = stack.pop() {
        if expanded {
            order.push(idx);
            continue;
        }
        stack.push((idx, true));
        for &child in nodes[idx].children.iter().rev() {
            stack.push((child, false));
        }
    }
    order
}

fn validate_preset(objective: &Objective) -> Result<()> {
    let Some(preset) = &objective.scoring_preset else {
        return Ok(());
    };

    let invalid = |reason: &str| ScoringError::InvalidPreset {
        objective_id: objective.id,
        reason: reason.to_string(),
    };

    if preset.policy == ScoringPolicy::BingoN && preset.bingo_n.is_none_or(|n| n == 0) {
        return Err(invalid("BINGO_N 需要正整数 bingo_n"));
    }
    if preset.point_cap.is_some_and(|cap| cap < 0.0) {
        return Err(invalid("point_cap 不能为负"));
    }
    if preset.points.iter().any(|p| !p.is_finite()) {
        return Err(invalid("分数档位必须是有限数"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use league_shared::objectives::{ObjectiveType, ScoringPreset};

    fn category(id: ObjectiveId, parent: Option<ObjectiveId>) -> Objective {
        let objective = Objective::new(id, format!("node-{id}"), ObjectiveType::Item);
        match parent {
            Some(p) => objective.with_parent(p),
            None => objective,
        }
    }

    #[test]
    fn test_bottom_up_order() {
        let tree = ObjectiveTree::build(vec![
            category(1, None),
            category(3, Some(1)),
            category(2, Some(1)),
            category(4, Some(2)),
            category(5, Some(2)),
        ])
        .unwrap();

        let order: Vec<_> = tree.bottom_up().iter().map(|&i| tree.node(i).id()).collect();
        assert_eq!(order, vec![4, 5, 2, 3, 1]);
        assert_eq!(tree.root().id(), 1);
        assert_eq!(tree.leaves().map(|o| o.id).collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn test_missing_parent() {
        let err = ObjectiveTree::build(vec![category(1, None), category(2, Some(9))]).unwrap_err();
        assert_eq!(err.code(), "MISSING_PARENT");
    }

    #[test]
    fn test_multiple_roots() {
        let err = ObjectiveTree::build(vec![category(1, None), category(2, None)]).unwrap_err();
        assert!(matches!(err, ScoringError::RootCount(2)));
    }

    #[test]
    fn test_cycle_is_unreachable() {
        let err = ObjectiveTree::build(vec![
            category(1, None),
            category(2, Some(3)),
            category(3, Some(2)),
        ])
        .unwrap_err();
        assert!(matches!(err, ScoringError::Unreachable(2)));
    }

    #[test]
    fn test_duplicate_and_empty() {
        assert!(matches!(ObjectiveTree::build(vec![]), Err(ScoringError::EmptyTree)));
        let err = ObjectiveTree::build(vec![category(1, None), category(1, None)]).unwrap_err();
        assert!(matches!(err, ScoringError::DuplicateObjective(1)));
    }

    #[test]
    fn test_bingo_requires_n() {
        let root = category(1, None).with_scoring(ScoringPreset::new(1, ScoringPolicy::BingoN, vec![10.0]));
        let err = ObjectiveTree::build(vec![root]).unwrap_err();
        assert_eq!(err.code(), "INVALID_PRESET");
    }
}
