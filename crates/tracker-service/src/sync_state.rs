//! 目标同步状态
//!
//! 新建或失同步的目标需要从日志起点重放补齐。重放期间所有候选匹配先进入积压区，
//! 消费游标到达目标游标时一次性交给存储层：删除这些目标的旧匹配、写入积压、标记已同步。

use std::collections::BTreeSet;

use league_shared::objectives::{MatchCandidate, ObjectiveId};
use parking_lot::Mutex;
use tracing::info;

use crate::cursor::ChangeCursor;

/// 同步完成时交给存储层的内容
#[derive(Debug, Clone, PartialEq)]
pub struct SyncCompletion {
    pub objectives: Vec<ObjectiveId>,
    pub backlog: Vec<MatchCandidate>,
}

#[derive(Default)]
struct SyncInner {
    pending: BTreeSet<ObjectiveId>,
    target: Option<ChangeCursor>,
    backlog: Vec<MatchCandidate>,
}

#[derive(Default)]
pub struct SyncTracker {
    inner: Mutex<SyncInner>,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始同步，直到消费游标到达 `target`
    pub fn begin(&self, objectives: impl IntoIterator<Item = ObjectiveId>, target: ChangeCursor) {
        let mut inner = self.inner.lock();
        inner.pending.extend(objectives);
        inner.backlog.clear();
        info!(
            objectives = inner.pending.len(),
            target = %target,
            "开始重放同步"
        );
        inner.target = Some(target);
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.lock().target.is_some()
    }

    pub fn is_pending(&self, objective_id: ObjectiveId) -> bool {
        self.inner.lock().pending.contains(&objective_id)
    }

    /// 待同步目标，升序
    pub fn pending(&self) -> Vec<ObjectiveId> {
        self.inner.lock().pending.iter().copied().collect()
    }

    pub fn target(&self) -> Option<ChangeCursor> {
        self.inner.lock().target.clone()
    }

    pub fn backlog_len(&self) -> usize {
        self.inner.lock().backlog.len()
    }

    pub fn accumulate(&self, candidates: Vec<MatchCandidate>) {
        let mut inner = self.inner.lock();
        if inner.target.is_some() {
            inner.backlog.extend(candidates);
        }
    }

    /// 消费完一个游标为 `cursor` 的批次后调用
    ///
    /// 到达目标游标时清空状态并返回待提交的内容；未在同步或未到达时返回 `None`。
    pub fn observe(&self, cursor: &ChangeCursor) -> Option<SyncCompletion> {
        let mut inner = self.inner.lock();
        let reached = inner.target.as_ref().is_some_and(|t| cursor.reached(t));
        if !reached {
            return None;
        }

        inner.target = None;
        let objectives: Vec<ObjectiveId> = std::mem::take(&mut inner.pending).into_iter().collect();
        let backlog = std::mem::take(&mut inner.backlog);
        info!(
            objectives = objectives.len(),
            backlog = backlog.len(),
            cursor = %cursor,
            "消费游标已到达同步目标"
        );
        Some(SyncCompletion { objectives, backlog })
    }
}
