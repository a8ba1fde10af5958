//! 集成测试共用的内存存储与目标来源

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use league_shared::objectives::{
    MatchCandidate, Objective, ObjectiveId, ObjectiveMatch, StashObservation, Team, UserId,
};
use parking_lot::Mutex;
use tracker_service::Result;
use tracker_service::repository::{EventInfo, MatchStore, ObjectiveSource};

/// 带唯一键约束的内存存储
#[derive(Default)]
pub struct MemoryStore {
    matches: Mutex<Vec<ObjectiveMatch>>,
    observations: Mutex<HashMap<String, StashObservation>>,
}

pub type MatchKey = (ObjectiveId, i64, Option<String>, Option<String>);

pub fn key_of(objective_id: ObjectiveId, user_id: i64, change_id: &Option<String>, item_id: &Option<String>) -> MatchKey {
    (objective_id, user_id, change_id.clone(), item_id.clone())
}

impl MemoryStore {
    pub fn insert(&self, candidates: &[MatchCandidate]) -> u64 {
        let mut matches = self.matches.lock();
        let mut keys: BTreeSet<MatchKey> = matches
            .iter()
            .map(|m| key_of(m.objective_id, m.user_id, &m.change_id, &m.item_id))
            .collect();
        let mut inserted = 0;
        for candidate in candidates {
            let key = key_of(candidate.objective_id, candidate.user_id, &candidate.change_id, &candidate.item_id);
            if keys.insert(key) {
                let id = matches.len() as i64 + 1;
                matches.push(ObjectiveMatch::from_candidate(id, candidate.clone()));
                inserted += 1;
            }
        }
        inserted
    }

    /// 忽略自增 ID 的匹配集合
    pub fn match_set(&self) -> BTreeSet<(ObjectiveId, i64, i64, DateTime<Utc>, Option<String>, Option<String>)> {
        self.matches
            .lock()
            .iter()
            .map(|m| (m.objective_id, m.user_id, m.number, m.timestamp, m.change_id.clone(), m.item_id.clone()))
            .collect()
    }

    pub fn remove_objective(&self, objective_id: ObjectiveId) {
        self.matches.lock().retain(|m| m.objective_id != objective_id);
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn insert_matches(&self, candidates: &[MatchCandidate]) -> Result<u64> {
        Ok(self.insert(candidates))
    }

    async fn mark_syncing(&self, _objective_ids: &[ObjectiveId], _target_cursor: Option<String>) -> Result<()> {
        Ok(())
    }

    async fn complete_sync(&self, objective_ids: &[ObjectiveId], backlog: &[MatchCandidate]) -> Result<u64> {
        self.matches
            .lock()
            .retain(|m| !objective_ids.contains(&m.objective_id));
        Ok(self.insert(backlog))
    }

    async fn load_matches(&self, _event_id: i64) -> Result<Vec<ObjectiveMatch>> {
        Ok(self.matches.lock().clone())
    }

    async fn upsert_observations(&self, _event_id: i64, observations: &[StashObservation]) -> Result<()> {
        let mut stored = self.observations.lock();
        for observation in observations {
            let newer = stored
                .get(&observation.stash_id)
                .is_none_or(|o| o.observed_at <= observation.observed_at);
            if newer {
                stored.insert(observation.stash_id.clone(), observation.clone());
            }
        }
        Ok(())
    }

    async fn load_observations(&self, _event_id: i64) -> Result<Vec<StashObservation>> {
        Ok(self.observations.lock().values().cloned().collect())
    }
}

/// 固定目标集合，账号可在测试中途变更
pub struct StaticSource {
    pub version: i64,
    pub objectives: Vec<Objective>,
    pub accounts: Mutex<HashMap<String, UserId>>,
}

impl StaticSource {
    pub fn new(objectives: Vec<Objective>, accounts: &[(&str, UserId)]) -> Self {
        Self {
            version: 1,
            objectives,
            accounts: Mutex::new(
                accounts
                    .iter()
                    .map(|(name, id)| ((*name).to_string(), *id))
                    .collect(),
            ),
        }
    }

    pub fn add_account(&self, account_name: &str, user_id: UserId) {
        self.accounts.lock().insert(account_name.to_string(), user_id);
    }
}

#[async_trait]
impl ObjectiveSource for StaticSource {
    async fn load_event(&self, _event_id: i64) -> Result<Option<EventInfo>> {
        Ok(None)
    }

    async fn objective_set_version(&self, _event_id: i64) -> Result<i64> {
        Ok(self.version)
    }

    async fn load_objectives(&self, _event_id: i64) -> Result<Vec<Objective>> {
        Ok(self.objectives.clone())
    }

    async fn load_teams(&self, _event_id: i64) -> Result<Vec<Team>> {
        Ok(Vec::new())
    }

    async fn load_accounts(&self, _event_id: i64) -> Result<HashMap<String, UserId>> {
        Ok(self.accounts.lock().clone())
    }
}
