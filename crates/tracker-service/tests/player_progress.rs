//! 玩家进度集成测试
//!
//! 存储按真实唯一键去重，玩家每次进度变化都必须留下记录。

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MemoryStore, StaticSource};
use league_shared::objectives::{Condition, ConditionField, NumberField, Objective, ObjectiveType, Operator};
use objective_matcher::PlayerRegistry;
use objective_matcher::player::CharacterSnapshot;
use tracker_service::PlayerPollLoop;
use tracker_service::repository::MatchStore;

fn level_objective() -> Objective {
    Objective::new(5, "Reach level 90", ObjectiveType::Player)
        .with_conditions(vec![Condition::new(ConditionField::PlayerLevel, Operator::Gt, "89")])
        .with_number_field(NumberField::PlayerLevel)
}

fn character(level: i64) -> CharacterSnapshot {
    CharacterSnapshot {
        character_id: "c-1".to_string(),
        level,
        ascendancy_points: 0,
        pantheon: false,
    }
}

async fn numbers(store: &MemoryStore, user_id: i64) -> Vec<i64> {
    let mut numbers: Vec<i64> = store
        .load_matches(1)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.user_id == user_id)
        .map(|m| m.number)
        .collect();
    numbers.sort_unstable();
    numbers
}

#[tokio::test]
async fn test_every_level_up_is_stored() {
    let source = Arc::new(StaticSource::new(vec![level_objective()], &[("alice", 10)]));
    let store = Arc::new(MemoryStore::default());
    let registry = PlayerRegistry::new();
    let poll = PlayerPollLoop::new(1, registry.clone(), source, store.clone(), Duration::from_secs(60));

    // 第一次轮询只注册账号
    assert_eq!(poll.poll_once().await.unwrap(), 0);

    registry.update_character(10, &character(91));
    assert_eq!(poll.poll_once().await.unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(5)).await;
    registry.update_character(10, &character(92));
    assert_eq!(poll.poll_once().await.unwrap(), 1);

    assert_eq!(numbers(&store, 10).await, vec![91, 92]);
}

#[tokio::test]
async fn test_account_added_without_objective_change_is_polled() {
    let source = Arc::new(StaticSource::new(vec![level_objective()], &[("alice", 10)]));
    let store = Arc::new(MemoryStore::default());
    let registry = PlayerRegistry::new();
    let poll = PlayerPollLoop::new(
        1,
        registry.clone(),
        source.clone(),
        store.clone(),
        Duration::from_secs(60),
    );

    poll.poll_once().await.unwrap();
    assert!(registry.get(20).is_none());

    // 目标集合版本不变，新队员仍应被注册
    source.add_account("bob", 20);
    poll.poll_once().await.unwrap();
    assert!(registry.get(20).is_some());

    registry.update_character(20, &character(95));
    assert_eq!(poll.poll_once().await.unwrap(), 1);
    assert_eq!(numbers(&store, 20).await, vec![95]);
}
