//! 目标仓储（只读）
//!
//! 目标行、条件行和计分预设由 CRUD 层写入。枚举列以文本存储，读取时解析。
//! 目标类型、聚合和计分策略的未知取值作为错误返回；
//! 条件的未知字段或操作符只让所属目标停止匹配，记录 warn 日志。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use league_shared::error::TrackerError;
use league_shared::objectives::{
    Condition, ConditionField, Objective, ObjectiveId, Operator, ScoringPreset, SyncStatus, Team,
    UserId, ValidityWindow,
};
use sqlx::PgPool;
use tracing::{instrument, warn};

use super::traits::{EventInfo, ObjectiveSource};
use crate::error::Result;

#[derive(sqlx::FromRow)]
struct ObjectiveRow {
    id: i64,
    name: String,
    parent_id: Option<i64>,
    objective_type: String,
    required_amount: i64,
    aggregation: String,
    number_field: String,
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
    preset_id: Option<i64>,
    scoring_policy: Option<String>,
    points: Option<Vec<f64>>,
    point_cap: Option<f64>,
    bingo_n: Option<i32>,
    sync_status: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ConditionRow {
    objective_id: i64,
    field: String,
    operator: String,
    value: String,
}

/// 单个目标的条件，保留声明顺序
#[derive(Debug, Default)]
struct ObjectiveConditions {
    parsed: Vec<Condition>,
    unreadable: Vec<String>,
}

/// 行已按目标和位置排序
fn group_conditions(rows: Vec<ConditionRow>) -> HashMap<ObjectiveId, ObjectiveConditions> {
    let mut by_objective: HashMap<ObjectiveId, ObjectiveConditions> = HashMap::new();
    for row in rows {
        let entry = by_objective.entry(row.objective_id).or_default();
        match (row.field.parse::<ConditionField>(), row.operator.parse::<Operator>()) {
            (Ok(field), Ok(operator)) => entry.parsed.push(Condition::new(field, operator, row.value)),
            _ => {
                warn!(
                    objective_id = row.objective_id,
                    field = %row.field,
                    operator = %row.operator,
                    "无法解析的条件，目标将不参与匹配"
                );
                entry
                    .unreadable
                    .push(format!("{} {} {}", row.field, row.operator, row.value));
            }
        }
    }
    by_objective
}

#[derive(sqlx::FromRow)]
struct TeamMemberRow {
    team_id: i64,
    team_name: String,
    user_id: Option<i64>,
}

pub struct ObjectiveRepository {
    pool: PgPool,
}

impl ObjectiveRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_conditions(
        &self,
        objective_ids: &[ObjectiveId],
    ) -> Result<HashMap<ObjectiveId, ObjectiveConditions>> {
        let rows = sqlx::query_as::<_, ConditionRow>(
            r#"
            SELECT objective_id, field, operator, value
            FROM conditions
            WHERE objective_id = ANY($1)
            ORDER BY objective_id, position, id
            "#,
        )
        .bind(objective_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(group_conditions(rows))
    }
}

impl ObjectiveRow {
    fn into_objective(self, conditions: ObjectiveConditions) -> std::result::Result<Objective, TrackerError> {
        let scoring_preset = match (self.preset_id, self.scoring_policy) {
            (Some(preset_id), Some(policy)) => Some(ScoringPreset {
                id: preset_id,
                policy: policy.parse()?,
                points: self.points.unwrap_or_default(),
                point_cap: self.point_cap,
                bingo_n: self.bingo_n.and_then(|n| u32::try_from(n).ok()),
            }),
            _ => None,
        };

        Ok(Objective {
            id: self.id,
            name: self.name,
            parent_id: self.parent_id,
            objective_type: self.objective_type.parse()?,
            required_amount: self.required_amount,
            aggregation: self.aggregation.parse()?,
            number_field: self.number_field.parse()?,
            conditions: conditions.parsed,
            unreadable_conditions: conditions.unreadable,
            window: ValidityWindow::new(self.valid_from, self.valid_to),
            scoring_preset,
            // 没有同步记录的目标是新建的，需要补齐历史
            sync_status: match self.sync_status {
                Some(status) => status.parse()?,
                None => SyncStatus::Desynced,
            },
        })
    }
}

#[async_trait]
impl ObjectiveSource for ObjectiveRepository {
    #[instrument(skip(self))]
    async fn load_event(&self, event_id: i64) -> Result<Option<EventInfo>> {
        let event = sqlx::query_as::<_, EventInfo>(
            "SELECT id, name, league, objective_version FROM events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }

    async fn objective_set_version(&self, event_id: i64) -> Result<i64> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT objective_version FROM events WHERE id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(version.unwrap_or(0))
    }

    #[instrument(skip(self))]
    async fn load_objectives(&self, event_id: i64) -> Result<Vec<Objective>> {
        let rows = sqlx::query_as::<_, ObjectiveRow>(
            r#"
            SELECT o.id, o.name, o.parent_id, o.objective_type, o.required_amount,
                   o.aggregation, o.number_field, o.valid_from, o.valid_to,
                   p.id AS preset_id, p.policy AS scoring_policy, p.points, p.point_cap, p.bingo_n,
                   s.status AS sync_status
            FROM objectives o
            LEFT JOIN scoring_presets p ON p.id = o.scoring_preset_id
            LEFT JOIN objective_sync_state s ON s.objective_id = o.id
            WHERE o.event_id = $1
            ORDER BY o.id
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<ObjectiveId> = rows.iter().map(|r| r.id).collect();
        let mut conditions = self.load_conditions(&ids).await?;

        let objectives = rows
            .into_iter()
            .map(|row| {
                let own = conditions.remove(&row.id).unwrap_or_default();
                row.into_objective(own)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(objectives)
    }

    async fn load_teams(&self, event_id: i64) -> Result<Vec<Team>> {
        let rows = sqlx::query_as::<_, TeamMemberRow>(
            r#"
            SELECT t.id AS team_id, t.name AS team_name, tu.user_id
            FROM teams t
            LEFT JOIN team_users tu ON tu.team_id = t.id
            WHERE t.event_id = $1
            ORDER BY t.id, tu.user_id
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(group_teams(rows))
    }

    async fn load_accounts(&self, event_id: i64) -> Result<HashMap<String, UserId>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT u.account_name, u.id
            FROM users u
            JOIN team_users tu ON tu.user_id = u.id
            JOIN teams t ON t.id = tu.team_id
            WHERE t.event_id = $1 AND u.account_name IS NOT NULL
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }
}

/// 行已按队伍 ID 排序
fn group_teams(rows: Vec<TeamMemberRow>) -> Vec<Team> {
    let mut teams: Vec<Team> = Vec::new();
    for row in rows {
        if teams.last().is_none_or(|t| t.id != row.team_id) {
            teams.push(Team {
                id: row.team_id,
                name: row.team_name,
                user_ids: Vec::new(),
            });
        }
        if let (Some(team), Some(user_id)) = (teams.last_mut(), row.user_id) {
            team.user_ids.push(user_id);
        }
    }
    teams
}

#[cfg(test)]
mod tests {
    use super::*;
    use league_shared::objectives::{AggregationPolicy, ObjectiveType, ScoringPolicy};

    fn row() -> ObjectiveRow {
        ObjectiveRow {
            id: 7,
            name: "Mirror".to_string(),
            parent_id: Some(1),
            objective_type: "ITEM".to_string(),
            required_amount: 1,
            aggregation: "EARLIEST_FRESH_ITEM".to_string(),
            number_field: "STACK_SIZE".to_string(),
            valid_from: None,
            valid_to: None,
            preset_id: Some(3),
            scoring_policy: Some("RANKED_TIME".to_string()),
            points: Some(vec![10.0, 5.0]),
            point_cap: None,
            bingo_n: None,
            sync_status: None,
        }
    }

    #[test]
    fn test_row_into_objective() {
        let objective = row().into_objective(ObjectiveConditions::default()).unwrap();
        assert_eq!(objective.objective_type, ObjectiveType::Item);
        assert_eq!(objective.aggregation, AggregationPolicy::EarliestFreshItem);
        assert_eq!(objective.sync_status, SyncStatus::Desynced);
        let preset = objective.scoring_preset.unwrap();
        assert_eq!(preset.policy, ScoringPolicy::RankedTime);
        assert_eq!(preset.tier(1), 5.0);
    }

    #[test]
    fn test_unknown_enum_value_is_error() {
        let mut bad = row();
        bad.aggregation = "AVERAGE".to_string();
        let err = bad.into_objective(ObjectiveConditions::default()).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_VARIANT");
    }

    fn condition_row(objective_id: i64, field: &str, operator: &str, value: &str) -> ConditionRow {
        ConditionRow {
            objective_id,
            field: field.to_string(),
            operator: operator.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_unknown_operator_only_affects_its_objective() {
        let mut grouped = group_conditions(vec![
            condition_row(7, "BASE_TYPE", "EQ", "Mirror of Kalandra"),
            condition_row(7, "NAME", "STARTS_WITH", "Mir"),
            condition_row(8, "BASE_TYPE", "EQ", "Chaos Orb"),
        ]);

        let broken = row().into_objective(grouped.remove(&7).unwrap()).unwrap();
        assert_eq!(broken.conditions.len(), 1);
        assert_eq!(broken.unreadable_conditions, vec!["NAME STARTS_WITH Mir"]);

        let healthy = grouped.remove(&8).unwrap();
        assert_eq!(healthy.parsed.len(), 1);
        assert!(healthy.unreadable.is_empty());
    }

    #[test]
    fn test_group_teams() {
        let rows = vec![
            TeamMemberRow {
                team_id: 1,
                team_name: "red".to_string(),
                user_id: Some(10),
            },
            TeamMemberRow {
                team_id: 1,
                team_name: "red".to_string(),
                user_id: Some(11),
            },
            TeamMemberRow {
                team_id: 2,
                team_name: "blue".to_string(),
                user_id: None,
            },
        ];
        let teams = group_teams(rows);
        assert_eq!(teams.len(), 2);
        assert_eq!(teams[0].user_ids, vec![10, 11]);
        assert!(teams[1].user_ids.is_empty());
    }
}
