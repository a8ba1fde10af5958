//! 匹配引擎错误类型

use league_shared::error::TrackerError;
use league_shared::objectives::{ConditionField, FieldType, ObjectiveType, Operator};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("无效的操作符: {operator} 不支持 {field_type} 类型字段 {field}")]
    InvalidOperator {
        field: ConditionField,
        operator: Operator,
        field_type: FieldType,
    },

    #[error("无效的条件值: {field} {operator} '{value}' - {reason}")]
    InvalidValue {
        field: ConditionField,
        operator: Operator,
        value: String,
        reason: String,
    },

    #[error("正则表达式无效: {field} '{pattern}' - {source}")]
    InvalidRegex {
        field: ConditionField,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("字段 {field} 不能用于 {objective_type} 类型目标")]
    FieldNotAllowed {
        field: ConditionField,
        objective_type: ObjectiveType,
    },

    #[error("目标存在无法解析的条件: {0:?}")]
    UnreadableConditions(Vec<String>),

    #[error(transparent)]
    Shared(#[from] TrackerError),
}

impl MatcherError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidOperator { .. } => "INVALID_OPERATOR",
            Self::InvalidValue { .. } => "INVALID_VALUE",
            Self::InvalidRegex { .. } => "INVALID_REGEX",
            Self::FieldNotAllowed { .. } => "FIELD_NOT_ALLOWED",
            Self::UnreadableConditions(_) => "UNREADABLE_CONDITIONS",
            Self::Shared(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MatcherError>;
