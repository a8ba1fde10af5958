//! 条件编译器
//!
//! 把目标的条件列表编译成纯函数匹配器，并提取用于分桶派发的判别字段。
//! 所有校验（操作符与字段类型、数值解析、正则、字段归属）都在这里完成，
//! 匹配阶段不会再出现解析错误。

use std::collections::HashSet;

use league_shared::objectives::{
    Condition, ConditionField, FieldType, Objective, ObjectiveType, Operator,
};
use league_shared::stash::Item;
use regex::Regex;

use crate::error::{MatcherError, Result};
use crate::evaluator::FieldSource;
use crate::operators::{Comparison, Predicate};

/// 可用于派发的判别字段，声明顺序即优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiscriminatorField {
    BaseType,
    Name,
    ItemClass,
}

impl DiscriminatorField {
    pub const ALL: [DiscriminatorField; 3] = [Self::BaseType, Self::Name, Self::ItemClass];

    fn from_condition_field(field: ConditionField) -> Option<Self> {
        match field {
            ConditionField::BaseType => Some(Self::BaseType),
            ConditionField::Name => Some(Self::Name),
            ConditionField::ItemClass => Some(Self::ItemClass),
            _ => None,
        }
    }

    /// 物品在该字段上的取值
    pub fn value_of<'a>(&self, item: &'a Item) -> &'a str {
        match self {
            Self::BaseType => &item.base_type,
            Self::Name => &item.name,
            Self::ItemClass => item.item_class(),
        }
    }
}

/// 判别条件：物品必须在 `field` 上取 `values` 之一，匹配器才有可能成立
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discriminator {
    pub field: DiscriminatorField,
    pub values: Vec<String>,
}

/// 编译后的单个条件
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    pub field: ConditionField,
    pub predicate: Predicate,
}

impl CompiledCondition {
    #[inline]
    pub fn test<S: FieldSource + ?Sized>(&self, source: &S) -> bool {
        source
            .field(self.field)
            .is_some_and(|value| self.predicate.test(&value))
    }
}

/// 条件的隐式 AND，按声明顺序短路求值
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    conditions: Vec<CompiledCondition>,
}

impl Matcher {
    pub fn matches<S: FieldSource + ?Sized>(&self, source: &S) -> bool {
        self.conditions.iter().all(|c| c.test(source))
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// 单个目标的编译结果
#[derive(Debug, Clone)]
pub struct CompiledObjective {
    pub matcher: Matcher,
    /// 为空时进入通配桶
    pub discriminator: Option<Discriminator>,
}

/// 编译一个目标的全部条件
///
/// ITEM 目标不能引用玩家字段，PLAYER 目标只能引用玩家字段。
pub fn compile_objective(objective: &Objective) -> Result<CompiledObjective> {
    if !objective.unreadable_conditions.is_empty() {
        return Err(MatcherError::UnreadableConditions(
            objective.unreadable_conditions.clone(),
        ));
    }

    let mut conditions = Vec::with_capacity(objective.conditions.len());

    for condition in &objective.conditions {
        let field_allowed = match objective.objective_type {
            ObjectiveType::Player => condition.field.is_player_field(),
            _ => !condition.field.is_player_field(),
        };
        if !field_allowed {
            return Err(MatcherError::FieldNotAllowed {
                field: condition.field,
                objective_type: objective.objective_type,
            });
        }

        conditions.push(compile_condition(condition)?);
    }

    Ok(CompiledObjective {
        matcher: Matcher { conditions },
        discriminator: extract_discriminator(&objective.conditions),
    })
}

/// 编译单个条件
pub fn compile_condition(condition: &Condition) -> Result<CompiledCondition> {
    let field = condition.field;
    let operator = condition.operator;
    let field_type = field.field_type();

    if !Operator::allowed_for(field_type).contains(&operator) {
        return Err(MatcherError::InvalidOperator {
            field,
            operator,
            field_type,
        });
    }

    let predicate = match (field_type, operator) {
        (FieldType::Boolean, Operator::Eq | Operator::Neq) => Predicate::Bool {
            expected: parse_bool(condition)?,
            negate: operator == Operator::Neq,
        },

        (FieldType::Numeric, Operator::In | Operator::NotIn) => Predicate::IntSet {
            values: condition
                .list_values()
                .into_iter()
                .map(|v| parse_int(condition, v))
                .collect::<Result<HashSet<_>>>()?,
            negate: operator == Operator::NotIn,
        },
        (FieldType::Numeric, _) => Predicate::Int {
            cmp: comparison(operator),
            expected: parse_int(condition, condition.value.trim())?,
        },

        (FieldType::String, Operator::Eq | Operator::Neq) => Predicate::Text {
            expected: condition.value.clone(),
            negate: operator == Operator::Neq,
        },
        (FieldType::String, Operator::In | Operator::NotIn) => Predicate::TextSet {
            values: condition
                .list_values()
                .into_iter()
                .map(str::to_string)
                .collect(),
            negate: operator == Operator::NotIn,
        },
        (FieldType::String, Operator::Matches) => Predicate::Regex {
            regex: parse_regex(condition)?,
        },
        (FieldType::String, Operator::Contains) => Predicate::Substring {
            needle: condition.value.clone(),
        },

        (FieldType::StringArray, Operator::Contains | Operator::NotContains) => {
            Predicate::Element {
                value: condition.value.clone(),
                negate: operator == Operator::NotContains,
            }
        }
        (FieldType::StringArray, Operator::ContainsAll) => Predicate::AllElements {
            values: condition
                .list_values()
                .into_iter()
                .map(str::to_string)
                .collect(),
        },
        (FieldType::StringArray, Operator::ContainsMatch | Operator::DoesNotMatch) => {
            Predicate::AnyElementMatches {
                regex: parse_regex(condition)?,
                negate: operator == Operator::DoesNotMatch,
            }
        }

        // 字符串与数组共用长度比较
        (_, Operator::LengthEq | Operator::LengthGt | Operator::LengthLt) => Predicate::Length {
            cmp: comparison(operator),
            expected: parse_int(condition, condition.value.trim())?,
        },

        _ => {
            return Err(MatcherError::InvalidOperator {
                field,
                operator,
                field_type,
            });
        }
    };

    Ok(CompiledCondition { field, predicate })
}

/// 选择判别字段：BASE_TYPE > NAME > ITEM_CLASS，同一目标只落在一个字段的桶里
fn extract_discriminator(conditions: &[Condition]) -> Option<Discriminator> {
    let (field, condition) = conditions
        .iter()
        .filter(|c| matches!(c.operator, Operator::Eq | Operator::In))
        .filter_map(|c| DiscriminatorField::from_condition_field(c.field).map(|f| (f, c)))
        .min_by_key(|(f, _)| *f)?;

    let mut values: Vec<String> = match condition.operator {
        Operator::In => condition
            .list_values()
            .into_iter()
            .map(str::to_string)
            .collect(),
        _ => vec![condition.value.clone()],
    };
    values.sort();
    values.dedup();

    Some(Discriminator { field, values })
}

fn comparison(operator: Operator) -> Comparison {
    match operator {
        Operator::Neq => Comparison::Neq,
        Operator::Gt | Operator::LengthGt => Comparison::Gt,
        Operator::Lt | Operator::LengthLt => Comparison::Lt,
        _ => Comparison::Eq,
    }
}

fn invalid_value(condition: &Condition, reason: impl Into<String>) -> MatcherError {
    MatcherError::InvalidValue {
        field: condition.field,
        operator: condition.operator,
        value: condition.value.clone(),
        reason: reason.into(),
    }
}

fn parse_bool(condition: &Condition) -> Result<bool> {
    match condition.value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid_value(condition, "需要 true 或 false")),
    }
}

fn parse_int(condition: &Condition, raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|e| invalid_value(condition, format!("无法解析为整数: {e}")))
}

fn parse_regex(condition: &Condition) -> Result<Regex> {
    Regex::new(&condition.value).map_err(|source| MatcherError::InvalidRegex {
        field: condition.field,
        pattern: condition.value.clone(),
        source,
    })
}
