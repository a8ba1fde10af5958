//! 编译后的操作符
//!
//! 每个条件在编译阶段被解析成一个 `Predicate`：值已完成类型转换，
//! 列表已转为集合，正则已编译。匹配时只做比较，不再解析文本。

use std::collections::HashSet;

use regex::Regex;

use crate::evaluator::FieldValue;

/// 数值与长度比较
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Neq,
    Gt,
    Lt,
}

impl Comparison {
    #[inline]
    pub fn apply(self, actual: i64, expected: i64) -> bool {
        match self {
            Self::Eq => actual == expected,
            Self::Neq => actual != expected,
            Self::Gt => actual > expected,
            Self::Lt => actual < expected,
        }
    }
}

/// 单个条件的可执行形式
///
/// `negate` 标记用于 NEQ / NOT_IN / NOT_CONTAINS / DOES_NOT_MATCH 这类取反操作符。
#[derive(Debug, Clone)]
pub enum Predicate {
    Bool { expected: bool, negate: bool },
    Int { cmp: Comparison, expected: i64 },
    IntSet { values: HashSet<i64>, negate: bool },
    Text { expected: String, negate: bool },
    TextSet { values: HashSet<String>, negate: bool },
    /// 字符串字段：正则匹配
    Regex { regex: Regex },
    /// 字符串字段：子串包含
    Substring { needle: String },
    /// 数组字段：存在等于该值的元素
    Element { value: String, negate: bool },
    /// 数组字段：包含全部取值
    AllElements { values: Vec<String> },
    /// 数组字段：存在匹配正则的元素
    AnyElementMatches { regex: Regex, negate: bool },
    /// 字符串按字符数，数组按元素数
    Length { cmp: Comparison, expected: i64 },
}

impl Predicate {
    /// 对字段值求值；值类型与谓词不符时返回 false
    pub fn test(&self, value: &FieldValue<'_>) -> bool {
        match (self, value) {
            (Self::Bool { expected, negate }, FieldValue::Bool(actual)) => {
                (actual == expected) != *negate
            }
            (Self::Int { cmp, expected }, FieldValue::Int(actual)) => cmp.apply(*actual, *expected),
            (Self::IntSet { values, negate }, FieldValue::Int(actual)) => {
                values.contains(actual) != *negate
            }
            (Self::Text { expected, negate }, FieldValue::Str(actual)) => {
                (*actual == expected.as_str()) != *negate
            }
            (Self::TextSet { values, negate }, FieldValue::Str(actual)) => {
                values.contains(*actual) != *negate
            }
            (Self::Regex { regex }, FieldValue::Str(actual)) => regex.is_match(actual),
            (Self::Substring { needle }, FieldValue::Str(actual)) => actual.contains(needle.as_str()),
            (Self::Length { cmp, expected }, FieldValue::Str(actual)) => {
                cmp.apply(actual.chars().count() as i64, *expected)
            }

            (Self::Element { value, negate }, FieldValue::List(items)) => {
                items.iter().any(|item| *item == value.as_str()) != *negate
            }
            (Self::AllElements { values }, FieldValue::List(items)) => values
                .iter()
                .all(|wanted| items.iter().any(|item| *item == wanted.as_str())),
            (Self::AnyElementMatches { regex, negate }, FieldValue::List(items)) => {
                items.iter().any(|item| regex.is_match(item)) != *negate
            }
            (Self::Length { cmp, expected }, FieldValue::List(items)) => {
                cmp.apply(items.len() as i64, *expected)
            }

            _ => false,
        }
    }
}
