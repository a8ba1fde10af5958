//! 目标（Objective）领域模型
//!
//! 目标、条件、匹配记录和计分预设在抓取、匹配、计分三个引擎之间共享，
//! 由外部 CRUD 层只读提供。所有枚举以 SCREAMING_SNAKE_CASE 文本存储，
//! 数据库与 JSON 使用同一套文本表示。

/// 定义以文本形式持久化的枚举
///
/// 同时生成 serde 重命名、`as_str`、`Display` 和 `FromStr`，
/// 保证数据库列、JSON 和日志中的取值完全一致。
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $text:literal,
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// 全部取值，按声明顺序
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::TrackerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::error::TrackerError::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub mod conditions;
pub mod models;

pub use conditions::{Condition, ConditionField, FieldType, Operator};
pub use models::{
    AggregationPolicy, MatchCandidate, NumberField, Objective, ObjectiveId, ObjectiveMatch,
    ObjectiveType, ScoringPolicy, ScoringPreset, StashObservation, SyncStatus, Team, TeamId,
    UserId, ValidityWindow,
};
