//! 条件定义
//!
//! 条件是 (字段, 操作符, 值) 三元组。字段是封闭的强类型枚举，
//! 每个字段的类型决定允许使用的操作符集合；校验在编译阶段完成，而不是匹配时。

use serde::{Deserialize, Serialize};

text_enum! {
    /// 条件可引用的字段
    pub enum ConditionField {
        // 物品字符串字段
        BaseType => "BASE_TYPE",
        Name => "NAME",
        TypeLine => "TYPE_LINE",
        Rarity => "RARITY",
        ItemClass => "ITEM_CLASS",

        // 物品数值字段
        Ilvl => "ILVL",
        FrameType => "FRAME_TYPE",
        StackSize => "STACK_SIZE",
        MaxLinks => "MAX_LINKS",
        SocketCount => "SOCKET_COUNT",
        TalismanTier => "TALISMAN_TIER",

        // 物品布尔字段
        IsCorrupted => "IS_CORRUPTED",
        IsIdentified => "IS_IDENTIFIED",
        IsVaal => "IS_VAAL",

        // 物品字符串数组字段
        ExplicitMods => "EXPLICIT_MODS",
        ImplicitMods => "IMPLICIT_MODS",
        CraftedMods => "CRAFTED_MODS",
        FracturedMods => "FRACTURED_MODS",
        EnchantMods => "ENCHANT_MODS",
        Influences => "INFLUENCES",

        // 玩家字段，仅用于 PLAYER 类型目标
        PlayerLevel => "PLAYER_LEVEL",
        Pantheon => "PANTHEON",
        AscendancyPoints => "ASCENDANCY_POINTS",
        AtlasPoints => "ATLAS_POINTS",
        PlayerScore => "PLAYER_SCORE",
    }
}

/// 字段的值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Boolean,
    Numeric,
    String,
    StringArray,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boolean => write!(f, "boolean"),
            Self::Numeric => write!(f, "numeric"),
            Self::String => write!(f, "string"),
            Self::StringArray => write!(f, "string[]"),
        }
    }
}

impl ConditionField {
    /// 字段的值类型
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::BaseType | Self::Name | Self::TypeLine | Self::Rarity | Self::ItemClass => {
                FieldType::String
            }
            Self::Ilvl
            | Self::FrameType
            | Self::StackSize
            | Self::MaxLinks
            | Self::SocketCount
            | Self::TalismanTier
            | Self::PlayerLevel
            | Self::AscendancyPoints
            | Self::AtlasPoints
            | Self::PlayerScore => FieldType::Numeric,
            Self::IsCorrupted | Self::IsIdentified | Self::IsVaal | Self::Pantheon => {
                FieldType::Boolean
            }
            Self::ExplicitMods
            | Self::ImplicitMods
            | Self::CraftedMods
            | Self::FracturedMods
            | Self::EnchantMods
            | Self::Influences => FieldType::StringArray,
        }
    }

    /// 是否为玩家字段
    pub fn is_player_field(&self) -> bool {
        matches!(
            self,
            Self::PlayerLevel
                | Self::Pantheon
                | Self::AscendancyPoints
                | Self::AtlasPoints
                | Self::PlayerScore
        )
    }
}

text_enum! {
    /// 条件操作符
    pub enum Operator {
        Eq => "EQ",
        Neq => "NEQ",
        Gt => "GT",
        Lt => "LT",
        In => "IN",
        NotIn => "NOT_IN",
        Matches => "MATCHES",
        Contains => "CONTAINS",
        NotContains => "NOT_CONTAINS",
        ContainsAll => "CONTAINS_ALL",
        ContainsMatch => "CONTAINS_MATCH",
        DoesNotMatch => "DOES_NOT_MATCH",
        LengthEq => "LENGTH_EQ",
        LengthGt => "LENGTH_GT",
        LengthLt => "LENGTH_LT",
    }
}

impl Operator {
    /// 该字段类型允许的操作符
    pub fn allowed_for(field_type: FieldType) -> &'static [Operator] {
        match field_type {
            FieldType::Boolean => &[Operator::Eq, Operator::Neq],
            FieldType::Numeric => &[
                Operator::Eq,
                Operator::Neq,
                Operator::Gt,
                Operator::Lt,
                Operator::In,
                Operator::NotIn,
            ],
            FieldType::String => &[
                Operator::Eq,
                Operator::Neq,
                Operator::In,
                Operator::NotIn,
                Operator::Matches,
                Operator::Contains,
                Operator::LengthEq,
                Operator::LengthGt,
                Operator::LengthLt,
            ],
            FieldType::StringArray => &[
                Operator::Contains,
                Operator::NotContains,
                Operator::ContainsAll,
                Operator::ContainsMatch,
                Operator::DoesNotMatch,
                Operator::LengthEq,
                Operator::LengthGt,
                Operator::LengthLt,
            ],
        }
    }

    /// 操作符值是否为逗号分隔的列表
    pub fn takes_list(&self) -> bool {
        matches!(self, Self::In | Self::NotIn | Self::ContainsAll)
    }
}

/// 条件定义
///
/// 值以文本形式存储，列表类操作符使用逗号分隔。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub field: ConditionField,
    pub operator: Operator,
    pub value: String,
}

impl Condition {
    pub fn new(field: ConditionField, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
        }
    }

    /// 拆分列表值，忽略空白项
    pub fn list_values(&self) -> Vec<&str> {
        self.value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect()
    }
}
