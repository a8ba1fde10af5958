//! 字段取值
//!
//! 把物品（或玩家状态）投影成条件可比较的强类型值。
//! 缺失的字段返回 `None`，任何条件在缺失字段上都不成立。

use league_shared::objectives::ConditionField;
use league_shared::stash::Item;

/// 条件比较时使用的字段值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Bool(bool),
    Int(i64),
    Str(&'a str),
    List(Vec<&'a str>),
}

/// 可被条件引用的数据源
pub trait FieldSource {
    fn field(&self, field: ConditionField) -> Option<FieldValue<'_>>;
}

fn list(values: &[String]) -> FieldValue<'_> {
    FieldValue::List(values.iter().map(String::as_str).collect())
}

impl FieldSource for Item {
    fn field(&self, field: ConditionField) -> Option<FieldValue<'_>> {
        let value = match field {
            ConditionField::BaseType => FieldValue::Str(&self.base_type),
            ConditionField::Name => FieldValue::Str(&self.name),
            ConditionField::TypeLine => FieldValue::Str(&self.type_line),
            ConditionField::Rarity => FieldValue::Str(self.rarity()),
            ConditionField::ItemClass => FieldValue::Str(self.item_class()),

            ConditionField::Ilvl => FieldValue::Int(self.ilvl),
            ConditionField::FrameType => FieldValue::Int(self.frame_type),
            ConditionField::StackSize => FieldValue::Int(self.stack_size?),
            ConditionField::MaxLinks => FieldValue::Int(self.max_links()),
            ConditionField::SocketCount => FieldValue::Int(self.sockets.len() as i64),
            ConditionField::TalismanTier => FieldValue::Int(self.talisman_tier?),

            ConditionField::IsCorrupted => FieldValue::Bool(self.corrupted),
            ConditionField::IsIdentified => FieldValue::Bool(self.identified),
            ConditionField::IsVaal => FieldValue::Bool(self.is_vaal()),

            ConditionField::ExplicitMods => list(&self.explicit_mods),
            ConditionField::ImplicitMods => list(&self.implicit_mods),
            ConditionField::CraftedMods => list(&self.crafted_mods),
            ConditionField::FracturedMods => list(&self.fractured_mods),
            ConditionField::EnchantMods => list(&self.enchant_mods),
            ConditionField::Influences => FieldValue::List(self.influence_names()),

            ConditionField::PlayerLevel
            | ConditionField::Pantheon
            | ConditionField::AscendancyPoints
            | ConditionField::AtlasPoints
            | ConditionField::PlayerScore => return None,
        };
        Some(value)
    }
}
