//! 物品归一化
//!
//! 归一化步骤来自配置，按声明顺序执行。抓取循环用它丢弃不参与匹配的物品，
//! 消费循环在匹配前用它改写名称。

use std::borrow::Cow;

use league_shared::config::NormalizationRule;
use league_shared::stash::Item;

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    rules: Vec<NormalizationRule>,
}

impl Normalizer {
    pub fn new(rules: Vec<NormalizationRule>) -> Self {
        Self { rules }
    }

    /// 物品是否被某个排除步骤丢弃
    pub fn is_excluded(&self, item: &Item) -> bool {
        self.rules.iter().any(|rule| match rule {
            NormalizationRule::ExcludeFrameType { frame_types } => {
                frame_types.contains(&item.frame_type)
            }
            NormalizationRule::StripNamePrefix { .. } => false,
        })
    }

    /// 归一化物品；被排除时返回 `None`，无需改写时不复制
    pub fn normalize<'a>(&self, item: &'a Item) -> Option<Cow<'a, Item>> {
        let mut current = Cow::Borrowed(item);

        for rule in &self.rules {
            match rule {
                NormalizationRule::ExcludeFrameType { frame_types } => {
                    if frame_types.contains(&current.frame_type) {
                        return None;
                    }
                }
                NormalizationRule::StripNamePrefix { prefix } => {
                    if prefix.is_empty() {
                        continue;
                    }
                    if current.name.starts_with(prefix.as_str()) {
                        let owned = current.to_mut();
                        owned.name = owned.name[prefix.len()..].to_string();
                    }
                    if current.type_line.starts_with(prefix.as_str()) {
                        let owned = current.to_mut();
                        owned.type_line = owned.type_line[prefix.len()..].to_string();
                    }
                }
            }
        }

        Some(current)
    }
}
