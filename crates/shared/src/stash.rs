//! 公共仓库变更流的线上数据格式
//!
//! `ChangePage` 是外部分页接口的一页响应；`StashChangeBatch` 是抓取循环
//! 过滤后写入持久日志的消息体，消费循环按顺序读取并交给匹配引擎。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 物品插槽
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Socket {
    /// 连接组编号，同组插槽相互连接
    #[serde(default)]
    pub group: i64,
    #[serde(default, rename = "sColour")]
    pub colour: Option<String>,
}

/// 物品扩展信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemExtended {
    #[serde(default)]
    pub category: Option<String>,
}

/// 宝石附加信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemHybrid {
    #[serde(default)]
    pub is_vaal_gem: bool,
}

/// 仓库页中的一个物品
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub type_line: String,
    #[serde(default)]
    pub base_type: String,
    #[serde(default)]
    pub ilvl: i64,
    #[serde(default)]
    pub frame_type: i64,
    #[serde(default)]
    pub identified: bool,
    #[serde(default)]
    pub corrupted: bool,
    #[serde(default)]
    pub stack_size: Option<i64>,
    #[serde(default)]
    pub talisman_tier: Option<i64>,
    #[serde(default)]
    pub explicit_mods: Vec<String>,
    #[serde(default)]
    pub implicit_mods: Vec<String>,
    #[serde(default)]
    pub crafted_mods: Vec<String>,
    #[serde(default)]
    pub fractured_mods: Vec<String>,
    #[serde(default)]
    pub enchant_mods: Vec<String>,
    /// 影响力名称 -> 是否拥有
    #[serde(default)]
    pub influences: BTreeMap<String, bool>,
    #[serde(default)]
    pub sockets: Vec<Socket>,
    #[serde(default)]
    pub extended: Option<ItemExtended>,
    #[serde(default)]
    pub hybrid: Option<ItemHybrid>,
}

impl Item {
    /// 最大连接数：同一连接组的插槽数量的最大值
    pub fn max_links(&self) -> i64 {
        let mut groups: BTreeMap<i64, i64> = BTreeMap::new();
        for socket in &self.sockets {
            *groups.entry(socket.group).or_default() += 1;
        }
        groups.values().copied().max().unwrap_or(0)
    }

    /// 物品类别（来自扩展信息）
    pub fn item_class(&self) -> &str {
        self.extended
            .as_ref()
            .and_then(|e| e.category.as_deref())
            .unwrap_or("")
    }

    /// 拥有的影响力名称，按字典序
    pub fn influence_names(&self) -> Vec<&str> {
        self.influences
            .iter()
            .filter(|(_, present)| **present)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// 是否为瓦尔宝石
    pub fn is_vaal(&self) -> bool {
        self.hybrid.as_ref().is_some_and(|h| h.is_vaal_gem)
    }

    /// 稀有度名称，由边框类型推导
    pub fn rarity(&self) -> &'static str {
        match self.frame_type {
            0 => "Normal",
            1 => "Magic",
            2 => "Rare",
            3 => "Unique",
            4 => "Gem",
            5 => "Currency",
            6 => "DivinationCard",
            7 => "Quest",
            8 => "Prophecy",
            9 => "Foil",
            10 => "SupporterFoil",
            _ => "Unknown",
        }
    }
}

/// 公共仓库页的一次变更
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicStash {
    pub id: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub stash: Option<String>,
    #[serde(default)]
    pub stash_type: Option<String>,
    #[serde(default)]
    pub league: Option<String>,
    #[serde(default)]
    pub items: Vec<Item>,
}

/// 变更接口的一页响应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangePage {
    pub next_change_id: String,
    #[serde(default)]
    pub stashes: Vec<PublicStash>,
}

/// 写入持久日志的批次
///
/// 每个批次对应外部接口的一页，携带本页游标和下一页游标。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StashChangeBatch {
    /// 请求本页时使用的游标；从接口最新位置开始的第一页没有请求游标，
    /// 记为空字符串（起点游标），排在之后所有批次之前
    pub cursor: String,
    pub next_cursor: String,
    pub stashes: Vec<PublicStash>,
    /// 抓取时间，同时作为本批次匹配记录的时间戳
    pub timestamp: DateTime<Utc>,
}
