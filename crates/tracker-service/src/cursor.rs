//! 变更游标
//!
//! 外部接口返回的游标是以 `-` 连接的整数元组（每个分片一个位置），
//! 按分量逐个比较。空字符串表示起点。

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SyncError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChangeCursor(Vec<u64>);

impl ChangeCursor {
    /// 起点游标
    pub fn origin() -> Self {
        Self::default()
    }

    pub fn is_origin(&self) -> bool {
        self.0.is_empty()
    }

    pub fn components(&self) -> &[u64] {
        &self.0
    }

    /// 是否已到达（不早于）目标游标
    pub fn reached(&self, target: &ChangeCursor) -> bool {
        self >= target
    }
}

impl Ord for ChangeCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for ChangeCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for ChangeCursor {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::origin());
        }
        s.split('-')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
            .map_err(|_| SyncError::InvalidCursor(s.to_string()))
    }
}

impl fmt::Display for ChangeCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("-")?;
            }
            write!(f, "{component}")?;
        }
        Ok(())
    }
}

impl Serialize for ChangeCursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChangeCursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(s: &str) -> ChangeCursor {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let c = cursor("2949-4431-3672-1244-1002");
        assert_eq!(c.components(), &[2949, 4431, 3672, 1244, 1002]);
        assert_eq!(c.to_string(), "2949-4431-3672-1244-1002");
        assert!(cursor("").is_origin());
    }

    #[test]
    fn test_ordering_is_by_component() {
        assert!(cursor("10-2") > cursor("9-50"));
        assert!(cursor("10-2-1") > cursor("10-2"));
        assert!(cursor("10-2").reached(&cursor("10-2")));
        assert!(!cursor("10-1").reached(&cursor("10-2")));
        assert!(cursor("1").reached(&ChangeCursor::origin()));
    }

    #[test]
    fn test_invalid_cursor() {
        let err = "12-abc".parse::<ChangeCursor>().unwrap_err();
        assert_eq!(err.code(), "INVALID_CURSOR");
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&cursor("1-2")).unwrap();
        assert_eq!(json, r#""1-2""#);
        let back: ChangeCursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cursor("1-2"));
    }
}
