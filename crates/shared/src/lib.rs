//! 共享库
//!
//! 包含抓取、匹配、计分各 crate 共用的领域模型、配置、错误处理、
//! 数据库连接、Kafka 和可观测性等基础设施代码。

pub mod circuit_breaker;
pub mod config;
pub mod database;
pub mod error;
pub mod kafka;
pub mod objectives;
pub mod observability;
pub mod stash;
pub mod test_utils;
