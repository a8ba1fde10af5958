//! 统一错误处理模块
//!
//! 定义系统中所有共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 各引擎 crate 在此基础上定义自己的错误枚举，并通过 `#[from]` 透传。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum TrackerError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ==================== 持久日志错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 配置与不变量错误 ====================
    #[error("未知的{kind}取值: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("无效的参数: {field} - {message}")]
    InvalidArgument { field: String, message: String },

    // ==================== 外部服务错误 ====================
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("外部服务限流: {service}, {retry_after_secs} 秒后重试")]
    RateLimited {
        service: String,
        retry_after_secs: u64,
    },

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, TrackerError>;

impl TrackerError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::UnknownVariant { .. } => "UNKNOWN_VARIANT",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 只有上游瞬时故障可以重试；存储写入失败必须终止循环，
    /// 否则静默丢失的数据会污染计分结果。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExternalService { .. } | Self::RateLimited { .. }
        )
    }

    /// 是否为存储层错误（数据库或持久日志）
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Kafka(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = TrackerError::NotFound {
            entity: "Objective".to_string(),
            id: "123".to_string(),
        };
        assert_eq!(err.code(), "NOT_FOUND");

        let err = TrackerError::UnknownVariant {
            kind: "AggregationPolicy",
            value: "MEDIAN".to_string(),
        };
        assert_eq!(err.code(), "UNKNOWN_VARIANT");
        assert_eq!(err.to_string(), "未知的AggregationPolicy取值: MEDIAN");
    }

    #[test]
    fn test_is_retryable() {
        let limited = TrackerError::RateLimited {
            service: "stash-api".to_string(),
            retry_after_secs: 3,
        };
        assert!(limited.is_retryable());

        // 存储错误不可重试，循环必须终止
        let db_err = TrackerError::Database(sqlx::Error::PoolTimedOut);
        assert!(!db_err.is_retryable());
        assert!(db_err.is_storage());

        let kafka_err = TrackerError::Kafka("broker down".to_string());
        assert!(!kafka_err.is_retryable());
        assert!(kafka_err.is_storage());
    }
}
