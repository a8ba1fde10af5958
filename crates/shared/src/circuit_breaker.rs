//! 熔断器 (Circuit Breaker) 模块
//!
//! 连续失败计数器：失败次数达到阈值时跳闸（Open），任意一次成功清零。
//! 抓取循环在跳闸后终止，由作业调度方决定是否重启，不做自动半开探测。

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{info, warn};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// 正常放行
    Closed,
    /// 已跳闸
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// 熔断器配置
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后跳闸（默认 5）
    pub failure_threshold: u32,
    /// 熔断器名称，用于日志和指标区分不同的调用方
    pub name: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            name: "default".to_string(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }
}

/// 熔断器
///
/// 线程安全，可通过 Clone 在多个任务间共享同一计数。
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    consecutive_failures: Arc<AtomicU32>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        info!(
            name = %config.name,
            failure_threshold = config.failure_threshold,
            "熔断器已创建"
        );

        Self {
            config,
            consecutive_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// 当前状态
    pub fn state(&self) -> CircuitState {
        if self.consecutive_failures.load(Ordering::Acquire) >= self.config.failure_threshold {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// 当前连续失败次数
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// 记录调用成功，清零连续失败计数
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// 记录调用失败，返回记录后的状态
    pub fn record_failure(&self) -> CircuitState {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        if failures == self.config.failure_threshold {
            record_circuit_breaker_trip(&self.config.name);
            warn!(
                name = %self.config.name,
                failures,
                "熔断器跳闸：连续失败达到阈值"
            );
        }

        self.state()
    }
}

fn record_circuit_breaker_trip(name: &str) {
    metrics::counter!(
        "circuit_breaker_trips_total",
        "name" => name.to_string()
    )
    .increment(1);
}
