//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 导出器自带 HTTP 监听，在指定端口暴露指标供 Prometheus 抓取。

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use super::ObservabilityConfig;

/// 安装 Prometheus recorder 并启动导出端点
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

    PrometheusBuilder::new().with_http_listener(addr).install()?;

    register_common_metrics(&config.service_name);
    info!("Metrics exporter listening on {}", addr);

    Ok(())
}

fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("feed_pages_fetched_total", "Change pages fetched from the feed");
    metrics::describe_counter!("feed_fetch_errors_total", "Feed fetch errors by kind");
    metrics::describe_counter!("stash_batches_published_total", "Batches written to the durable log");
    metrics::describe_counter!("stash_batches_consumed_total", "Batches read from the durable log");
    metrics::describe_counter!("objective_matches_flushed_total", "Match records persisted");
    metrics::describe_histogram!(
        "item_evaluation_duration_seconds",
        "Time to evaluate one batch of items"
    );
    metrics::describe_histogram!("scoring_pass_duration_seconds", "Scoring pass duration");
    metrics::describe_counter!("score_changes_total", "Score changes emitted by kind");
    metrics::describe_gauge!("sync_backlog_matches", "Matches buffered while syncing");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 记录一次翻页抓取
#[inline]
pub fn record_page_fetched(event_id: i64, stashes: usize) {
    metrics::counter!("feed_pages_fetched_total", "event_id" => event_id.to_string()).increment(1);
    metrics::counter!("feed_stashes_total", "event_id" => event_id.to_string())
        .increment(stashes as u64);
}

/// 记录抓取错误，`kind` 取 rate_limited / http / transport / malformed
#[inline]
pub fn record_fetch_error(event_id: i64, kind: &str) {
    metrics::counter!(
        "feed_fetch_errors_total",
        "event_id" => event_id.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// 记录写入持久日志的批次
#[inline]
pub fn record_batch_published(event_id: i64) {
    metrics::counter!("stash_batches_published_total", "event_id" => event_id.to_string())
        .increment(1);
}

/// 记录消费到的批次及评估耗时
#[inline]
pub fn record_batch_consumed(event_id: i64, items: usize, duration_secs: f64) {
    metrics::counter!("stash_batches_consumed_total", "event_id" => event_id.to_string())
        .increment(1);
    metrics::counter!("items_evaluated_total", "event_id" => event_id.to_string())
        .increment(items as u64);
    metrics::histogram!("item_evaluation_duration_seconds").record(duration_secs);
}

/// 记录落库的匹配记录数
#[inline]
pub fn record_matches_flushed(event_id: i64, count: usize) {
    metrics::counter!("objective_matches_flushed_total", "event_id" => event_id.to_string())
        .increment(count as u64);
}

/// 更新同步期间缓冲的匹配记录数
#[inline]
pub fn set_sync_backlog(event_id: i64, size: usize) {
    metrics::gauge!("sync_backlog_matches", "event_id" => event_id.to_string()).set(size as f64);
}

/// 记录计分轮次
#[inline]
pub fn record_scoring_pass(event_id: i64, changes: usize, duration_secs: f64) {
    metrics::histogram!("scoring_pass_duration_seconds", "event_id" => event_id.to_string())
        .record(duration_secs);
    metrics::counter!("score_changes_total", "event_id" => event_id.to_string())
        .increment(changes as u64);
}
