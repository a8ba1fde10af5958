//! 联赛目标追踪服务
//!
//! 启动配置中声明的任务，收到关闭信号后停止全部任务。

use anyhow::Result;
use league_shared::{config::AppConfig, database::Database, observability};
use tokio::signal;
use tracing::{info, warn};
use tracker_service::TrackerService;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置
    let config = AppConfig::load("league-tracker").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });

    // 2. 日志与指标
    let _guard = observability::init(&config.observability)?;
    info!(environment = %config.environment, jobs = config.jobs.len(), "Starting league-tracker...");

    // 3. 数据库与迁移
    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;
    info!("Database connection established");

    // 4. 装配服务并启动任务
    let service = TrackerService::new(config, &db)?;
    if let Err(e) = service.start_configured_jobs().await {
        warn!(code = e.code(), error = %e, "部分配置任务启动失败");
    }

    shutdown_signal().await;

    service.shutdown().await;
    db.close().await;
    info!("league-tracker stopped");
    Ok(())
}

/// 监听 Ctrl+C 和 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
