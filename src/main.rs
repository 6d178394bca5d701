use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use delegate_core::{init_logging, AppConfig};
use tokio::signal;
use tracing::{error, info, warn};

use delegate_scheduler::{Application, ShutdownManager};

const SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("delegate-scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Delegate 任务分配与周期任务调度服务")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时查找默认位置"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").cloned();

    // 加载配置
    let config = AppConfig::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载默认配置失败".to_string(),
    })?;

    // 初始化日志系统，命令行参数优先
    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_format = matches
        .get_one::<String>("log-format")
        .cloned()
        .unwrap_or_else(|| config.observability.log_format.clone());
    init_logging(&log_level, &log_format)?;

    info!("启动Delegate调度服务");
    if let Some(path) = &config_path {
        info!("配置文件: {path}");
    }
    info!("租约存储: {}", config.database.url);

    let app = Arc::new(Application::new(config).await?);

    // 创建优雅关闭管理器
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe();
        let app = Arc::clone(&app);

        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e}");
            }
        })
    };
    shutdown_manager.track("application", app_handle).await;

    // 等待关闭信号
    if let Err(e) = wait_for_shutdown_signal().await {
        error!("监听关闭信号失败: {e}");
    }

    info!("收到关闭信号，开始优雅关闭...");
    let report = shutdown_manager
        .shutdown(Duration::from_secs(SHUTDOWN_TIMEOUT_SECONDS))
        .await;
    if report.is_clean() {
        info!("应用已优雅关闭");
    } else {
        warn!("应用关闭超时，强制退出: {:?}", report.aborted);
    }

    info!("Delegate调度服务已退出");
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("安装Ctrl+C信号处理器失败")?;
                info!("收到Ctrl+C信号");
            },
            _ = terminate.recv() => {
                info!("收到SIGTERM信号");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("安装Ctrl+C信号处理器失败")?;
        info!("收到Ctrl+C信号");
    }

    Ok(())
}
