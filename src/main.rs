use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use scheduler_core::{init_logging, AppConfig};
use tokio::signal;
use tracing::{error, info, warn};

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::ShutdownManager;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("job-scheduler")
        .version("1.0.0")
        .about("分布式任务调度系统 - 调度分发与执行核心")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时依次查找 config/scheduler.toml、scheduler.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["worker", "coordinator", "all"])
                .default_value("worker"),
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

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mode_str = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("worker");

    let mut config = AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载默认配置失败".to_string(),
    })?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    init_logging(&config.observability.log_level, &config.observability.log_format)?;

    info!("启动分布式任务调度系统");
    info!("运行模式: {mode_str}");

    let app_mode = parse_app_mode(mode_str, &config)?;
    let app = Application::new(config, app_mode);

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app.run(shutdown_rx).await {
            error!("应用运行失败: {e:#}");
        }
    });

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("分布式任务调度系统已退出");
    Ok(())
}

/// 解析应用运行模式
fn parse_app_mode(mode_str: &str, config: &AppConfig) -> Result<AppMode> {
    match mode_str {
        "worker" => {
            if !config.executor.enabled {
                return Err(anyhow::anyhow!("执行器被禁用，请检查配置"));
            }
            Ok(AppMode::Worker)
        }
        "coordinator" => {
            if !config.coordinator.enabled {
                return Err(anyhow::anyhow!("调度中心被禁用，请检查配置"));
            }
            Ok(AppMode::Coordinator)
        }
        "all" => Ok(AppMode::All),
        _ => Err(anyhow::anyhow!("不支持的运行模式: {mode_str}")),
    }
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_app_mode() {
        let mut config = AppConfig::default();
        assert!(matches!(parse_app_mode("worker", &config), Ok(AppMode::Worker)));
        assert!(matches!(parse_app_mode("coordinator", &config), Ok(AppMode::Coordinator)));
        assert!(matches!(parse_app_mode("all", &config), Ok(AppMode::All)));
        assert!(parse_app_mode("api", &config).is_err());

        config.executor.enabled = false;
        assert!(parse_app_mode("worker", &config).is_err());
    }
}
