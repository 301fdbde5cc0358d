use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use scheduler_core::{AccessToken, AppConfig};
use scheduler_dispatcher::{
    create_routes, CandidateHealth, CoordinatorState, ExecutorClient, InMemoryCallbackStore,
    RegistryStore,
};
use scheduler_worker::{HandlerRegistry, WorkerRuntime};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行执行器
    Worker,
    /// 仅运行调度中心的注册与回调接口
    Coordinator,
    /// 同进程运行两者
    All,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        info!("初始化应用程序，模式: {:?}", mode);
        Self { config, mode }
    }

    /// 运行直到收到关闭信号
    pub async fn run(self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        match self.mode {
            AppMode::Worker => run_worker(&self.config, shutdown_rx).await,
            AppMode::Coordinator => run_coordinator(&self.config, shutdown_rx).await,
            AppMode::All => {
                let worker_rx = shutdown_rx.resubscribe();
                let (coordinator, worker) = tokio::join!(
                    run_coordinator(&self.config, shutdown_rx),
                    run_worker(&self.config, worker_rx),
                );
                coordinator.context("调度中心运行失败")?;
                worker.context("执行器运行失败")
            }
        }
    }
}

/// 执行器：控制端点、注册心跳、回调管道、日志清理
async fn run_worker(config: &AppConfig, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    let handlers = HandlerRegistry::with_builtin();
    info!("已注册任务处理器: {:?}", handlers.names());

    let worker = WorkerRuntime::new(config.executor.clone(), handlers)
        .start()
        .await
        .context("启动执行器失败")?;
    info!(
        "执行器已启动: app={}, listen={}",
        config.executor.app_name,
        worker.local_addr()
    );

    let _ = shutdown_rx.recv().await;
    worker.stop().await;
    Ok(())
}

/// 调度中心：注册表、注册/回调接口、注册表失效清理、节点健康刷新
async fn run_coordinator(config: &AppConfig, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    let coordinator = &config.coordinator;
    let dead_timeout = Duration::from_secs(coordinator.registry_dead_timeout_seconds);
    let access_token = AccessToken::new(&coordinator.access_token);

    let registry = Arc::new(RegistryStore::new(dead_timeout));
    let executor_api = Arc::new(ExecutorClient::new(
        access_token.as_option(),
        coordinator.probe_timeout(),
    ));
    let refresh_interval = Duration::from_secs(coordinator.health_refresh_interval_seconds);
    let health = Arc::new(CandidateHealth::new(
        executor_api,
        coordinator.probe_timeout(),
        refresh_interval,
    ));

    let monitor_interval = (dead_timeout / 3).max(Duration::from_secs(1));
    let monitor_handle = Arc::clone(&registry).spawn_monitor(monitor_interval, shutdown_rx.resubscribe());
    let refresher_handle =
        health.spawn_refresher(Arc::clone(&registry), refresh_interval, shutdown_rx.resubscribe());

    let app = create_routes(
        CoordinatorState {
            registry,
            callbacks: Arc::new(InMemoryCallbackStore::new()),
        },
        access_token,
    );
    let listener = TcpListener::bind(&coordinator.bind_address)
        .await
        .with_context(|| format!("绑定调度中心端口失败: {}", coordinator.bind_address))?;
    info!("调度中心接口已启动: {}", coordinator.bind_address);

    let mut server_rx = shutdown_rx;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_rx.recv().await;
        })
        .await;
    if let Err(ref e) = served {
        error!("调度中心接口异常退出: {}", e);
    }

    for handle in [monitor_handle, refresher_handle] {
        if let Err(e) = handle.await {
            error!("调度中心后台任务退出异常: {}", e);
        }
    }
    info!("调度中心已关闭");
    served.context("调度中心接口运行失败")
}
