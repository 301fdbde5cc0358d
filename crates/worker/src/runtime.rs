//! 执行器运行时：组装并启动控制端点、注册心跳、回调管道和日志清理
//!
//! 关闭顺序：控制端点 → 心跳（注销）→ 全部任务线程 → 回调管道（最后投递）→ 日志清理。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use scheduler_core::{AccessToken, ExecutorConfig, RegistryEntry};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::callback::CallbackPipeline;
use crate::components::{CoordinatorClient, HeartbeatManager};
use crate::handler::HandlerRegistry;
use crate::job_log::JobLogStore;
use crate::job_registry::JobThreadRegistry;
use crate::log_cleaner::LogCleaner;
use crate::server::{create_routes, ControlState, RequestPool};

pub const SHUTDOWN_REASON: &str = "web container destroy and kill the job.";
const JOB_THREAD_STOP_GRACE: Duration = Duration::from_secs(10);

pub struct WorkerRuntime {
    config: ExecutorConfig,
    handlers: HandlerRegistry,
}

impl WorkerRuntime {
    pub fn new(config: ExecutorConfig, handlers: HandlerRegistry) -> Self {
        Self { config, handlers }
    }

    /// 监听配置中的端口并启动
    pub async fn start(self) -> anyhow::Result<RunningWorker> {
        let bind_address = self.config.bind_address();
        let listener = TcpListener::bind(&bind_address)
            .await
            .with_context(|| format!("绑定执行器端口失败: {bind_address}"))?;
        self.start_with_listener(listener).await
    }

    pub async fn start_with_listener(self, listener: TcpListener) -> anyhow::Result<RunningWorker> {
        let config = self.config;
        config.validate().context("执行器配置无效")?;
        let local_addr = listener.local_addr().context("获取监听地址失败")?;

        let access_token = AccessToken::new(&config.access_token);
        let coordinator = Arc::new(CoordinatorClient::new(
            config.coordinator_address_list(),
            access_token.as_option(),
            config.request_timeout(),
        ));
        let log_store = JobLogStore::new(&config.log_path);

        let (callback_pipeline, callbacks) = CallbackPipeline::new(
            Arc::clone(&coordinator),
            log_store.clone(),
            Duration::from_secs(config.callback_retry_interval_seconds),
        );
        let (callback_shutdown, _) = broadcast::channel(1);
        let callback_handles = Arc::clone(&callback_pipeline).start(&callback_shutdown).await;

        let registry = JobThreadRegistry::new(self.handlers, callbacks, log_store.clone(), config.queue_capacity);

        let app = create_routes(
            ControlState {
                registry: registry.clone(),
            },
            access_token,
            RequestPool::new(config.max_handler_concurrency, config.max_pending_requests),
        );
        let (server_shutdown, mut server_shutdown_rx) = broadcast::channel::<()>(1);
        let server_handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                error!("执行器控制端点异常退出: {}", e);
            }
        });
        info!("执行器控制端点已启动: {}", local_addr);

        let entry = RegistryEntry::executor(config.app_name.clone(), config.advertised_address());
        let heartbeat = Arc::new(HeartbeatManager::new(
            coordinator,
            entry,
            Duration::from_secs(config.heartbeat_interval_seconds),
        ));
        let (heartbeat_shutdown, heartbeat_shutdown_rx) = broadcast::channel(1);
        let heartbeat_handle = heartbeat.start_heartbeat_task(heartbeat_shutdown_rx);

        let (cleaner_shutdown, cleaner_shutdown_rx) = broadcast::channel(1);
        let cleaner_handle =
            LogCleaner::new(log_store, config.log_retention_days).start(cleaner_shutdown_rx);

        Ok(RunningWorker {
            local_addr,
            registry,
            callback_pipeline,
            server_shutdown,
            server_handle,
            heartbeat_shutdown,
            heartbeat_handle,
            callback_shutdown,
            callback_handles,
            cleaner_shutdown,
            cleaner_handle,
        })
    }
}

pub struct RunningWorker {
    local_addr: SocketAddr,
    registry: JobThreadRegistry,
    callback_pipeline: Arc<CallbackPipeline>,
    server_shutdown: broadcast::Sender<()>,
    server_handle: JoinHandle<()>,
    heartbeat_shutdown: broadcast::Sender<()>,
    heartbeat_handle: JoinHandle<()>,
    callback_shutdown: broadcast::Sender<()>,
    callback_handles: Vec<JoinHandle<()>>,
    cleaner_shutdown: broadcast::Sender<()>,
    cleaner_handle: Option<JoinHandle<()>>,
}

impl RunningWorker {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &JobThreadRegistry {
        &self.registry
    }

    pub fn callback_pipeline(&self) -> &Arc<CallbackPipeline> {
        &self.callback_pipeline
    }

    pub async fn stop(self) {
        info!("开始关闭执行器");

        let _ = self.server_shutdown.send(());
        join_logged("控制端点", self.server_handle).await;

        let _ = self.heartbeat_shutdown.send(());
        join_logged("注册心跳", self.heartbeat_handle).await;

        self.registry.stop_all(SHUTDOWN_REASON, JOB_THREAD_STOP_GRACE).await;

        let _ = self.callback_shutdown.send(());
        for handle in self.callback_handles {
            join_logged("回调管道", handle).await;
        }

        let _ = self.cleaner_shutdown.send(());
        if let Some(handle) = self.cleaner_handle {
            join_logged("日志清理", handle).await;
        }

        info!("执行器已关闭");
    }
}

async fn join_logged(component: &str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        warn!("{}任务退出异常: {}", component, e);
    }
}
