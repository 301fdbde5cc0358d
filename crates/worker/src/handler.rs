//! 任务处理器及其注册表

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use scheduler_core::{SchedulerResult, TriggerRequest};

use crate::job_log::JobLogStore;

/// 任务处理器
///
/// `execute` 返回 `Ok(message)` 表示成功，返回错误时错误信息作为失败原因回调给调度中心。
/// 阻塞型工作应由实现自行放入 `tokio::task::spawn_blocking`。
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, context: &JobContext) -> SchedulerResult<Option<String>>;

    /// 任务线程启动时调用
    async fn init(&self) -> SchedulerResult<()> {
        Ok(())
    }

    /// 任务线程退出时调用
    async fn destroy(&self) -> SchedulerResult<()> {
        Ok(())
    }
}

/// 单次执行的上下文
pub struct JobContext {
    pub job_id: i64,
    pub log_id: i64,
    pub log_date_time: i64,
    pub params: Option<String>,
    pub shard_index: u32,
    pub shard_total: u32,
    log_store: JobLogStore,
    log_file: PathBuf,
    stop_flag: Arc<AtomicBool>,
}

impl JobContext {
    pub fn new(request: &TriggerRequest, log_store: JobLogStore, stop_flag: Arc<AtomicBool>) -> Self {
        Self {
            job_id: request.job_id,
            log_id: request.log_id,
            log_date_time: request.log_date_time,
            params: request.params.clone(),
            shard_index: request.shard_index,
            shard_total: request.shard_total,
            log_file: log_store.log_file(request.log_date_time, request.log_id),
            log_store,
            stop_flag,
        }
    }

    /// 写入本次执行的日志文件
    pub async fn log(&self, message: impl AsRef<str>) {
        self.log_store
            .append(&self.log_file, "handler", message.as_ref())
            .await;
    }

    pub fn log_file(&self) -> &PathBuf {
        &self.log_file
    }

    /// 任务线程已收到停止信号；长时间运行的处理器应定期检查
    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }
}

/// 按名称注册的处理器集合，启动后只读
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册内置的 `shellJobHandler` 与 `httpJobHandler`
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            crate::executors::SHELL_HANDLER_NAME,
            Arc::new(crate::executors::ShellJobHandler::new()),
        );
        registry.register(
            crate::executors::HTTP_HANDLER_NAME,
            Arc::new(crate::executors::HttpJobHandler::new()),
        );
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) -> &mut Self {
        let name = name.into();
        tracing::info!("注册任务处理器: {}", name);
        self.handlers.insert(name, handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}
