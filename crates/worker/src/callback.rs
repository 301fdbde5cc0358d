//! 执行结果回调
//!
//! 任务线程把结果放入共享队列；消费者每次醒来取走队列中的全部结果，作为一批
//! 投递给第一个可用的调度中心。全部失败时整批写入落盘目录（一批一个文件），
//! 重试任务周期性读取、删除并重新投递，再次失败则重新落盘。
//! 语义是至少一次：调度中心的回调处理需要幂等。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scheduler_core::{HandleCallbackResult, SchedulerResult};
use tokio::fs;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::components::CoordinatorClient;
use crate::job_log::JobLogStore;

/// 结果队列的发送端，任务线程持有
#[derive(Clone)]
pub struct CallbackSender {
    tx: mpsc::UnboundedSender<HandleCallbackResult>,
}

impl CallbackSender {
    /// 创建结果队列；接收端交给 [`CallbackPipeline`] 或测试直接读取
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HandleCallbackResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn push(&self, result: HandleCallbackResult) {
        let log_id = result.log_id;
        if self.tx.send(result).is_err() {
            error!("回调队列已关闭，结果丢失: log_id={}", log_id);
        }
    }
}

pub struct CallbackPipeline {
    coordinator: Arc<CoordinatorClient>,
    log_store: JobLogStore,
    spool_dir: PathBuf,
    retry_interval: Duration,
    rx: Mutex<Option<mpsc::UnboundedReceiver<HandleCallbackResult>>>,
}

impl CallbackPipeline {
    pub fn new(
        coordinator: Arc<CoordinatorClient>,
        log_store: JobLogStore,
        retry_interval: Duration,
    ) -> (Arc<Self>, CallbackSender) {
        let (sender, rx) = CallbackSender::channel();
        let pipeline = Arc::new(Self {
            coordinator,
            spool_dir: log_store.callback_spool_dir(),
            log_store,
            retry_interval,
            rx: Mutex::new(Some(rx)),
        });
        (pipeline, sender)
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }

    /// 启动消费者与重试任务；收到关闭信号后消费者做最后一次投递再退出
    pub async fn start(self: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(2);

        if let Some(rx) = self.rx.lock().await.take() {
            let pipeline = Arc::clone(&self);
            let shutdown_rx = shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                pipeline.consume(rx, shutdown_rx).await;
            }));
        } else {
            warn!("回调消费者已经启动");
        }

        let pipeline = self;
        let mut shutdown_rx = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            info!("启动回调重试任务，间隔: {:?}", pipeline.retry_interval);
            let mut ticker = tokio::time::interval(pipeline.retry_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => pipeline.retry_spooled().await,
                    _ = shutdown_rx.recv() => {
                        info!("回调重试任务收到关闭信号");
                        break;
                    }
                }
            }
        }));

        handles
    }

    async fn consume(
        &self,
        mut rx: mpsc::UnboundedReceiver<HandleCallbackResult>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!("启动回调消费任务");
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(first) => {
                        let mut batch = vec![first];
                        while let Ok(result) = rx.try_recv() {
                            batch.push(result);
                        }
                        self.deliver_or_spool(batch).await;
                    }
                    None => break,
                },
                _ = shutdown_rx.recv() => break,
            }
        }

        let mut remaining = Vec::new();
        while let Ok(result) = rx.try_recv() {
            remaining.push(result);
        }
        if !remaining.is_empty() {
            info!("关闭前投递剩余回调结果: {} 条", remaining.len());
            self.deliver_or_spool(remaining).await;
        }
        info!("回调消费任务已退出");
    }

    /// 投递一批结果，失败时落盘
    pub async fn deliver_or_spool(&self, batch: Vec<HandleCallbackResult>) {
        if batch.is_empty() {
            return;
        }

        let response = self.coordinator.callback(&batch).await;
        let outcome = if response.is_success() {
            metrics::counter!("callback_batches_total", "outcome" => "delivered").increment(1);
            format!("----------- job callback finish, code:{}", response.code)
        } else {
            metrics::counter!("callback_batches_total", "outcome" => "spooled").increment(1);
            format!(
                "----------- job callback fail, code:{} msg:{}",
                response.code,
                response.message_or_empty()
            )
        };

        for result in &batch {
            let path = self.log_store.log_file(result.log_date_time, result.log_id);
            self.log_store.append(&path, "callback", &outcome).await;
        }

        if !response.is_success() {
            if let Err(e) = self.spool(&batch).await {
                error!("回调结果落盘失败，{} 条结果丢失: {}", batch.len(), e);
            }
        }
    }

    async fn spool(&self, batch: &[HandleCallbackResult]) -> SchedulerResult<PathBuf> {
        fs::create_dir_all(&self.spool_dir).await?;
        let bytes = serde_json::to_vec(batch)?;

        let millis = Utc::now().timestamp_millis();
        let mut path = self.spool_dir.join(format!("callback-{millis}.log"));
        let mut suffix = 1;
        while fs::try_exists(&path).await? {
            path = self.spool_dir.join(format!("callback-{millis}-{suffix}.log"));
            suffix += 1;
        }

        fs::write(&path, bytes).await?;
        warn!("回调失败，结果已落盘: file={}, count={}", path.display(), batch.len());
        Ok(path)
    }

    /// 重试全部落盘文件：读取后立即删除，再投递一次
    pub async fn retry_spooled(&self) {
        let mut files = match self.spooled_files().await {
            Ok(files) => files,
            Err(e) => {
                warn!("读取回调落盘目录失败: {}", e);
                return;
            }
        };
        files.sort();

        for path in files {
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("读取回调落盘文件失败: file={}, error={}", path.display(), e);
                    continue;
                }
            };
            if let Err(e) = fs::remove_file(&path).await {
                warn!("删除回调落盘文件失败: file={}, error={}", path.display(), e);
                continue;
            }

            match serde_json::from_slice::<Vec<HandleCallbackResult>>(&bytes) {
                Ok(batch) => {
                    debug!("重试落盘回调: file={}, count={}", path.display(), batch.len());
                    self.deliver_or_spool(batch).await;
                }
                Err(e) => error!("回调落盘文件内容无效，已丢弃: file={}, error={}", path.display(), e),
            }
        }
    }

    async fn spooled_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(&self.spool_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}
