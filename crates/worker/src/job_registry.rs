//! job_id → 任务线程 的注册表
//!
//! 注册表锁是传输层（`run`/`kill` 写入）与任务线程（空闲时移除自己）之间唯一的
//! 共享结构。查找/创建与入队在同一次加锁内完成，线程的自我移除也在锁内检查
//! “仍是当前线程且队列为空”，所以不会有请求进入一个已经退出的线程。
//!
//! 被终止或自我移除的线程在真正退出前留在 `retiring` 中，同一任务的新线程
//! 先等待它退出，保证同一 job_id 的处理函数不会并发执行。
//! 加锁顺序固定为 `threads` → `retiring`。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use scheduler_core::{BlockStrategy, RpcResponse, TriggerRequest};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::callback::CallbackSender;
use crate::handler::HandlerRegistry;
use crate::job_log::JobLogStore;
use crate::job_thread::{JobThread, ThreadEnv, POLL_INTERVAL};

struct RegistryInner {
    threads: Mutex<HashMap<i64, Arc<JobThread>>>,
    retiring: Mutex<HashMap<i64, Arc<JobThread>>>,
    handlers: HandlerRegistry,
    callbacks: CallbackSender,
    log_store: JobLogStore,
    queue_capacity: usize,
    poll_interval: Duration,
}

#[derive(Clone)]
pub struct JobThreadRegistry {
    inner: Arc<RegistryInner>,
}

impl JobThreadRegistry {
    pub fn new(
        handlers: HandlerRegistry,
        callbacks: CallbackSender,
        log_store: JobLogStore,
        queue_capacity: usize,
    ) -> Self {
        Self::with_poll_interval(handlers, callbacks, log_store, queue_capacity, POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        handlers: HandlerRegistry,
        callbacks: CallbackSender,
        log_store: JobLogStore,
        queue_capacity: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                threads: Mutex::new(HashMap::new()),
                retiring: Mutex::new(HashMap::new()),
                handlers,
                callbacks,
                log_store,
                queue_capacity,
                poll_interval,
            }),
        }
    }

    fn env(&self) -> ThreadEnv {
        ThreadEnv {
            callbacks: self.inner.callbacks.clone(),
            log_store: self.inner.log_store.clone(),
            registry: self.clone(),
            poll_interval: self.inner.poll_interval,
        }
    }

    pub fn log_store(&self) -> &JobLogStore {
        &self.inner.log_store
    }

    pub async fn get(&self, job_id: i64) -> Option<Arc<JobThread>> {
        self.inner.threads.lock().await.get(&job_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.threads.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.threads.lock().await.is_empty()
    }

    /// 把触发请求放入任务线程队列，必要时创建或替换线程
    pub async fn run(&self, request: TriggerRequest) -> RpcResponse<String> {
        if let Err(message) = request.validate() {
            return RpcResponse::fail(message);
        }
        let Some(handler) = self.inner.handlers.get(&request.handler_name) else {
            return RpcResponse::fail(format!("job handler [{}] not found.", request.handler_name));
        };

        let job_id = request.job_id;
        let mut threads = self.inner.threads.lock().await;
        let existing = threads.get(&job_id).cloned();

        let mut replace_reason = None;
        if let Some(ref thread) = existing {
            if thread.handler_name() != request.handler_name {
                replace_reason = Some("change job handler, terminate the old job thread.");
            } else if thread.is_running_or_has_queue() {
                match request.block_strategy {
                    BlockStrategy::DiscardLater => {
                        metrics::counter!("job_triggers_rejected_total", "reason" => "discard_later")
                            .increment(1);
                        return RpcResponse::fail("block strategy effect: Discard Later");
                    }
                    BlockStrategy::CoverEarly => {
                        replace_reason = Some("block strategy effect: Cover Early [job running, killed]");
                    }
                    BlockStrategy::SerialExecution => {}
                }
            }
        }

        let thread = match (existing, replace_reason) {
            (Some(thread), None) => thread,
            (previous, reason) => {
                let predecessor = match (previous, reason) {
                    (Some(old), Some(reason)) => {
                        old.stop(reason);
                        Some(old)
                    }
                    _ => self.inner.retiring.lock().await.get(&job_id).cloned(),
                };
                let thread = Arc::new(JobThread::new(
                    job_id,
                    request.handler_name.clone(),
                    handler,
                    self.inner.queue_capacity,
                ));
                threads.insert(job_id, Arc::clone(&thread));
                tokio::spawn(Arc::clone(&thread).run(self.env(), predecessor));
                debug!("创建任务线程: job_id={}, handler={}", job_id, request.handler_name);
                thread
            }
        };

        match thread.push_trigger(request) {
            Ok(()) => RpcResponse::success(),
            Err(rejected) => {
                warn!("触发请求被拒绝: job_id={}, reason={}", job_id, rejected);
                metrics::counter!("job_triggers_rejected_total", "reason" => "queue").increment(1);
                RpcResponse::fail(rejected.to_string())
            }
        }
    }

    /// 终止任务线程；线程不存在时同样返回成功
    pub async fn kill(&self, job_id: i64, reason: &str) -> RpcResponse<String> {
        let mut threads = self.inner.threads.lock().await;
        match threads.remove(&job_id) {
            Some(thread) => {
                thread.stop(reason);
                self.inner.retiring.lock().await.insert(job_id, thread);
                RpcResponse::success()
            }
            None => RpcResponse {
                code: RpcResponse::<String>::SUCCESS_CODE,
                message: Some("job thread already killed.".to_string()),
                content: None,
            },
        }
    }

    /// 线程不存在，或线程空闲且无排队请求时为成功
    pub async fn idle_beat(&self, job_id: i64) -> RpcResponse<String> {
        match self.get(job_id).await {
            Some(thread) if thread.is_running_or_has_queue() => {
                RpcResponse::fail("job thread is running or has trigger queue.")
            }
            _ => RpcResponse::success(),
        }
    }

    /// 该 log_id 仍在排队或正在执行
    pub async fn is_log_active(&self, log_id: i64) -> bool {
        let threads = self.inner.threads.lock().await;
        if threads.values().any(|thread| thread.is_log_active(log_id)) {
            return true;
        }
        self.inner
            .retiring
            .lock()
            .await
            .values()
            .any(|thread| thread.is_log_active(log_id))
    }

    /// 线程退出后把它从 `retiring` 中移除（已被更新的线程覆盖时不处理）
    pub(crate) async fn release_retired(&self, thread: &Arc<JobThread>) {
        let mut retiring = self.inner.retiring.lock().await;
        let is_current = retiring
            .get(&thread.job_id())
            .is_some_and(|current| Arc::ptr_eq(current, thread));
        if is_current {
            retiring.remove(&thread.job_id());
        }
    }

    /// 仅当 `thread` 仍是当前线程且空闲时移除并停止它
    pub(crate) async fn remove_if_idle(&self, thread: &Arc<JobThread>, reason: &str) -> bool {
        let mut threads = self.inner.threads.lock().await;
        let is_current = threads
            .get(&thread.job_id())
            .is_some_and(|current| Arc::ptr_eq(current, thread));
        if !is_current {
            return false;
        }
        if thread.stop_if_idle(reason) {
            threads.remove(&thread.job_id());
            self.inner
                .retiring
                .lock()
                .await
                .insert(thread.job_id(), Arc::clone(thread));
            return true;
        }
        false
    }

    /// 停止全部任务线程并等待其退出，超过 `grace` 不再等待
    pub async fn stop_all(&self, reason: &str, grace: Duration) {
        let mut threads: Vec<Arc<JobThread>> = self
            .inner
            .threads
            .lock()
            .await
            .drain()
            .map(|(_, thread)| thread)
            .collect();
        let retiring: Vec<Arc<JobThread>> = self
            .inner
            .retiring
            .lock()
            .await
            .drain()
            .map(|(_, thread)| thread)
            .collect();
        if threads.is_empty() && retiring.is_empty() {
            return;
        }

        info!("停止全部任务线程: count={}, reason={}", threads.len(), reason);
        for thread in &threads {
            thread.stop(reason);
        }
        threads.extend(retiring);
        let waits = threads.iter().map(|thread| thread.wait_stopped());
        if tokio::time::timeout(grace, join_all(waits)).await.is_err() {
            warn!("部分任务线程在 {:?} 内未退出", grace);
        }
    }
}
