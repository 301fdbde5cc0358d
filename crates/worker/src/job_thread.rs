//! 单个任务的执行线程
//!
//! 每个存活的 job_id 对应一个 tokio 任务，按 FIFO 顺序串行执行排队的触发请求。
//! 空闲轮询超过阈值后线程从注册表中移除自己；停止是协作式的：设置停止标志并唤醒
//! 等待中的轮询，正在执行的调用不会被强制中断。

use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use scheduler_core::{HandleCallbackResult, SchedulerError, TriggerRequest};
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::callback::CallbackSender;
use crate::handler::{JobContext, JobHandler};
use crate::job_log::JobLogStore;
use crate::job_registry::JobThreadRegistry;

/// 单次轮询的等待时间
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
/// 连续空轮询超过该次数后线程退出
pub const IDLE_POLL_LIMIT: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobThreadState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl JobThreadState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobThreadState::Created,
            1 => JobThreadState::Running,
            2 => JobThreadState::Stopping,
            _ => JobThreadState::Stopped,
        }
    }
}

/// 入队被拒绝的原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushRejected {
    #[error("repeat trigger job, logId:{0}")]
    DuplicateLogId(i64),
    #[error("job trigger queue is full, capacity:{capacity}")]
    QueueFull { capacity: usize },
}

#[derive(Default)]
struct TriggerQueue {
    pending: VecDeque<TriggerRequest>,
    /// 排队中和正在执行的 log_id
    active_log_ids: HashSet<i64>,
}

/// 线程运行所需的共享资源
#[derive(Clone)]
pub(crate) struct ThreadEnv {
    pub callbacks: CallbackSender,
    pub log_store: JobLogStore,
    pub registry: JobThreadRegistry,
    pub poll_interval: Duration,
}

pub struct JobThread {
    job_id: i64,
    handler_name: String,
    handler: Arc<dyn JobHandler>,
    capacity: usize,
    queue: Mutex<TriggerQueue>,
    wake: Notify,
    stop_flag: Arc<AtomicBool>,
    stop_reason: Mutex<Option<String>>,
    executing: AtomicBool,
    state: AtomicU8,
    stopped_tx: watch::Sender<bool>,
}

impl JobThread {
    pub(crate) fn new(job_id: i64, handler_name: String, handler: Arc<dyn JobHandler>, capacity: usize) -> Self {
        let (stopped_tx, _) = watch::channel(false);
        Self {
            job_id,
            handler_name,
            handler,
            capacity,
            queue: Mutex::new(TriggerQueue::default()),
            wake: Notify::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            stop_reason: Mutex::new(None),
            executing: AtomicBool::new(false),
            state: AtomicU8::new(JobThreadState::Created as u8),
            stopped_tx,
        }
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    pub fn state(&self) -> JobThreadState {
        JobThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: JobThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn pending_len(&self) -> usize {
        self.lock_queue().pending.len()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, TriggerQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 正在执行或有排队请求
    pub fn is_running_or_has_queue(&self) -> bool {
        let queue = self.lock_queue();
        self.executing.load(Ordering::Acquire) || !queue.pending.is_empty()
    }

    pub fn is_log_active(&self, log_id: i64) -> bool {
        self.lock_queue().active_log_ids.contains(&log_id)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub(crate) fn push_trigger(&self, request: TriggerRequest) -> Result<(), PushRejected> {
        {
            let mut queue = self.lock_queue();
            if queue.active_log_ids.contains(&request.log_id) {
                return Err(PushRejected::DuplicateLogId(request.log_id));
            }
            if queue.pending.len() >= self.capacity {
                return Err(PushRejected::QueueFull {
                    capacity: self.capacity,
                });
            }
            queue.active_log_ids.insert(request.log_id);
            queue.pending.push_back(request);
        }
        self.wake.notify_one();
        Ok(())
    }

    /// 发出停止信号，不等待线程退出
    pub(crate) fn stop(&self, reason: &str) {
        {
            // 与出队互斥：停止之后不会再取出新的请求
            let _queue = self.lock_queue();
            if self.stop_flag.load(Ordering::Acquire) {
                return;
            }
            *self.stop_reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
            self.stop_flag.store(true, Ordering::Release);
        }
        if self.state() != JobThreadState::Stopped {
            self.set_state(JobThreadState::Stopping);
        }
        self.wake.notify_one();
        info!("任务线程收到停止信号: job_id={}, reason={}", self.job_id, reason);
    }

    /// 队列为空时才停止，在注册表锁内调用以保证与入队互斥
    pub(crate) fn stop_if_idle(&self, reason: &str) -> bool {
        let idle = {
            let queue = self.lock_queue();
            queue.pending.is_empty() && !self.executing.load(Ordering::Acquire)
        };
        if idle {
            self.stop(reason);
        }
        idle
    }

    /// 等待线程完全退出
    pub async fn wait_stopped(&self) {
        let mut rx = self.stopped_tx.subscribe();
        // 发送端由自身持有，wait_for 只会在值变为 true 时返回
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    fn pop(&self) -> Option<TriggerRequest> {
        let mut queue = self.lock_queue();
        if self.is_stopped() {
            return None;
        }
        let request = queue.pending.pop_front();
        if request.is_some() {
            self.executing.store(true, Ordering::Release);
        }
        request
    }

    async fn poll(&self, timeout: Duration) -> Option<TriggerRequest> {
        if let Some(request) = self.pop() {
            return Some(request);
        }
        if self.is_stopped() {
            return None;
        }
        let _ = tokio::time::timeout(timeout, self.wake.notified()).await;
        self.pop()
    }

    pub(crate) async fn run(self: Arc<Self>, env: ThreadEnv, predecessor: Option<Arc<JobThread>>) {
        if let Some(previous) = predecessor {
            debug!("等待旧任务线程退出: job_id={}", self.job_id);
            previous.wait_stopped().await;
        }

        if let Err(e) = self.handler.init().await {
            error!("任务处理器初始化失败: job_id={}, error={}", self.job_id, e);
        }
        if !self.is_stopped() {
            self.set_state(JobThreadState::Running);
        }
        info!("任务线程启动: job_id={}, handler={}", self.job_id, self.handler_name);

        let mut idle_polls = 0u32;
        while !self.is_stopped() {
            match self.poll(env.poll_interval).await {
                Some(request) => {
                    idle_polls = 0;
                    let log_id = request.log_id;
                    let result = self.execute(&env, request).await;
                    {
                        let mut queue = self.lock_queue();
                        queue.active_log_ids.remove(&log_id);
                        self.executing.store(false, Ordering::Release);
                    }
                    env.callbacks.push(result);
                }
                None => {
                    idle_polls += 1;
                    if idle_polls > IDLE_POLL_LIMIT
                        && env
                            .registry
                            .remove_if_idle(&self, "executor idle times over limit.")
                            .await
                    {
                        info!("任务线程空闲超时退出: job_id={}", self.job_id);
                    }
                }
            }
        }

        self.report_killed(&env);

        if let Err(e) = self.handler.destroy().await {
            error!("任务处理器销毁失败: job_id={}, error={}", self.job_id, e);
        }
        self.set_state(JobThreadState::Stopped);
        self.stopped_tx.send_replace(true);
        env.registry.release_retired(&self).await;
        info!("任务线程已退出: job_id={}", self.job_id);
    }

    async fn execute(&self, env: &ThreadEnv, request: TriggerRequest) -> HandleCallbackResult {
        let log_id = request.log_id;
        let log_date_time = request.log_date_time;
        let context = JobContext::new(&request, env.log_store.clone(), Arc::clone(&self.stop_flag));

        env.log_store
            .append(
                context.log_file(),
                "job",
                &format!(
                    "----------- job execute start -----------\n----------- Param:{}",
                    request.params.as_deref().unwrap_or_default()
                ),
            )
            .await;

        let invocation = AssertUnwindSafe(self.handler.execute(&context)).catch_unwind();
        let outcome = if request.timeout_seconds > 0 {
            match tokio::time::timeout(Duration::from_secs(request.timeout_seconds), invocation).await {
                Ok(outcome) => outcome,
                Err(_) => Ok(Err(SchedulerError::ExecutionTimeout)),
            }
        } else {
            invocation.await
        };

        let result = match outcome {
            Ok(Ok(message)) => HandleCallbackResult::success(log_id, log_date_time, message),
            Ok(Err(SchedulerError::ExecutionTimeout)) => HandleCallbackResult::new(
                log_id,
                log_date_time,
                HandleCallbackResult::HANDLE_CODE_TIMEOUT,
                Some("job execute timeout".to_string()),
            ),
            Ok(Err(e)) => HandleCallbackResult::fail(log_id, log_date_time, e.to_string()),
            Err(_) => {
                error!("任务处理器发生panic: job_id={}, log_id={}", self.job_id, log_id);
                HandleCallbackResult::fail(log_id, log_date_time, "job handler panicked")
            }
        };

        metrics::counter!("job_executions_total", "code" => result.handle_code.to_string()).increment(1);
        env.log_store
            .append(
                context.log_file(),
                "job",
                &format!(
                    "----------- job execute end(finish) -----------\n----------- Result: handleCode={}, handleMsg = {}",
                    result.handle_code,
                    result.handle_message.as_deref().unwrap_or_default()
                ),
            )
            .await;
        result
    }

    /// 把停止时仍在排队的请求作为失败结果回调
    fn report_killed(&self, env: &ThreadEnv) {
        let reason = self
            .stop_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default();

        let drained: Vec<TriggerRequest> = {
            let mut queue = self.lock_queue();
            let drained: Vec<TriggerRequest> = queue.pending.drain(..).collect();
            for request in &drained {
                queue.active_log_ids.remove(&request.log_id);
            }
            drained
        };

        for request in drained {
            warn!(
                "任务未执行即被终止: job_id={}, log_id={}, reason={}",
                self.job_id, request.log_id, reason
            );
            env.callbacks.push(HandleCallbackResult::fail(
                request.log_id,
                request.log_date_time,
                format!("{reason} [job not executed, in the job queue, killed.]"),
            ));
        }
    }
}
