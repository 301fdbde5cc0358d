//! 执行器控制端点：beat / idleBeat / run / log / kill
//!
//! 所有失败（令牌错误、请求体无法解析、未知路径、繁忙拒绝）都以失败的
//! `RpcResponse` 返回。请求处理受有界并发池限制：并发与等待队列都满时直接拒绝。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use scheduler_core::transport::{method_not_supported, unknown_operation};
use scheduler_core::{
    access_token_guard, parse_body, AccessToken, IdleBeatRequest, KillRequest, LogRequest,
    LogResult, RpcResponse, TriggerRequest,
};
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::job_registry::JobThreadRegistry;

pub const KILL_REASON: &str = "scheduling center kill job.";

/// 控制端点状态
#[derive(Clone)]
pub struct ControlState {
    pub registry: JobThreadRegistry,
}

/// 有界请求池：`max_concurrency` 个并发处理，最多 `max_pending` 个请求等待
#[derive(Clone)]
pub struct RequestPool {
    permits: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
}

impl RequestPool {
    pub fn new(max_concurrency: usize, max_pending: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

struct PendingSlot(Arc<AtomicUsize>);

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn bounded_pool(State(pool): State<RequestPool>, request: Request, next: Next) -> Response {
    let permit = match Arc::clone(&pool.permits).try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            if pool.pending.fetch_add(1, Ordering::AcqRel) >= pool.max_pending {
                pool.pending.fetch_sub(1, Ordering::AcqRel);
                warn!("控制请求被拒绝，处理池已满: uri={}", request.uri());
                metrics::counter!("control_requests_rejected_total").increment(1);
                return Json(RpcResponse::<String>::fail("executor is busy, request rejected."))
                    .into_response();
            }
            let _slot = PendingSlot(Arc::clone(&pool.pending));
            match Arc::clone(&pool.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return Json(RpcResponse::<String>::fail("executor is shutting down."))
                        .into_response();
                }
            }
        }
    };

    let response = next.run(request).await;
    drop(permit);
    response
}

/// 创建控制端点路由
pub fn create_routes(state: ControlState, access_token: AccessToken, pool: RequestPool) -> Router {
    Router::new()
        .route("/beat", post(beat))
        .route("/idleBeat", post(idle_beat))
        .route("/run", post(run))
        .route("/log", post(log))
        .route("/kill", post(kill))
        .fallback(unknown_operation)
        .method_not_allowed_fallback(method_not_supported)
        .with_state(state)
        .layer(middleware::from_fn_with_state(access_token, access_token_guard))
        .layer(middleware::from_fn_with_state(pool, bounded_pool))
        .layer(TraceLayer::new_for_http())
}

async fn beat() -> Json<RpcResponse<String>> {
    Json(RpcResponse::success())
}

async fn idle_beat(State(state): State<ControlState>, body: Bytes) -> Json<RpcResponse<String>> {
    let request: IdleBeatRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(resp) => return Json(resp),
    };
    Json(state.registry.idle_beat(request.job_id).await)
}

async fn run(State(state): State<ControlState>, body: Bytes) -> Json<RpcResponse<String>> {
    let request: TriggerRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(resp) => return Json(resp),
    };
    Json(state.registry.run(request).await)
}

async fn kill(State(state): State<ControlState>, body: Bytes) -> Json<RpcResponse<String>> {
    let request: KillRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(resp) => return Json(resp),
    };
    Json(state.registry.kill(request.job_id, KILL_REASON).await)
}

async fn log(State(state): State<ControlState>, body: Bytes) -> Json<RpcResponse<LogResult>> {
    let request: LogRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(resp) => return Json(resp.without_content()),
    };

    let log_store = state.registry.log_store();
    let path = log_store.log_file(request.log_date_time, request.log_id);
    match log_store.read_chunk(&path, request.from_offset).await {
        Ok(Some(chunk)) => {
            let is_end = chunk.reached_eof && !state.registry.is_log_active(request.log_id).await;
            Json(RpcResponse::success_with(LogResult {
                from_offset: request.from_offset,
                to_offset: chunk.to_offset,
                content: chunk.content,
                is_end,
            }))
        }
        Ok(None) => Json(RpcResponse::success_with(LogResult {
            from_offset: request.from_offset,
            to_offset: request.from_offset,
            content: "readLog fail, logFile not exists".to_string(),
            is_end: true,
        })),
        Err(e) => {
            warn!("读取任务日志失败: log_id={}, error={}", request.log_id, e);
            Json(RpcResponse::fail(format!("readLog fail: {e}")))
        }
    }
}
