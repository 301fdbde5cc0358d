//! 调度中心对执行器开放的接口：注册、注销、结果回调

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    middleware,
    routing::post,
    Json, Router,
};
use scheduler_core::transport::{method_not_supported, unknown_operation};
use scheduler_core::{
    access_token_guard, parse_body, AccessToken, HandleCallbackResult, RegistryEntry, RpcResponse,
};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::callback::CallbackHandler;
use crate::registry::RegistryStore;

/// 调度中心接口状态
#[derive(Clone)]
pub struct CoordinatorState {
    pub registry: Arc<RegistryStore>,
    pub callbacks: Arc<dyn CallbackHandler>,
}

/// 创建调度中心路由
pub fn create_routes(state: CoordinatorState, access_token: AccessToken) -> Router {
    Router::new()
        .route("/api/registry", post(registry))
        .route("/api/registryRemove", post(registry_remove))
        .route("/api/callback", post(callback))
        .fallback(unknown_operation)
        .method_not_allowed_fallback(method_not_supported)
        .with_state(state)
        .layer(middleware::from_fn_with_state(access_token, access_token_guard))
        .layer(TraceLayer::new_for_http())
}

async fn registry(State(state): State<CoordinatorState>, body: Bytes) -> Json<RpcResponse<String>> {
    let entry: RegistryEntry = match parse_body(&body) {
        Ok(entry) => entry,
        Err(resp) => return Json(resp),
    };
    match state.registry.register(&entry).await {
        Ok(()) => Json(RpcResponse::success()),
        Err(e) => Json(RpcResponse::fail(e.to_string())),
    }
}

async fn registry_remove(
    State(state): State<CoordinatorState>,
    body: Bytes,
) -> Json<RpcResponse<String>> {
    let entry: RegistryEntry = match parse_body(&body) {
        Ok(entry) => entry,
        Err(resp) => return Json(resp),
    };
    match state.registry.remove(&entry).await {
        Ok(()) => Json(RpcResponse::success()),
        Err(e) => Json(RpcResponse::fail(e.to_string())),
    }
}

async fn callback(State(state): State<CoordinatorState>, body: Bytes) -> Json<RpcResponse<String>> {
    let results: Vec<HandleCallbackResult> = match parse_body(&body) {
        Ok(results) => results,
        Err(resp) => return Json(resp),
    };
    match state.callbacks.handle(results).await {
        Ok(()) => Json(RpcResponse::success()),
        Err(e) => {
            warn!("处理执行结果回调失败: {}", e);
            Json(RpcResponse::fail(e.to_string()))
        }
    }
}
