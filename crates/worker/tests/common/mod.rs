#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use scheduler_core::{HandleCallbackResult, RegistryEntry, RpcResponse, SchedulerError, SchedulerResult};
use scheduler_worker::{JobContext, JobHandler};
use tokio::sync::Mutex;

/// 进程内的调度中心替身，可切换可用状态
#[derive(Clone, Default)]
pub struct FakeCoordinator {
    pub available: Arc<AtomicBool>,
    pub registered: Arc<Mutex<Vec<RegistryEntry>>>,
    pub removed: Arc<Mutex<Vec<RegistryEntry>>>,
    pub callbacks: Arc<Mutex<Vec<Vec<HandleCallbackResult>>>>,
}

impl FakeCoordinator {
    pub async fn start() -> (Self, String) {
        let fake = FakeCoordinator::default();
        fake.available.store(true, Ordering::SeqCst);

        let app = Router::new()
            .route("/api/registry", post(registry))
            .route("/api/registryRemove", post(registry_remove))
            .route("/api/callback", post(callback))
            .with_state(fake.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (fake, format!("http://{addr}/"))
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn delivered(&self) -> Vec<HandleCallbackResult> {
        self.callbacks.lock().await.iter().flatten().cloned().collect()
    }

    /// 等待收到指定数量的回调结果
    pub async fn wait_for_results(&self, count: usize) -> Vec<HandleCallbackResult> {
        let fake = self.clone();
        wait_until(Duration::from_secs(10), || {
            let fake = fake.clone();
            async move { fake.delivered().await.len() >= count }
        })
        .await;
        self.delivered().await
    }
}

fn unavailable() -> Json<RpcResponse<String>> {
    Json(RpcResponse::fail("coordinator unavailable"))
}

async fn registry(State(fake): State<FakeCoordinator>, body: Bytes) -> Json<RpcResponse<String>> {
    if !fake.available.load(Ordering::SeqCst) {
        return unavailable();
    }
    let entry: RegistryEntry = serde_json::from_slice(&body).unwrap();
    fake.registered.lock().await.push(entry);
    Json(RpcResponse::success())
}

async fn registry_remove(State(fake): State<FakeCoordinator>, body: Bytes) -> Json<RpcResponse<String>> {
    if !fake.available.load(Ordering::SeqCst) {
        return unavailable();
    }
    let entry: RegistryEntry = serde_json::from_slice(&body).unwrap();
    fake.removed.lock().await.push(entry);
    Json(RpcResponse::success())
}

async fn callback(State(fake): State<FakeCoordinator>, body: Bytes) -> Json<RpcResponse<String>> {
    if !fake.available.load(Ordering::SeqCst) {
        return unavailable();
    }
    let batch: Vec<HandleCallbackResult> = serde_json::from_slice(&body).unwrap();
    fake.callbacks.lock().await.push(batch);
    Json(RpcResponse::success())
}

pub async fn wait_until<F, Fut>(limit: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !condition().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within {limit:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// 记录并发度的处理器：执行时长由参数（毫秒）决定，参数为 "fail" 时返回错误，"panic" 时 panic
#[derive(Default)]
pub struct GaugeHandler {
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    pub executed: Arc<Mutex<Vec<i64>>>,
}

impl GaugeHandler {
    pub fn sharing(other: &GaugeHandler) -> Self {
        Self {
            in_flight: Arc::clone(&other.in_flight),
            max_in_flight: Arc::clone(&other.max_in_flight),
            executed: Arc::clone(&other.executed),
        }
    }
}

#[async_trait]
impl JobHandler for GaugeHandler {
    async fn execute(&self, context: &JobContext) -> SchedulerResult<Option<String>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.executed.lock().await.push(context.log_id);

        let params = context.params.clone().unwrap_or_default();
        let result = match params.as_str() {
            "fail" => Err(SchedulerError::TaskExecution("business failure".to_string())),
            "panic" => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                panic!("handler blew up");
            }
            millis => {
                let millis = millis.parse::<u64>().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(Some(format!("slept {millis}ms")))
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
