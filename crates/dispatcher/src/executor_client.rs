//! 调度中心访问执行器的客户端

use std::time::Duration;

use async_trait::async_trait;
use scheduler_core::{
    IdleBeatRequest, KillRequest, LogRequest, LogResult, RemotingClient, RpcResponse,
    TriggerRequest,
};

/// 执行器控制端点的调用接口
///
/// 所有方法都不返回错误，传输失败以失败响应的形式体现。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutorApi: Send + Sync {
    async fn beat(&self, address: &str) -> RpcResponse<String>;

    async fn idle_beat(&self, address: &str, request: &IdleBeatRequest) -> RpcResponse<String>;

    async fn run(&self, address: &str, request: &TriggerRequest) -> RpcResponse<String>;

    async fn kill(&self, address: &str, request: &KillRequest) -> RpcResponse<String>;

    async fn log(&self, address: &str, request: &LogRequest) -> RpcResponse<LogResult>;
}

pub struct ExecutorClient {
    remoting: RemotingClient,
}

impl ExecutorClient {
    pub fn new(access_token: Option<String>, timeout: Duration) -> Self {
        Self {
            remoting: RemotingClient::new(access_token, timeout),
        }
    }
}

#[async_trait]
impl ExecutorApi for ExecutorClient {
    async fn beat(&self, address: &str) -> RpcResponse<String> {
        self.remoting.post(address, "beat", &serde_json::json!({})).await
    }

    async fn idle_beat(&self, address: &str, request: &IdleBeatRequest) -> RpcResponse<String> {
        self.remoting.post(address, "idleBeat", request).await
    }

    async fn run(&self, address: &str, request: &TriggerRequest) -> RpcResponse<String> {
        self.remoting.post(address, "run", request).await
    }

    async fn kill(&self, address: &str, request: &KillRequest) -> RpcResponse<String> {
        self.remoting.post(address, "kill", request).await
    }

    async fn log(&self, address: &str, request: &LogRequest) -> RpcResponse<LogResult> {
        self.remoting.post(address, "log", request).await
    }
}
