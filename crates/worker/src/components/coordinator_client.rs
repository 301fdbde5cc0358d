use std::time::Duration;

use scheduler_core::{HandleCallbackResult, RegistryEntry, RemotingClient, RpcResponse};
use serde::Serialize;
use tracing::{debug, warn};

/// 执行器访问调度中心的客户端
///
/// 按配置顺序依次尝试每个调度中心地址，第一个成功即返回。
pub struct CoordinatorClient {
    addresses: Vec<String>,
    remoting: RemotingClient,
}

impl CoordinatorClient {
    pub fn new(addresses: Vec<String>, access_token: Option<String>, timeout: Duration) -> Self {
        Self {
            addresses,
            remoting: RemotingClient::new(access_token, timeout),
        }
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub async fn registry(&self, entry: &RegistryEntry) -> RpcResponse<String> {
        self.post_first_success("api/registry", entry).await
    }

    pub async fn registry_remove(&self, entry: &RegistryEntry) -> RpcResponse<String> {
        self.post_first_success("api/registryRemove", entry).await
    }

    pub async fn callback(&self, results: &[HandleCallbackResult]) -> RpcResponse<String> {
        self.post_first_success("api/callback", results).await
    }

    async fn post_first_success<Req>(&self, path: &str, body: &Req) -> RpcResponse<String>
    where
        Req: Serialize + ?Sized,
    {
        let mut last = RpcResponse::fail("coordinator address list is empty");
        for address in &self.addresses {
            let response: RpcResponse<String> = self.remoting.post(address, path, body).await;
            if response.is_success() {
                debug!("调用调度中心成功: address={}, path={}", address, path);
                return response;
            }
            warn!(
                "调用调度中心失败: address={}, path={}, code={}, msg={}",
                address,
                path,
                response.code,
                response.message_or_empty()
            );
            last = response;
        }
        last
    }
}
