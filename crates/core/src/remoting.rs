use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::models::RpcResponse;

/// 共享密钥请求头，调度中心与执行器双向调用都携带
pub const ACCESS_TOKEN_HEADER: &str = "X-Scheduler-Access-Token";

/// 基于 HTTP/JSON 的远程调用客户端
///
/// 所有失败（连接失败、非200状态码、响应无法解析）都转换为失败的 [`RpcResponse`]，
/// 调用方无需区分传输错误与业务错误。
#[derive(Debug, Clone)]
pub struct RemotingClient {
    http_client: reqwest::Client,
    access_token: Option<String>,
}

impl RemotingClient {
    pub fn new(access_token: Option<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("创建带超时的HTTP客户端失败，使用默认客户端: {}", e);
                reqwest::Client::new()
            });

        Self {
            http_client,
            access_token: access_token.filter(|token| !token.trim().is_empty()),
        }
    }

    /// 拼接基础地址与操作路径，如 `http://host:9999/` + `run`
    pub fn join_url(base: &str, path: &str) -> String {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub async fn post<Req, Resp>(&self, base: &str, path: &str, body: &Req) -> RpcResponse<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = Self::join_url(base, path);
        let mut request = self.http_client.post(&url).json(body);
        if let Some(ref token) = self.access_token {
            request = request.header(ACCESS_TOKEN_HEADER, token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("远程调用失败: url={}, error={}", url, e);
                return RpcResponse::fail(format!("remoting error({e}), for url : {url}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return RpcResponse::fail(format!(
                "remoting fail, StatusCode({}) invalid. for url : {url}",
                status.as_u16()
            ));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return RpcResponse::fail(format!("remoting error({e}), for url : {url}"));
            }
        };

        match serde_json::from_str::<RpcResponse<Resp>>(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("远程调用响应无法解析: url={}, body={}, error={}", url, body, e);
                RpcResponse::fail(format!(
                    "remoting (url={url}) response content invalid({body})."
                ))
            }
        }
    }
}
