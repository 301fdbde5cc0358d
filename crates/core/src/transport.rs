//! 控制通道的服务端公共部分：访问令牌校验、请求体解析、兜底路由
//!
//! 所有失败都以 HTTP 200 + 失败的 [`RpcResponse`] 返回，不会直接断开连接。

use axum::{
    extract::{Request, State},
    http::Uri,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::models::RpcResponse;
use crate::remoting::ACCESS_TOKEN_HEADER;

/// 配置的共享密钥；为空时不校验
#[derive(Debug, Clone, Default)]
pub struct AccessToken(Option<String>);

impl AccessToken {
    pub fn new(token: &str) -> Self {
        if token.trim().is_empty() {
            Self(None)
        } else {
            Self(Some(token.to_string()))
        }
    }

    pub fn as_option(&self) -> Option<String> {
        self.0.clone()
    }

    /// 逐字节比较请求携带的令牌
    pub fn matches(&self, provided: Option<&[u8]>) -> bool {
        match self.0 {
            None => true,
            Some(ref expected) => provided == Some(expected.as_bytes()),
        }
    }
}

pub async fn access_token_guard(
    State(token): State<AccessToken>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(ACCESS_TOKEN_HEADER)
        .map(|value| value.as_bytes());

    if !token.matches(provided) {
        warn!("访问令牌校验失败: uri={}", request.uri());
        return Json(RpcResponse::<String>::fail("The access token is wrong.")).into_response();
    }

    next.run(request).await
}

pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, RpcResponse<String>> {
    serde_json::from_slice(body)
        .map_err(|e| RpcResponse::fail(format!("invalid request, body parse error: {e}")))
}

pub async fn unknown_operation(uri: Uri) -> Json<RpcResponse<String>> {
    Json(RpcResponse::fail(format!(
        "invalid request, uri-mapping({}) not found.",
        uri.path()
    )))
}

pub async fn method_not_supported() -> Json<RpcResponse<String>> {
    Json(RpcResponse::fail("invalid request, HttpMethod not support."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::Request as HttpRequest,
        middleware,
        routing::post,
        Router,
    };
    use tower::ServiceExt;

    fn app(token: &str) -> Router {
        Router::new()
            .route(
                "/beat",
                post(|| async { Json(RpcResponse::<String>::success()) }),
            )
            .fallback(unknown_operation)
            .method_not_allowed_fallback(method_not_supported)
            .layer(middleware::from_fn_with_state(
                AccessToken::new(token),
                access_token_guard,
            ))
    }

    async fn call(app: Router, request: HttpRequest<Body>) -> RpcResponse<String> {
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), 200);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_access_token_matching() {
        assert!(AccessToken::new("").matches(None));
        assert!(AccessToken::new("abc").matches(Some(b"abc")));
        assert!(!AccessToken::new("abc").matches(Some(b"abd")));
        assert!(!AccessToken::new("abc").matches(None));
    }

    #[tokio::test]
    async fn test_wrong_token_is_explicit_failure() {
        let request = HttpRequest::post("/beat")
            .header(ACCESS_TOKEN_HEADER, "wrong")
            .body(Body::empty())
            .unwrap();
        let resp = call(app("secret"), request).await;
        assert_eq!(resp.code, 500);
        assert_eq!(resp.message_or_empty(), "The access token is wrong.");
    }

    #[tokio::test]
    async fn test_correct_token_passes() {
        let request = HttpRequest::post("/beat")
            .header(ACCESS_TOKEN_HEADER, "secret")
            .body(Body::empty())
            .unwrap();
        let resp = call(app("secret"), request).await;
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let request = HttpRequest::post("/nope").body(Body::empty()).unwrap();
        let resp = call(app(""), request).await;
        assert!(resp.message_or_empty().contains("uri-mapping(/nope) not found"));

        let request = HttpRequest::get("/beat").body(Body::empty()).unwrap();
        let resp = call(app(""), request).await;
        assert!(resp.message_or_empty().contains("HttpMethod not support"));
    }

    #[test]
    fn test_parse_body_failure_message() {
        let err = parse_body::<crate::models::IdleBeatRequest>(b"{oops").unwrap_err();
        assert!(err.message_or_empty().starts_with("invalid request"));
    }
}
