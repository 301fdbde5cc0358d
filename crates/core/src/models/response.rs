use serde::{Deserialize, Serialize};

/// 调度中心与执行器之间所有调用共用的响应结构
///
/// 传输层永远返回HTTP 200，成功与否由 `code` 决定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse<T> {
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub content: Option<T>,
}

impl<T> RpcResponse<T> {
    pub const SUCCESS_CODE: i32 = 200;
    pub const FAIL_CODE: i32 = 500;

    pub fn success() -> Self {
        Self {
            code: Self::SUCCESS_CODE,
            message: None,
            content: None,
        }
    }

    pub fn success_with(content: T) -> Self {
        Self {
            code: Self::SUCCESS_CODE,
            message: None,
            content: Some(content),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            code: Self::FAIL_CODE,
            message: Some(message.into()),
            content: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Self::SUCCESS_CODE
    }

    pub fn message_or_empty(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    /// 丢弃内容并转换为另一种内容类型的响应，保留 code/message
    pub fn without_content<U>(self) -> RpcResponse<U> {
        RpcResponse {
            code: self.code,
            message: self.message,
            content: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_serialization_omits_empty_fields() {
        let json = serde_json::to_string(&RpcResponse::<String>::success()).unwrap();
        assert_eq!(json, r#"{"code":200}"#);
    }

    #[test]
    fn test_fail_response() {
        let resp = RpcResponse::<String>::fail("The access token is wrong.");
        assert!(!resp.is_success());
        assert_eq!(resp.code, 500);
        assert_eq!(resp.message_or_empty(), "The access token is wrong.");
    }

    #[test]
    fn test_deserialize_without_content() {
        let resp: RpcResponse<String> =
            serde_json::from_str(r#"{"code":500,"message":"boom"}"#).unwrap();
        assert_eq!(resp.code, 500);
        assert!(resp.content.is_none());
    }
}
