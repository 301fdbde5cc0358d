use serde::{Deserialize, Serialize};

/// 单次任务执行结束后回调给调度中心的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleCallbackResult {
    pub log_id: i64,
    /// 触发时间（毫秒时间戳），用于定位日志文件
    pub log_date_time: i64,
    pub handle_code: i32,
    #[serde(default)]
    pub handle_message: Option<String>,
}

impl HandleCallbackResult {
    pub const HANDLE_CODE_SUCCESS: i32 = 200;
    pub const HANDLE_CODE_FAIL: i32 = 500;
    pub const HANDLE_CODE_TIMEOUT: i32 = 502;

    /// 回调消息的最大长度（字符数），超出部分截断
    pub const MAX_MESSAGE_CHARS: usize = 50_000;

    pub fn new(log_id: i64, log_date_time: i64, handle_code: i32, handle_message: Option<String>) -> Self {
        Self {
            log_id,
            log_date_time,
            handle_code,
            handle_message: handle_message.map(truncate_message),
        }
    }

    pub fn success(log_id: i64, log_date_time: i64, handle_message: Option<String>) -> Self {
        Self::new(log_id, log_date_time, Self::HANDLE_CODE_SUCCESS, handle_message)
    }

    pub fn fail(log_id: i64, log_date_time: i64, handle_message: impl Into<String>) -> Self {
        Self::new(
            log_id,
            log_date_time,
            Self::HANDLE_CODE_FAIL,
            Some(handle_message.into()),
        )
    }

    pub fn is_success(&self) -> bool {
        self.handle_code == Self::HANDLE_CODE_SUCCESS
    }
}

fn truncate_message(message: String) -> String {
    match message.char_indices().nth(HandleCallbackResult::MAX_MESSAGE_CHARS) {
        Some((byte_index, _)) => format!("{}...", &message[..byte_index]),
        None => message,
    }
}
