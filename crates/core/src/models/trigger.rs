use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 同一任务在执行器上已有调度在执行或排队时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockStrategy {
    /// 单机串行：进入有界队列排队，队列满时拒绝
    #[default]
    SerialExecution,
    /// 丢弃后续调度：已有调度在执行或排队时拒绝新的调度
    DiscardLater,
    /// 覆盖之前调度：终止旧线程，由新线程执行本次调度
    CoverEarly,
}

impl BlockStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockStrategy::SerialExecution => "SERIAL_EXECUTION",
            BlockStrategy::DiscardLater => "DISCARD_LATER",
            BlockStrategy::CoverEarly => "COVER_EARLY",
        }
    }
}

impl fmt::Display for BlockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SERIAL_EXECUTION" => Ok(BlockStrategy::SerialExecution),
            "DISCARD_LATER" => Ok(BlockStrategy::DiscardLater),
            "COVER_EARLY" => Ok(BlockStrategy::CoverEarly),
            other => Err(format!("无效的阻塞策略: {other}")),
        }
    }
}

/// 调度中心发往执行器的一次触发请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub job_id: i64,
    pub log_id: i64,
    /// 触发时间（毫秒时间戳）
    pub log_date_time: i64,
    pub handler_name: String,
    #[serde(default)]
    pub params: Option<String>,
    #[serde(default)]
    pub block_strategy: BlockStrategy,
    /// 0 表示不限制执行时长
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub shard_index: u32,
    #[serde(default = "default_shard_total")]
    pub shard_total: u32,
}

fn default_shard_total() -> u32 {
    1
}

impl TriggerRequest {
    pub fn new(job_id: i64, log_id: i64, handler_name: impl Into<String>) -> Self {
        Self {
            job_id,
            log_id,
            log_date_time: chrono::Utc::now().timestamp_millis(),
            handler_name: handler_name.into(),
            params: None,
            block_strategy: BlockStrategy::default(),
            timeout_seconds: 0,
            shard_index: 0,
            shard_total: 1,
        }
    }

    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = Some(params.into());
        self
    }

    pub fn with_block_strategy(mut self, block_strategy: BlockStrategy) -> Self {
        self.block_strategy = block_strategy;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_shard(mut self, shard_index: u32, shard_total: u32) -> Self {
        self.shard_index = shard_index;
        self.shard_total = shard_total;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.handler_name.trim().is_empty() {
            return Err("handler_name不能为空".to_string());
        }
        if self.shard_total == 0 || self.shard_index >= self.shard_total {
            return Err(format!(
                "分片参数无效: shard_index={}, shard_total={}",
                self.shard_index, self.shard_total
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleBeatRequest {
    pub job_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillRequest {
    pub job_id: i64,
}

/// 按字节偏移量读取任务日志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRequest {
    pub log_id: i64,
    pub log_date_time: i64,
    #[serde(default)]
    pub from_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogResult {
    pub from_offset: u64,
    pub to_offset: u64,
    pub content: String,
    /// 为 true 时日志已读完且对应的调度不再执行，调用方可停止轮询
    pub is_end: bool,
}
