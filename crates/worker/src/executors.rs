use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use scheduler_core::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{error, info};

use crate::handler::{JobContext, JobHandler};

pub const SHELL_HANDLER_NAME: &str = "shellJobHandler";
pub const HTTP_HANDLER_NAME: &str = "httpJobHandler";

/// Shell任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellTaskParams {
    /// 要执行的命令
    pub command: String,
    /// 命令参数
    pub args: Option<Vec<String>>,
    /// 工作目录
    pub working_dir: Option<String>,
    /// 环境变量
    pub env_vars: Option<HashMap<String, String>>,
}

impl ShellTaskParams {
    /// 参数既可以是 JSON 结构，也可以是直接交给 `sh -c` 的脚本
    pub fn parse(params: Option<&str>) -> SchedulerResult<Self> {
        let raw = params
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| SchedulerError::InvalidRequest("shell任务参数为空".to_string()))?;

        if raw.starts_with('{') {
            return serde_json::from_str(raw).map_err(|e| {
                SchedulerError::InvalidRequest(format!("解析Shell任务参数失败: {e}"))
            });
        }

        Ok(Self {
            command: "sh".to_string(),
            args: Some(vec!["-c".to_string(), raw.to_string()]),
            working_dir: None,
            env_vars: None,
        })
    }
}

/// Shell任务处理器
///
/// 输出逐行写入任务日志；子进程在执行被取消（如超时）时随之终止。
pub struct ShellJobHandler;

impl ShellJobHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShellJobHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for ShellJobHandler {
    async fn execute(&self, context: &JobContext) -> SchedulerResult<Option<String>> {
        let start_time = Instant::now();
        let params = ShellTaskParams::parse(context.params.as_deref())?;
        let args = params.args.unwrap_or_default();

        info!(
            "执行Shell任务: job_id={}, log_id={}, command={}, args={:?}",
            context.job_id, context.log_id, params.command, args
        );

        let mut cmd = Command::new(&params.command);
        cmd.args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("SHARD_INDEX", context.shard_index.to_string())
            .env("SHARD_TOTAL", context.shard_total.to_string());
        if let Some(ref dir) = params.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in params.env_vars.unwrap_or_default() {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SchedulerError::TaskExecution(format!("启动Shell命令失败: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SchedulerError::TaskExecution("无法获取stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SchedulerError::TaskExecution("无法获取stderr".to_string()))?;

        let stdout_task = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                context.log(line).await;
            }
        };
        let stderr_task = async {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                context.log(&line).await;
                collected.push(line);
            }
            collected
        };
        let ((), stderr_lines) = tokio::join!(stdout_task, stderr_task);

        let exit_status = child
            .wait()
            .await
            .map_err(|e| SchedulerError::TaskExecution(format!("等待进程结束失败: {e}")))?;

        info!(
            "Shell任务执行完成: log_id={}, exit_code={:?}, duration={}ms",
            context.log_id,
            exit_status.code(),
            start_time.elapsed().as_millis()
        );

        if exit_status.success() {
            Ok(Some(format!("exit code: {}", exit_status.code().unwrap_or(0))))
        } else {
            let mut message = format!("命令执行失败，退出码: {:?}", exit_status.code());
            if !stderr_lines.is_empty() {
                message.push('\n');
                message.push_str(&stderr_lines.join("\n"));
            }
            Err(SchedulerError::TaskExecution(message))
        }
    }
}

/// HTTP任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTaskParams {
    /// 请求URL
    pub url: String,
    /// HTTP方法
    pub method: Option<String>,
    /// 请求头
    pub headers: Option<HashMap<String, String>>,
    /// 请求体
    pub body: Option<String>,
    /// 超时时间（秒）
    pub timeout_seconds: Option<u64>,
}

/// HTTP任务处理器，2xx 视为成功
pub struct HttpJobHandler {
    client: reqwest::Client,
}

impl HttpJobHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpJobHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for HttpJobHandler {
    async fn execute(&self, context: &JobContext) -> SchedulerResult<Option<String>> {
        let raw = context
            .params
            .as_deref()
            .ok_or_else(|| SchedulerError::InvalidRequest("HTTP任务参数为空".to_string()))?;
        let params: HttpTaskParams = serde_json::from_str(raw)
            .map_err(|e| SchedulerError::InvalidRequest(format!("解析HTTP任务参数失败: {e}")))?;

        let method = params.method.unwrap_or_else(|| "GET".to_string());
        info!(
            "执行HTTP任务: log_id={}, method={}, url={}",
            context.log_id, method, params.url
        );

        let mut request_builder = match method.to_uppercase().as_str() {
            "GET" => self.client.get(&params.url),
            "POST" => self.client.post(&params.url),
            "PUT" => self.client.put(&params.url),
            "DELETE" => self.client.delete(&params.url),
            "PATCH" => self.client.patch(&params.url),
            "HEAD" => self.client.head(&params.url),
            _ => {
                return Err(SchedulerError::InvalidRequest(format!(
                    "不支持的HTTP方法: {method}"
                )));
            }
        };

        if let Some(timeout_seconds) = params.timeout_seconds {
            request_builder = request_builder.timeout(Duration::from_secs(timeout_seconds));
        }
        for (key, value) in params.headers.unwrap_or_default() {
            request_builder = request_builder.header(&key, &value);
        }
        if let Some(body) = params.body {
            request_builder = request_builder.body(body);
        }

        let response = request_builder.send().await.map_err(|e| {
            error!("HTTP任务执行失败: log_id={}, error={}", context.log_id, e);
            SchedulerError::TaskExecution(format!("HTTP请求失败: {e}"))
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("读取响应体失败: {e}"));
        context
            .log(format!("HTTP {method} {}\nStatus: {}\nResponse:\n{body}", params.url, status.as_u16()))
            .await;

        if status.is_success() {
            Ok(Some(format!("HTTP {}", status.as_u16())))
        } else {
            Err(SchedulerError::TaskExecution(format!(
                "HTTP请求失败，状态码: {}",
                status.as_u16()
            )))
        }
    }
}
