use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 调度中心（协调者）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub access_token: String,
    /// 超过该时间未刷新的注册信息视为失效
    pub registry_dead_timeout_seconds: u64,
    /// Failover/Busyover 探测单个节点的超时时间
    pub probe_timeout_ms: u64,
    /// 后台刷新节点健康状态的间隔
    pub health_refresh_interval_seconds: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
            access_token: String::new(),
            registry_dead_timeout_seconds: 90,
            probe_timeout_ms: 1000,
            health_refresh_interval_seconds: 10,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.is_empty() {
            return Err(anyhow::anyhow!("调度中心监听地址不能为空"));
        }

        if self.registry_dead_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("注册失效时间必须大于0"));
        }

        if self.probe_timeout_ms == 0 {
            return Err(anyhow::anyhow!("节点探测超时时间必须大于0"));
        }

        if self.health_refresh_interval_seconds == 0 {
            return Err(anyhow::anyhow!("健康状态刷新间隔必须大于0"));
        }

        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// 执行器（Worker）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub enabled: bool,
    pub app_name: String,
    /// 注册到调度中心的地址，为空时使用 `http://{ip}:{port}/`
    pub address: String,
    /// 为空时使用本机主机名
    pub ip: String,
    pub port: u16,
    pub access_token: String,
    /// 调度中心地址列表，逗号分隔
    pub coordinator_addresses: String,
    pub log_path: String,
    /// 小于3时不清理本地任务日志
    pub log_retention_days: u32,
    pub heartbeat_interval_seconds: u64,
    pub callback_retry_interval_seconds: u64,
    /// 单个任务待执行队列的容量
    pub queue_capacity: usize,
    /// 同时处理的控制请求上限
    pub max_handler_concurrency: usize,
    /// 等待处理的控制请求上限，超出后直接拒绝
    pub max_pending_requests: usize,
    /// 调用调度中心的超时时间
    pub request_timeout_seconds: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_name: "job-executor".to_string(),
            address: String::new(),
            ip: String::new(),
            port: 9999,
            access_token: String::new(),
            coordinator_addresses: "http://127.0.0.1:8080/".to_string(),
            log_path: "data/applogs/jobhandler".to_string(),
            log_retention_days: 30,
            heartbeat_interval_seconds: 30,
            callback_retry_interval_seconds: 30,
            queue_capacity: 1000,
            max_handler_concurrency: 200,
            max_pending_requests: 2000,
            request_timeout_seconds: 3,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(anyhow::anyhow!("执行器应用名不能为空"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("执行器端口必须大于0"));
        }

        if self.coordinator_address_list().is_empty() {
            return Err(anyhow::anyhow!("调度中心地址不能为空"));
        }

        if self.log_path.trim().is_empty() {
            return Err(anyhow::anyhow!("日志目录不能为空"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.callback_retry_interval_seconds == 0 {
            return Err(anyhow::anyhow!("回调重试间隔必须大于0"));
        }

        if self.queue_capacity == 0 {
            return Err(anyhow::anyhow!("任务队列容量必须大于0"));
        }

        if self.max_handler_concurrency == 0 {
            return Err(anyhow::anyhow!("最大并发处理数必须大于0"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }

        Ok(())
    }

    /// 解析逗号分隔的调度中心地址，忽略空项
    pub fn coordinator_address_list(&self) -> Vec<String> {
        self.coordinator_addresses
            .split(',')
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn advertised_address(&self) -> String {
        if !self.address.trim().is_empty() {
            return self.address.trim().to_string();
        }
        let ip = if self.ip.trim().is_empty() {
            hostname::get()
                .ok()
                .and_then(|name| name.into_string().ok())
                .unwrap_or_else(|| "127.0.0.1".to_string())
        } else {
            self.ip.trim().to_string()
        };
        format!("http://{}:{}/", ip, self.port)
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
