//! 配置管理
//!
//! 配置按以下顺序加载，后者覆盖前者：
//!
//! 1. 结构体默认值
//! 2. TOML 配置文件（`--config` 指定，或默认搜索路径）
//! 3. 环境变量，前缀 `SCHEDULER_`，层级分隔符 `__`，
//!    例如 `SCHEDULER_EXECUTOR__ACCESS_TOKEN=secret`
//!
//! 加载后统一调用 [`AppConfig::validate`]。

pub mod models;

pub use models::{AppConfig, CoordinatorConfig, ExecutorConfig, ObservabilityConfig};
