use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    api_observability::ObservabilityConfig,
    dispatcher_worker::{CoordinatorConfig, ExecutorConfig},
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub executor: ExecutorConfig,
    pub coordinator: CoordinatorConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: SCHEDULER_, separator: __)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/scheduler.toml", "scheduler.toml"];
            if let Some(path) = default_paths.iter().find(|path| Path::new(path).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .prefix_separator("_")
                .separator("__"),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, mainly for tests and embedding
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: AppConfig = ConfigBuilder::builder()
            .add_source(File::from_str(toml_str, FileFormat::Toml))
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.executor.enabled {
            self.executor.validate().context("执行器配置无效")?;
        }
        if self.coordinator.enabled {
            self.coordinator.validate().context("调度中心配置无效")?;
        }
        self.observability.validate().context("可观测性配置无效")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.executor.port, 9999);
        assert_eq!(config.executor.heartbeat_interval_seconds, 30);
        assert_eq!(config.coordinator.registry_dead_timeout_seconds, 90);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [executor]
            app_name = "billing-executor"
            access_token = "secret"
            coordinator_addresses = "http://10.0.0.1:8080/,http://10.0.0.2:8080/"

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.executor.app_name, "billing-executor");
        assert_eq!(config.executor.access_token, "secret");
        assert_eq!(config.executor.coordinator_address_list().len(), 2);
        assert_eq!(config.executor.queue_capacity, 1000);
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_invalid_log_format_rejected() {
        let result = AppConfig::from_toml_str(
            r#"
            [observability]
            log_format = "xml"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = AppConfig::load(Some("/nonexistent/scheduler.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.toml");
        std::fs::write(
            &path,
            "[coordinator]\nbind_address = \"127.0.0.1:18080\"\nprobe_timeout_ms = 250\n",
        )
        .unwrap();

        let config = AppConfig::load(path.to_str()).unwrap();
        assert_eq!(config.coordinator.bind_address, "127.0.0.1:18080");
        assert_eq!(config.coordinator.probe_timeout_ms, 250);
    }
}
