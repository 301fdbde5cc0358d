pub mod api_observability;
pub mod app_config;
pub mod dispatcher_worker;

// Re-export main types for easier imports
pub use api_observability::ObservabilityConfig;
pub use app_config::AppConfig;
pub use dispatcher_worker::{CoordinatorConfig, ExecutorConfig};
