//! 调度中心侧：路由策略、节点健康缓存、执行器注册表与调度触发

pub mod api;
pub mod callback;
pub mod executor_client;
pub mod health;
pub mod registry;
pub mod strategies;
pub mod trigger;

pub use api::{create_routes, CoordinatorState};
pub use callback::{CallbackHandler, InMemoryCallbackStore};
pub use executor_client::{ExecutorApi, ExecutorClient};
pub use health::{CandidateHealth, ProbeKind, ProbeRecord};
pub use registry::RegistryStore;
pub use strategies::{ExecutorRouter, RouteError, RouteStrategy, Routed, RouterContext};
pub use trigger::{JobDispatchInfo, JobTrigger, TriggerOutcome};
