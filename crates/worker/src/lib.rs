//! 执行器侧：任务线程、注册心跳、结果回调与控制端点

pub mod callback;
pub mod components;
pub mod executors;
pub mod handler;
pub mod job_log;
pub mod job_registry;
pub mod job_thread;
pub mod log_cleaner;
pub mod runtime;
pub mod server;

pub use callback::{CallbackPipeline, CallbackSender};
pub use components::{CoordinatorClient, HeartbeatManager};
pub use executors::{HttpJobHandler, HttpTaskParams, ShellJobHandler, ShellTaskParams};
pub use handler::{HandlerRegistry, JobContext, JobHandler};
pub use job_log::JobLogStore;
pub use job_registry::JobThreadRegistry;
pub use job_thread::{JobThread, JobThreadState};
pub use runtime::{RunningWorker, WorkerRuntime};
pub use server::{create_routes, ControlState, RequestPool};
