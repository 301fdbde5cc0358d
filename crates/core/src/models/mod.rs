pub mod callback;
pub mod registry;
pub mod response;
pub mod trigger;

pub use callback::HandleCallbackResult;
pub use registry::{RegistryEntry, RegistryType};
pub use response::RpcResponse;
pub use trigger::{BlockStrategy, IdleBeatRequest, KillRequest, LogRequest, LogResult, TriggerRequest};
