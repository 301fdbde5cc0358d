pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod remoting;
pub mod transport;

pub use config::*;
pub use errors::*;
pub use logging::init_logging;
pub use models::{
    BlockStrategy, HandleCallbackResult, IdleBeatRequest, KillRequest, LogRequest, LogResult,
    RegistryEntry, RegistryType, RpcResponse, TriggerRequest,
};
pub use remoting::{RemotingClient, ACCESS_TOKEN_HEADER};
pub use transport::{access_token_guard, parse_body, AccessToken};
