pub mod config;
pub mod error;
pub mod runtime;
pub mod services;

pub use config::Settings;
pub use error::{BridgeError, BridgeResult};
pub use runtime::bridge::{RuntimeBridge, RuntimeConfig, RuntimeState, RuntimeStatus};
pub use runtime::manager::{BridgeManager, ManagerConfig, RetryOptions, configure_bridge, js_call};
