//! Bridge to the JavaScript services subprocess.
//!
//! Browser-dependent SDKs (Lit Protocol, Synapse, Arkiv) only run inside a
//! JS engine; this module owns the subprocess that hosts them and the
//! JSON-RPC session over its stdio. Leaf to root: [`protocol`] defines the
//! wire messages, [`discovery`] locates an installed runtime, [`bridge`]
//! owns one child process, and [`manager`] turns the bridge into a
//! resilient, auto-healing singleton service.

pub mod bridge;
pub mod discovery;
pub mod manager;
pub mod protocol;

pub use bridge::{HandlerId, RuntimeBridge, RuntimeConfig, RuntimeState, RuntimeStatus};
pub use discovery::{RuntimeInfo, RuntimeKind, discover_all_runtimes, discover_runtime, runtime_args};
pub use manager::{
    BridgeManager, CallerId, ManagerConfig, ManagerStatus, RetryOptions, configure_bridge,
    js_call,
};
pub use protocol::{Protocol, Request, Response, RpcError, codes, methods};
