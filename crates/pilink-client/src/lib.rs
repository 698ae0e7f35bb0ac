//! # pilink-client
//!
//! Network side of a field camera. Two long-lived websocket sessions run
//! side by side under a [`Supervisor`]:
//!
//! - the **command channel** receives `{"function", "args", "id"}` requests,
//!   dispatches them to a fixed [`Operation`] registry and answers each one
//!   with exactly one correlated response;
//! - the **live-view channel** forwards JPEG frames cut from a continuous
//!   capture subprocess while the [`LiveViewGate`] is open.
//!
//! Camera access itself lives in `pilink-camera`; every hardware call made
//! here goes through its single-worker queue.

pub mod command;
pub mod config;
pub mod context;
pub mod gate;
pub mod handlers;
pub mod live;
pub mod rpc;
pub mod supervisor;
pub mod upload;

pub use config::{Cli, ClientConfig};
pub use context::RuntimeContext;
pub use gate::LiveViewGate;
pub use handlers::Dispatcher;
pub use rpc::{Operation, Outcome, RpcError, RpcRequest, RpcResponse};
pub use supervisor::Supervisor;
pub use upload::Uploader;
