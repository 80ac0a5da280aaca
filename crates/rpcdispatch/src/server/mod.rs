//! Server-side types for rpcdispatch.
//!
//! This module contains the `RpcServer` event loop and the pieces it
//! coordinates: method descriptors, the router, and the hook registry.

mod config;
mod descriptor;
mod dispatcher;
mod hooks;
mod router;

pub use config::RpcServerConfig;
pub use descriptor::{CallType, MethodDescriptor, Service};
pub use dispatcher::RpcServer;
pub use hooks::{ErrorCallback, Hook, HookRegistry, ServerCallback};
pub use router::{PathMap, Router};
