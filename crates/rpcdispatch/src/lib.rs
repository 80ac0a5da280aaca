//! RPC request dispatch.
//!
//! `rpcdispatch` takes calls delivered by a [`transport::Transport`], routes
//! each one by its full method path (`/package.Service/Method`) to a
//! registered [`server::MethodDescriptor`], and runs it according to its
//! call shape: unary, server-streaming, client-streaming or bidirectional.
//!
//! `before` and `after` hooks run around every routed call. Any failure in
//! a hook or handler, including a panic, fails only that call with an
//! `INTERNAL` status and is reported to the optional error callback; the
//! server then moves on to the next call.
//!
//! # Example
//!
//! ```ignore
//! use rpcdispatch::server::{MethodDescriptor, RpcServer, RpcServerConfig};
//! use rpcdispatch::transport::memory;
//!
//! let mut server = RpcServer::new(RpcServerConfig::default());
//! server.handle(&MethodDescriptor::unary(
//!     "/pkg.EchoService/Echo",
//!     |req: EchoRequest, _ctx| async move { Ok(EchoResponse { message: req.message }) },
//! ))?;
//!
//! let (transport, client) = memory::channel();
//! tokio::spawn(server.run(transport));
//! ```

pub mod connection;
pub mod context;
pub mod error;
pub mod path;
pub mod server;
pub mod transport;

pub use connection::{CallReader, ServerCallReader, ServerCallWriter};
pub use context::ServerContext;
pub use error::{CallError, RpcPathError, RpcSendError, ServerError, TransportError};
pub use server::{
    CallType, ErrorCallback, Hook, MethodDescriptor, RpcServer, RpcServerConfig, ServerCallback,
    Service,
};
