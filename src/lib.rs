//! Echo demo built on `rpcdispatch`.

pub mod echo;
pub mod hooks;
pub mod logging;

use rpcdispatch::{RpcServer, RpcServerConfig, ServerError};

use crate::echo::EchoService;
use crate::hooks::{AccessLog, TracingErrorReporter};

/// Build a server with the echo service, access logging on both hooks and
/// the tracing error reporter.
pub fn echo_server(service: &EchoService, config: RpcServerConfig) -> Result<RpcServer, ServerError> {
    let mut server = RpcServer::new(config);
    server.add_callback("before", AccessLog::before())?;
    server.add_callback("after", AccessLog::after())?;
    server.set_error_callback(TracingErrorReporter);
    server.handle(service)?;
    Ok(server)
}
