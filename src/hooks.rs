use std::time::Instant;

use rpcdispatch::{
    CallReader, ErrorCallback, MethodDescriptor, ServerCallWriter, ServerCallback, ServerContext,
};
use tonic::Code;
use tracing::{error, info};

/// Logs every routed call on the `before` and `after` hooks.
#[derive(Debug, Clone, Copy)]
pub struct AccessLog {
    stage: &'static str,
}

impl AccessLog {
    pub fn before() -> Self {
        Self { stage: "before" }
    }

    pub fn after() -> Self {
        Self { stage: "after" }
    }
}

#[tonic::async_trait]
impl ServerCallback for AccessLog {
    async fn call(
        &self,
        method: &MethodDescriptor,
        context: &ServerContext,
        _reader: &CallReader,
        _writer: &ServerCallWriter,
    ) -> anyhow::Result<()> {
        let code = context.status().map_or(Code::Ok, |status| status.code());
        info!(
            stage = self.stage,
            call_id = %context.call_id(),
            method = %method.path(),
            call_type = %method.call_type(),
            status = ?code,
            remaining_ms = context
                .deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()).as_millis() as u64),
            "RPC call"
        );
        Ok(())
    }
}

/// Reports contained call failures and fatal loop failures through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorReporter;

impl ErrorCallback for TracingErrorReporter {
    fn on_error(&self, err: &(dyn std::error::Error + 'static), context: Option<&ServerContext>) {
        match context {
            Some(ctx) => error!(
                call_id = %ctx.call_id(),
                method = %ctx.method(),
                error = %err,
                "RPC call failed"
            ),
            None => error!(error = %err, "RPC server loop failed"),
        }
    }
}
