use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tonic::Status;
use tracing::{debug, error, info, warn};

use crate::connection::{CallReader, ServerCallWriter};
use crate::context::ServerContext;
use crate::error::{CallError, ServerError};
use crate::server::config::RpcServerConfig;
use crate::server::descriptor::{MethodDescriptor, MethodHandler, Service};
use crate::server::hooks::{ErrorCallback, Hook, HookRegistry, ServerCallback};
use crate::server::router::{PathMap, Router};
use crate::transport::{RpcEvent, Transport};

/// The RPC server: routes each incoming call to its registered method,
/// running hooks around it and containing any failure to that call.
///
/// Register services, hooks and the error callback first, then call
/// [`RpcServer::run`].
pub struct RpcServer {
    router: Router,
    hooks: HookRegistry,
    error_callback: Option<Arc<dyn ErrorCallback>>,
    config: RpcServerConfig,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig) -> Self {
        Self {
            router: Router::new(),
            hooks: HookRegistry::new(),
            error_callback: None,
            config,
        }
    }

    /// Register a callback on the `"before"` or `"after"` hook.
    pub fn add_callback<C>(&mut self, hook: &str, callback: C) -> Result<(), ServerError>
    where
        C: ServerCallback + 'static,
    {
        self.hooks.add_callback(hook, Arc::new(callback))
    }

    /// Set the error observer, replacing any previous one.
    pub fn set_error_callback<E>(&mut self, callback: E)
    where
        E: ErrorCallback + 'static,
    {
        self.error_callback = Some(Arc::new(callback));
    }

    /// Register every method of `service`. Returns all registered methods.
    ///
    /// # Example
    /// ```ignore
    /// let mut server = RpcServer::new(RpcServerConfig::default());
    /// server.handle(&EchoService::new())?;
    /// server.run(transport).await?;
    /// ```
    pub fn handle<S>(&mut self, service: &S) -> Result<&PathMap, ServerError>
    where
        S: Service + ?Sized,
    {
        self.router.register(service)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Run the server, processing calls one at a time until the transport
    /// closes or fails.
    ///
    /// Returns `Ok(())` when the transport reports it is closed. A failure
    /// while waiting for the next call is fatal: the error callback is
    /// notified without a context and the error is returned, leaving the
    /// restart-or-exit decision to the caller.
    pub async fn run<T>(self, mut transport: T) -> Result<(), ServerError>
    where
        T: Transport,
    {
        info!(
            methods = self.router.len(),
            before_hooks = self.hooks.callbacks(Hook::Before).len(),
            after_hooks = self.hooks.callbacks(Hook::After).len(),
            "RPC server started, waiting for calls"
        );

        loop {
            match transport.next_event().await {
                Ok(Some(event)) => self.process_event(event).await,

                Ok(None) => {
                    info!("Transport closed, RPC server shutting down");
                    return Ok(());
                }

                Err(e) => {
                    self.notify_error(&e, None);
                    error!(error = %e, "Failed to wait for next call, RPC server stopping");
                    return Err(ServerError::Transport(e));
                }
            }
        }
    }

    /// Handle one call from routing to its terminal status.
    async fn process_event(&self, event: RpcEvent) {
        let RpcEvent {
            method,
            metadata,
            deadline,
            call,
        } = event;

        let context = ServerContext::new(method, metadata, deadline);
        let writer = ServerCallWriter::new(call.outbound, context.clone());

        debug!(
            call_id = %context.call_id(),
            method = %context.method(),
            "Received call"
        );

        let Some(descriptor) = self.router.lookup(context.method()) else {
            warn!(
                call_id = %context.call_id(),
                method = %context.method(),
                "No handler registered for method"
            );
            context.set_status(Status::unimplemented(format!(
                "Method not found: {}",
                context.method()
            )));
            if let Err(e) = writer.finish() {
                debug!(
                    call_id = %context.call_id(),
                    error = %e,
                    "Failed to send UNIMPLEMENTED status"
                );
            }
            return;
        };

        let reader = CallReader::new(call.inbound);
        let guarded = self.process_call(&descriptor, &context, &reader, &writer);

        let result = if self.config.catch_panics {
            match AssertUnwindSafe(guarded).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(CallError::Panic(panic_message(payload))),
            }
        } else {
            guarded.await
        };

        match result {
            Ok(()) => {
                debug!(
                    call_id = %context.call_id(),
                    method = %context.method(),
                    call_type = %descriptor.call_type(),
                    "Call completed"
                );
            }
            Err(err) => {
                error!(
                    call_id = %context.call_id(),
                    method = %context.method(),
                    call_type = %descriptor.call_type(),
                    error = %err,
                    "Call failed"
                );
                context.set_status(err.to_status());
                self.notify_error(&err, Some(&context));
                if let Err(e) = writer.finish() {
                    warn!(
                        call_id = %context.call_id(),
                        error = %e,
                        "Failed to finish failed call"
                    );
                }
            }
        }
    }

    /// Before hooks, the method handler, then after hooks. Any error aborts
    /// the rest.
    async fn process_call(
        &self,
        descriptor: &MethodDescriptor,
        context: &ServerContext,
        reader: &CallReader,
        writer: &ServerCallWriter,
    ) -> Result<(), CallError> {
        self.hooks
            .trigger(Hook::Before, descriptor, context, reader, writer)
            .await?;

        if self.config.skip_handler_if_finished && writer.is_finished() {
            debug!(
                call_id = %context.call_id(),
                method = %context.method(),
                "Call finished by before hook, skipping handler"
            );
        } else {
            self.dispatch(descriptor, context, reader, writer).await?;
        }

        self.hooks
            .trigger(Hook::After, descriptor, context, reader, writer)
            .await?;
        Ok(())
    }

    /// Invoke the handler according to the method's call shape.
    async fn dispatch(
        &self,
        descriptor: &MethodDescriptor,
        context: &ServerContext,
        reader: &CallReader,
        writer: &ServerCallWriter,
    ) -> Result<(), CallError> {
        match descriptor.handler() {
            MethodHandler::Unary(handler) => {
                let request = reader.read_raw().await.map_err(CallError::Inbound)?;
                let response = handler(request, context.clone()).await?;
                writer.finish_raw(Some(response))?;
            }
            MethodHandler::ServerStreaming(handler) => {
                let request = reader.read_raw().await.map_err(CallError::Inbound)?;
                handler(request, writer.clone(), context.clone()).await?;
            }
            MethodHandler::ClientStreaming(handler) => {
                let response = handler(reader.clone(), context.clone()).await?;
                writer.finish_raw(Some(response))?;
            }
            MethodHandler::BidiStreaming(handler) => {
                handler(reader.clone(), writer.clone(), context.clone()).await?;
            }
        }
        Ok(())
    }

    fn notify_error(
        &self,
        error: &(dyn std::error::Error + 'static),
        context: Option<&ServerContext>,
    ) {
        if let Some(callback) = &self.error_callback {
            callback.on_error(error, context);
        }
    }
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new(RpcServerConfig::default())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
