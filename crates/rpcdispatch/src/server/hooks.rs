use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::connection::{CallReader, ServerCallWriter};
use crate::context::ServerContext;
use crate::error::ServerError;
use crate::server::descriptor::MethodDescriptor;

/// Extension points around dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Runs after routing, before the method handler.
    Before,
    /// Runs after the method handler returned successfully.
    After,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::Before => "before",
            Hook::After => "after",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Hook {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before" => Ok(Hook::Before),
            "after" => Ok(Hook::After),
            other => Err(ServerError::UnknownHook(other.to_owned())),
        }
    }
}

/// A callback invoked around every routed call.
///
/// Callbacks may change the context's status or write to the call
/// directly. Returning an error fails the call with `INTERNAL`.
#[tonic::async_trait]
pub trait ServerCallback: Send + Sync {
    async fn call(
        &self,
        method: &MethodDescriptor,
        context: &ServerContext,
        reader: &CallReader,
        writer: &ServerCallWriter,
    ) -> anyhow::Result<()>;
}

#[tonic::async_trait]
impl<T> ServerCallback for Arc<T>
where
    T: ServerCallback + ?Sized,
{
    async fn call(
        &self,
        method: &MethodDescriptor,
        context: &ServerContext,
        reader: &CallReader,
        writer: &ServerCallWriter,
    ) -> anyhow::Result<()> {
        (**self).call(method, context, reader, writer).await
    }
}

/// Observer notified of failures the server contained or could not recover from.
///
/// `context` is `None` for failures of the event loop itself.
pub trait ErrorCallback: Send + Sync {
    fn on_error(&self, error: &(dyn std::error::Error + 'static), context: Option<&ServerContext>);
}

impl<T> ErrorCallback for Arc<T>
where
    T: ErrorCallback + ?Sized,
{
    fn on_error(&self, error: &(dyn std::error::Error + 'static), context: Option<&ServerContext>) {
        (**self).on_error(error, context)
    }
}

/// Callbacks registered per hook, kept in registration order.
#[derive(Default)]
pub struct HookRegistry {
    before: Vec<Arc<dyn ServerCallback>>,
    after: Vec<Arc<dyn ServerCallback>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback to the named hook (`"before"` or `"after"`).
    pub fn add_callback(
        &mut self,
        hook: &str,
        callback: Arc<dyn ServerCallback>,
    ) -> Result<(), ServerError> {
        let hook: Hook = hook.parse()?;
        self.callbacks_mut(hook).push(callback);
        Ok(())
    }

    pub fn callbacks(&self, hook: Hook) -> &[Arc<dyn ServerCallback>] {
        match hook {
            Hook::Before => &self.before,
            Hook::After => &self.after,
        }
    }

    fn callbacks_mut(&mut self, hook: Hook) -> &mut Vec<Arc<dyn ServerCallback>> {
        match hook {
            Hook::Before => &mut self.before,
            Hook::After => &mut self.after,
        }
    }

    /// Run every callback for `hook` in registration order, stopping at the
    /// first error.
    pub async fn trigger(
        &self,
        hook: Hook,
        method: &MethodDescriptor,
        context: &ServerContext,
        reader: &CallReader,
        writer: &ServerCallWriter,
    ) -> anyhow::Result<()> {
        for callback in self.callbacks(hook) {
            callback.call(method, context, reader, writer).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{RpcInbound, RpcOutbound};
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tonic::metadata::MetadataMap;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Ping {
        #[prost(string, tag = "1")]
        text: String,
    }

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[tonic::async_trait]
    impl ServerCallback for Record {
        async fn call(
            &self,
            _method: &MethodDescriptor,
            _context: &ServerContext,
            _reader: &CallReader,
            _writer: &ServerCallWriter,
        ) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(self.name);
            Ok(())
        }
    }

    struct Fail;

    #[tonic::async_trait]
    impl ServerCallback for Fail {
        async fn call(
            &self,
            _method: &MethodDescriptor,
            _context: &ServerContext,
            _reader: &CallReader,
            _writer: &ServerCallWriter,
        ) -> anyhow::Result<()> {
            anyhow::bail!("rejected by hook")
        }
    }

    fn call_parts() -> (MethodDescriptor, ServerContext, CallReader, ServerCallWriter) {
        let descriptor =
            MethodDescriptor::unary("/pkg.Svc/Echo", |req: Ping, _ctx| async move { Ok(req) });
        let ctx = ServerContext::new("/pkg.Svc/Echo", MetadataMap::new(), None);
        let (_req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, _resp_rx) = mpsc::unbounded_channel();
        let reader = CallReader::new(RpcInbound::from_receiver(req_rx));
        let writer = ServerCallWriter::new(RpcOutbound::new(resp_tx), ctx.clone());
        (descriptor, ctx, reader, writer)
    }

    #[test]
    fn test_hook_names() {
        assert_eq!("before".parse::<Hook>().unwrap(), Hook::Before);
        assert_eq!("after".parse::<Hook>().unwrap(), Hook::After);
        assert!("Before".parse::<Hook>().is_err());
    }

    #[test]
    fn test_unknown_hook_rejected() {
        let mut registry = HookRegistry::new();
        let result = registry.add_callback("invalidHook", Arc::new(Fail));

        assert!(matches!(result, Err(ServerError::UnknownHook(name)) if name == "invalidHook"));
        assert!(registry.callbacks(Hook::Before).is_empty());
        assert!(registry.callbacks(Hook::After).is_empty());
    }

    #[tokio::test]
    async fn test_trigger_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        for name in ["first", "second", "third"] {
            let callback = Record {
                name,
                log: Arc::clone(&log),
            };
            registry.add_callback("before", Arc::new(callback)).unwrap();
        }
        registry
            .add_callback(
                "after",
                Arc::new(Record {
                    name: "after",
                    log: Arc::clone(&log),
                }),
            )
            .unwrap();

        let (descriptor, ctx, reader, writer) = call_parts();
        registry
            .trigger(Hook::Before, &descriptor, &ctx, &reader, &writer)
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_trigger_stops_at_first_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry.add_callback("before", Arc::new(Fail)).unwrap();
        registry
            .add_callback(
                "before",
                Arc::new(Record {
                    name: "never",
                    log: Arc::clone(&log),
                }),
            )
            .unwrap();

        let (descriptor, ctx, reader, writer) = call_parts();
        let err = registry
            .trigger(Hook::Before, &descriptor, &ctx, &reader, &writer)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "rejected by hook");
        assert!(log.lock().unwrap().is_empty());
    }
}
