use bytes::Bytes;
use prost::Message;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::connection::{CallReader, ServerCallReader, ServerCallWriter};
use crate::context::ServerContext;
use crate::error::{CallError, RpcPathError, ServerError};
use crate::path::MethodPath;

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The shape of an RPC: how many messages flow in each direction and who
/// owns reading and writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Unary => "unary",
            CallType::ServerStreaming => "server_streaming",
            CallType::ClientStreaming => "client_streaming",
            CallType::BidiStreaming => "bidi_streaming",
        }
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i32> for CallType {
    type Error = ServerError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(CallType::Unary),
            1 => Ok(CallType::ServerStreaming),
            2 => Ok(CallType::ClientStreaming),
            3 => Ok(CallType::BidiStreaming),
            other => Err(ServerError::UnknownCallType(other)),
        }
    }
}

// Type-erased handlers. Requests arrive and responses leave as encoded
// bytes; the typed closures captured inside do the prost conversions.
pub(crate) type UnaryFn =
    Arc<dyn Fn(Option<Bytes>, ServerContext) -> BoxFuture<Result<Bytes, CallError>> + Send + Sync>;
pub(crate) type ServerStreamingFn = Arc<
    dyn Fn(Option<Bytes>, ServerCallWriter, ServerContext) -> BoxFuture<Result<(), CallError>>
        + Send
        + Sync,
>;
pub(crate) type ClientStreamingFn =
    Arc<dyn Fn(CallReader, ServerContext) -> BoxFuture<Result<Bytes, CallError>> + Send + Sync>;
pub(crate) type BidiStreamingFn = Arc<
    dyn Fn(CallReader, ServerCallWriter, ServerContext) -> BoxFuture<Result<(), CallError>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub(crate) enum MethodHandler {
    Unary(UnaryFn),
    ServerStreaming(ServerStreamingFn),
    ClientStreaming(ClientStreamingFn),
    BidiStreaming(BidiStreamingFn),
}

impl MethodHandler {
    fn call_type(&self) -> CallType {
        match self {
            MethodHandler::Unary(_) => CallType::Unary,
            MethodHandler::ServerStreaming(_) => CallType::ServerStreaming,
            MethodHandler::ClientStreaming(_) => CallType::ClientStreaming,
            MethodHandler::BidiStreaming(_) => CallType::BidiStreaming,
        }
    }
}

/// Decode a single request, falling back to the default message when the
/// caller sent none.
fn decode_or_default<Req>(request: Option<Bytes>) -> Result<Req, CallError>
where
    Req: Message + Default,
{
    match request {
        Some(bytes) => Ok(Req::decode(bytes)?),
        None => Ok(Req::default()),
    }
}

/// One registered RPC method: its path, call shape, request type and the
/// handler bound to it.
///
/// Built once by a [`Service`] and never mutated afterwards.
#[derive(Clone)]
pub struct MethodDescriptor {
    path: String,
    request_type: &'static str,
    handler: MethodHandler,
}

impl MethodDescriptor {
    /// A unary method: one request in, one response out.
    ///
    /// # Example
    /// ```ignore
    /// MethodDescriptor::unary("/pkg.EchoService/Echo", |req: EchoRequest, _ctx| async move {
    ///     Ok(EchoResponse { message: req.message })
    /// })
    /// ```
    pub fn unary<Req, Resp, F, Fut>(path: impl Into<String>, f: F) -> Self
    where
        Req: Message + Default + Send + 'static,
        Resp: Message + Send + 'static,
        F: Fn(Req, ServerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        let handler: UnaryFn = Arc::new(move |request: Option<Bytes>, ctx: ServerContext| {
            let fut = decode_or_default::<Req>(request).map(|req| f(req, ctx));
            Box::pin(async move {
                let response = fut?.await?;
                Ok(Bytes::from(response.encode_to_vec()))
            }) as BoxFuture<Result<Bytes, CallError>>
        });

        Self::new::<Req>(path, MethodHandler::Unary(handler))
    }

    /// A server-streaming method. The handler writes its responses and must
    /// finish the writer itself.
    pub fn server_streaming<Req, F, Fut>(path: impl Into<String>, f: F) -> Self
    where
        Req: Message + Default + Send + 'static,
        F: Fn(Req, ServerCallWriter, ServerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: ServerStreamingFn = Arc::new(
            move |request: Option<Bytes>, writer: ServerCallWriter, ctx: ServerContext| {
                let fut = decode_or_default::<Req>(request).map(|req| f(req, writer, ctx));
                Box::pin(async move {
                    fut?.await?;
                    Ok(())
                }) as BoxFuture<Result<(), CallError>>
            },
        );

        Self::new::<Req>(path, MethodHandler::ServerStreaming(handler))
    }

    /// A client-streaming method. The handler reads as many requests as it
    /// wants and returns the single response.
    pub fn client_streaming<Req, Resp, F, Fut>(path: impl Into<String>, f: F) -> Self
    where
        Req: Message + Default + Send + 'static,
        Resp: Message + Send + 'static,
        F: Fn(ServerCallReader<Req>, ServerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        let handler: ClientStreamingFn =
            Arc::new(move |reader: CallReader, ctx: ServerContext| {
                let fut = f(reader.typed::<Req>(), ctx);
                Box::pin(async move {
                    let response = fut.await?;
                    Ok(Bytes::from(response.encode_to_vec()))
                }) as BoxFuture<Result<Bytes, CallError>>
            });

        Self::new::<Req>(path, MethodHandler::ClientStreaming(handler))
    }

    /// A bidirectional-streaming method. The handler owns both directions
    /// and must finish the writer itself.
    pub fn bidi_streaming<Req, F, Fut>(path: impl Into<String>, f: F) -> Self
    where
        Req: Message + Default + Send + 'static,
        F: Fn(ServerCallReader<Req>, ServerCallWriter, ServerContext) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: BidiStreamingFn = Arc::new(
            move |reader: CallReader, writer: ServerCallWriter, ctx: ServerContext| {
                let fut = f(reader.typed::<Req>(), writer, ctx);
                Box::pin(async move {
                    fut.await?;
                    Ok(())
                }) as BoxFuture<Result<(), CallError>>
            },
        );

        Self::new::<Req>(path, MethodHandler::BidiStreaming(handler))
    }

    fn new<Req>(path: impl Into<String>, handler: MethodHandler) -> Self {
        Self {
            path: path.into(),
            request_type: std::any::type_name::<Req>(),
            handler,
        }
    }

    /// The full method path this descriptor is registered under.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn call_type(&self) -> CallType {
        self.handler.call_type()
    }

    /// Type name of the request message.
    pub fn request_type(&self) -> &'static str {
        self.request_type
    }

    pub(crate) fn handler(&self) -> &MethodHandler {
        &self.handler
    }

    /// Validate the path and rewrite it to `/pkg.Service/Method` form.
    pub(crate) fn canonicalize(mut self) -> Result<Self, RpcPathError> {
        self.path = MethodPath::parse(&self.path)?.full_path();
        Ok(self)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("path", &self.path)
            .field("call_type", &self.call_type())
            .field("request_type", &self.request_type)
            .finish()
    }
}

/// A service implementation: something that can describe the methods it
/// serves.
pub trait Service: Send + Sync {
    fn method_descriptors(&self) -> Vec<MethodDescriptor>;
}

impl Service for Vec<MethodDescriptor> {
    fn method_descriptors(&self) -> Vec<MethodDescriptor> {
        self.clone()
    }
}

impl Service for MethodDescriptor {
    fn method_descriptors(&self) -> Vec<MethodDescriptor> {
        vec![self.clone()]
    }
}
