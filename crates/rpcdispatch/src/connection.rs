use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use prost::Message;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::{Mutex, mpsc};
use tonic::Status;

use crate::context::ServerContext;
use crate::error::{CallError, RpcSendError};

/// A frame sent from the server to the caller.
#[derive(Debug)]
pub enum Frame {
    /// An encoded response message.
    Message(Bytes),
    /// The terminal status. Nothing follows it.
    Status(Status),
}

/// A stream of raw request bytes for one call.
pub struct RpcInbound {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, Status>> + Send>>,
}

impl RpcInbound {
    /// Wrap any stream of raw request frames.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, Status>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Create from a channel receiver. The stream ends when every sender is dropped.
    pub fn from_receiver(mut rx: mpsc::UnboundedReceiver<Bytes>) -> Self {
        let inner = stream! {
            while let Some(frame) = rx.recv().await {
                yield Ok(frame);
            }
        };

        Self::from_stream(inner)
    }
}

impl Stream for RpcInbound {
    type Item = Result<Bytes, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// A sink for frames going back to the caller.
#[derive(Debug, Clone)]
pub struct RpcOutbound {
    tx: mpsc::UnboundedSender<Frame>,
}

impl RpcOutbound {
    pub fn new(tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self { tx }
    }

    fn send(&self, frame: Frame) -> Result<(), RpcSendError> {
        self.tx.send(frame).map_err(|_| RpcSendError::Closed)
    }
}

/// Untyped reader over a call's inbound frames.
///
/// Clones share the same underlying stream, so a message read by a hook is
/// not seen again by the handler.
#[derive(Clone)]
pub struct CallReader {
    inbound: Arc<Mutex<RpcInbound>>,
}

impl CallReader {
    pub fn new(inbound: RpcInbound) -> Self {
        Self {
            inbound: Arc::new(Mutex::new(inbound)),
        }
    }

    /// Read the next raw frame. `Ok(None)` means the caller is done sending.
    pub async fn read_raw(&self) -> Result<Option<Bytes>, Status> {
        let mut inbound = self.inbound.lock().await;
        inbound.next().await.transpose()
    }

    /// View this reader as a reader of decoded `Req` messages.
    pub fn typed<Req>(&self) -> ServerCallReader<Req> {
        ServerCallReader::new(self.clone())
    }
}

/// A reader that decodes request messages of type `Req`.
pub struct ServerCallReader<Req> {
    raw: CallReader,
    _marker: PhantomData<fn() -> Req>,
}

impl<Req> ServerCallReader<Req> {
    pub fn new(raw: CallReader) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }
}

impl<Req> ServerCallReader<Req>
where
    Req: Message + Default,
{
    /// Read the next request message.
    ///
    /// Returns `Ok(None)` once the caller has stopped sending.
    pub async fn read(&self) -> Result<Option<Req>, CallError> {
        match self.raw.read_raw().await.map_err(CallError::Inbound)? {
            Some(bytes) => Ok(Some(Req::decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// Convert into a stream of decoded requests.
    ///
    /// The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Req, Status>> + Send
    where
        Req: Send + 'static,
    {
        stream! {
            loop {
                match self.raw.read_raw().await {
                    Ok(Some(bytes)) => match Req::decode(bytes) {
                        Ok(msg) => yield Ok(msg),
                        Err(e) => {
                            yield Err(Status::invalid_argument(format!(
                                "failed to decode request: {e}"
                            )));
                            break;
                        }
                    },
                    Ok(None) => break,
                    Err(status) => {
                        yield Err(status);
                        break;
                    }
                }
            }
        }
    }
}

/// Writer for a call's responses and terminal status.
///
/// Clones share the same call. Finishing is idempotent: only the first
/// `finish*` sends anything, later ones return `Ok(false)`.
#[derive(Clone)]
pub struct ServerCallWriter {
    inner: Arc<WriterInner>,
}

struct WriterInner {
    outbound: RpcOutbound,
    context: ServerContext,
    finished: AtomicBool,
}

impl ServerCallWriter {
    pub fn new(outbound: RpcOutbound, context: ServerContext) -> Self {
        Self {
            inner: Arc::new(WriterInner {
                outbound,
                context,
                finished: AtomicBool::new(false),
            }),
        }
    }

    /// Send one response message.
    pub fn write<M: Message>(&self, msg: &M) -> Result<(), RpcSendError> {
        self.write_raw(Bytes::from(msg.encode_to_vec()))
    }

    /// Send one already encoded response message.
    pub fn write_raw(&self, bytes: Bytes) -> Result<(), RpcSendError> {
        if self.is_finished() {
            return Err(RpcSendError::Finished);
        }
        self.inner.outbound.send(Frame::Message(bytes))
    }

    /// Finish the call with the context's current status and no payload.
    pub fn finish(&self) -> Result<bool, RpcSendError> {
        self.finish_raw(None)
    }

    /// Send a final response, then finish with the context's current status.
    pub fn finish_with<M: Message>(&self, msg: &M) -> Result<bool, RpcSendError> {
        self.finish_raw(Some(Bytes::from(msg.encode_to_vec())))
    }

    /// Finish the call, optionally sending one last encoded response first.
    ///
    /// Returns `Ok(true)` if this call finished it, `Ok(false)` if it was
    /// already finished.
    pub fn finish_raw(&self, response: Option<Bytes>) -> Result<bool, RpcSendError> {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            tracing::debug!(
                call_id = %self.inner.context.call_id(),
                method = %self.inner.context.method(),
                "Call already finished, ignoring finish"
            );
            return Ok(false);
        }

        if let Some(bytes) = response {
            self.inner.outbound.send(Frame::Message(bytes))?;
        }
        self.inner
            .outbound
            .send(Frame::Status(self.inner.context.final_status()))?;
        Ok(true)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    pub fn context(&self) -> &ServerContext {
        &self.inner.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;
    use tonic::metadata::MetadataMap;

    fn writer() -> (ServerCallWriter, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = ServerContext::new("/pkg.Svc/Echo", MetadataMap::new(), None);
        (ServerCallWriter::new(RpcOutbound::new(tx), ctx), rx)
    }

    #[test]
    fn test_finish_is_idempotent() {
        let (writer, mut rx) = writer();

        assert!(writer.finish_raw(Some(Bytes::from_static(b"hi"))).unwrap());
        assert!(!writer.finish().unwrap());

        assert!(matches!(rx.try_recv(), Ok(Frame::Message(b)) if b == "hi"));
        assert!(matches!(rx.try_recv(), Ok(Frame::Status(s)) if s.code() == Code::Ok));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_write_after_finish_rejected() {
        let (writer, _rx) = writer();
        writer.finish().unwrap();

        let result = writer.write_raw(Bytes::from_static(b"late"));
        assert!(matches!(result, Err(RpcSendError::Finished)));
    }

    #[test]
    fn test_finish_uses_context_status() {
        let (writer, mut rx) = writer();
        writer
            .context()
            .set_status(Status::permission_denied("no access"));
        writer.finish().unwrap();

        match rx.try_recv() {
            Ok(Frame::Status(status)) => {
                assert_eq!(status.code(), Code::PermissionDenied);
                assert_eq!(status.message(), "no access");
            }
            other => panic!("expected status frame, got {other:?}"),
        }
    }

    #[test]
    fn test_write_to_closed_peer() {
        let (writer, rx) = writer();
        drop(rx);

        let result = writer.write_raw(Bytes::from_static(b"hi"));
        assert!(matches!(result, Err(RpcSendError::Closed)));
    }

    #[tokio::test]
    async fn test_reader_returns_none_when_sender_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = CallReader::new(RpcInbound::from_receiver(rx));

        tx.send(Bytes::from_static(b"one")).unwrap();
        drop(tx);

        assert_eq!(reader.read_raw().await.unwrap(), Some(Bytes::from_static(b"one")));
        assert_eq!(reader.read_raw().await.unwrap(), None);
    }
}
