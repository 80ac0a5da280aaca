//! In-process transport backed by tokio channels.
//!
//! Useful for tests and for embedding a server in the same process as its
//! callers.
//!
//! # Example
//!
//! ```ignore
//! let (transport, client) = rpcdispatch::transport::memory::channel();
//! tokio::spawn(server.run(transport));
//!
//! let mut call = client.call("/pkg.EchoService/Echo")?;
//! call.send(&EchoRequest { message: "hi".into() })?;
//! call.close_send();
//! let (responses, status) = call.collect::<EchoResponse>().await?;
//! ```

use bytes::Bytes;
use prost::Message;
use std::time::Instant;
use tokio::sync::mpsc;
use tonic::Status;
use tonic::metadata::MetadataMap;

use super::{CallHandle, RpcEvent, Transport};
use crate::connection::{Frame, RpcInbound, RpcOutbound};
use crate::error::{RpcSendError, TransportError};

type EventResult = Result<RpcEvent, TransportError>;

/// Create a connected transport/client pair.
pub fn channel() -> (MemoryTransport, MemoryClient) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryTransport { rx }, MemoryClient { tx })
}

/// The server side of an in-process channel.
///
/// Closes once every [`MemoryClient`] clone has been dropped.
pub struct MemoryTransport {
    rx: mpsc::UnboundedReceiver<EventResult>,
}

#[tonic::async_trait]
impl Transport for MemoryTransport {
    async fn next_event(&mut self) -> Result<Option<RpcEvent>, TransportError> {
        self.rx.recv().await.transpose()
    }
}

/// The calling side of an in-process channel.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    tx: mpsc::UnboundedSender<EventResult>,
}

impl MemoryClient {
    /// Start a call to `method` with no metadata and no deadline.
    pub fn call(&self, method: impl Into<String>) -> Result<ClientCall, RpcSendError> {
        self.call_with(method, MetadataMap::new(), None)
    }

    /// Start a call with request metadata and an optional deadline.
    pub fn call_with(
        &self,
        method: impl Into<String>,
        metadata: MetadataMap,
        deadline: Option<Instant>,
    ) -> Result<ClientCall, RpcSendError> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let event = RpcEvent {
            method: method.into(),
            metadata,
            deadline,
            call: CallHandle {
                inbound: RpcInbound::from_receiver(request_rx),
                outbound: RpcOutbound::new(response_tx),
            },
        };
        self.tx.send(Ok(event)).map_err(|_| RpcSendError::Closed)?;

        Ok(ClientCall {
            requests: Some(request_tx),
            responses: response_rx,
            status: None,
        })
    }

    /// Make a unary call: send one request, close, and collect the outcome.
    pub async fn unary<Req, Resp>(
        &self,
        method: impl Into<String>,
        request: &Req,
    ) -> anyhow::Result<(Option<Resp>, Status)>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let mut call = self.call(method)?;
        call.send(request)?;
        call.close_send();

        let (mut responses, status) = call.collect::<Resp>().await?;
        Ok((responses.pop(), status))
    }

    /// Make the server's next wait for an event fail.
    pub fn fail(&self, reason: impl Into<String>) -> Result<(), RpcSendError> {
        self.tx
            .send(Err(TransportError::Wait(reason.into())))
            .map_err(|_| RpcSendError::Closed)
    }
}

/// One in-flight call, seen from the caller.
pub struct ClientCall {
    requests: Option<mpsc::UnboundedSender<Bytes>>,
    responses: mpsc::UnboundedReceiver<Frame>,
    status: Option<Status>,
}

impl ClientCall {
    /// Send a request message.
    pub fn send<M: Message>(&self, msg: &M) -> Result<(), RpcSendError> {
        let tx = self.requests.as_ref().ok_or(RpcSendError::Finished)?;
        tx.send(Bytes::from(msg.encode_to_vec()))
            .map_err(|_| RpcSendError::Closed)
    }

    /// Signal that no more requests will be sent.
    pub fn close_send(&mut self) {
        self.requests = None;
    }

    /// Receive the next response message.
    ///
    /// Returns `Ok(None)` once the terminal status has arrived.
    pub async fn message<M: Message + Default>(&mut self) -> Result<Option<M>, prost::DecodeError> {
        if self.status.is_some() {
            return Ok(None);
        }

        match self.responses.recv().await {
            Some(Frame::Message(bytes)) => Ok(Some(M::decode(bytes)?)),
            Some(Frame::Status(status)) => {
                self.status = Some(status);
                Ok(None)
            }
            None => {
                self.status = Some(Status::unavailable("call dropped without a status"));
                Ok(None)
            }
        }
    }

    /// Wait for the terminal status, discarding any unread messages.
    pub async fn status(&mut self) -> Status {
        while self.status.is_none() {
            match self.responses.recv().await {
                Some(Frame::Message(_)) => {}
                Some(Frame::Status(status)) => self.status = Some(status),
                None => {
                    self.status = Some(Status::unavailable("call dropped without a status"))
                }
            }
        }
        self.status
            .clone()
            .unwrap_or_else(|| Status::unknown("missing status"))
    }

    /// Read every remaining response and the terminal status.
    pub async fn collect<M: Message + Default>(
        &mut self,
    ) -> Result<(Vec<M>, Status), prost::DecodeError> {
        let mut responses = Vec::new();
        while let Some(msg) = self.message::<M>().await? {
            responses.push(msg);
        }
        Ok((responses, self.status().await))
    }
}
