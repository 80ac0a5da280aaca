//! The boundary between the dispatcher and whatever delivers calls.
//!
//! A [`Transport`] hands the server one [`RpcEvent`] per incoming call.
//! Credential negotiation, framing and wire encoding all live behind it.

pub mod memory;

use std::time::Instant;
use tonic::metadata::MetadataMap;

use crate::connection::{RpcInbound, RpcOutbound};
use crate::error::TransportError;

/// The I/O halves of a single call.
pub struct CallHandle {
    pub inbound: RpcInbound,
    pub outbound: RpcOutbound,
}

/// An incoming call, as delivered by the transport.
pub struct RpcEvent {
    /// Full method path, e.g. `/pkg.EchoService/Echo`.
    pub method: String,
    pub metadata: MetadataMap,
    pub deadline: Option<Instant>,
    pub call: CallHandle,
}

/// Source of incoming calls.
#[tonic::async_trait]
pub trait Transport: Send {
    /// Wait for the next incoming call.
    ///
    /// Returns `Ok(None)` once the transport is closed and no more calls
    /// will arrive. An `Err` is an infrastructure failure.
    async fn next_event(&mut self) -> Result<Option<RpcEvent>, TransportError>;
}
