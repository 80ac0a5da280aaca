use thiserror::Error;
use tonic::Status;

/// Errors that can occur while parsing full method paths.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RpcPathError {
    #[error("invalid method path: {0}")]
    Invalid(String),
}

/// Errors raised by the underlying transport while waiting for events.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The blocking wait for the next event failed.
    #[error("failed to wait for next event: {0}")]
    Wait(String),

    /// An I/O error from the transport.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors returned by the server's setup surface and run loop.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    /// A registered method path is malformed.
    #[error(transparent)]
    Path(#[from] RpcPathError),

    /// A callback was registered under a hook name that does not exist.
    #[error("unknown hook '{0}', expected 'before' or 'after'")]
    UnknownHook(String),

    /// A numeric call type code outside the four known shapes.
    #[error("unknown call type: {0}")]
    UnknownCallType(i32),

    /// The transport failed while the server was waiting for the next event.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors that can occur while writing to a call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RpcSendError {
    /// The call was already finished with a terminal status.
    #[error("call already finished")]
    Finished,

    /// The peer went away before the write could be delivered.
    #[error("call closed by peer")]
    Closed,
}

/// A failure while processing a single call.
///
/// Every variant is contained by the dispatcher and turned into an
/// `INTERNAL` status whose message is this error's `Display` output.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CallError {
    /// A hook or handler returned an error.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),

    /// A hook or handler panicked.
    #[error("handler panicked: {0}")]
    Panic(String),

    /// A request message could not be decoded.
    #[error("failed to decode request: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The inbound side of the call reported an error.
    #[error("failed to read request: {}", .0.message())]
    Inbound(Status),

    /// Writing a response failed.
    #[error(transparent)]
    Send(#[from] RpcSendError),
}

impl CallError {
    /// The status sent to the caller when this failure is contained.
    pub fn to_status(&self) -> Status {
        Status::internal(self.to_string())
    }
}
