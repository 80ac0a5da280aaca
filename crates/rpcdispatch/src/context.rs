use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tonic::metadata::MetadataMap;
use tonic::{Code, Status};
use uuid::Uuid;

/// Per-call context shared by hooks, the handler and the call's writer.
///
/// Cloning is cheap: all clones refer to the same call. The status starts
/// unset; the last value written before the call is finished is the one
/// sent to the caller.
#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    call_id: Uuid,
    method: String,
    metadata: MetadataMap,
    deadline: Option<Instant>,
    status: Mutex<Option<Status>>,
}

impl ServerContext {
    pub fn new(method: impl Into<String>, metadata: MetadataMap, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                call_id: Uuid::new_v4(),
                method: method.into(),
                metadata,
                deadline,
                status: Mutex::new(None),
            }),
        }
    }

    /// Unique identifier of this call, for log correlation.
    pub fn call_id(&self) -> Uuid {
        self.inner.call_id
    }

    /// The full method path the caller asked for.
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// Request metadata sent by the caller.
    pub fn metadata(&self) -> &MetadataMap {
        &self.inner.metadata
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Whether the caller's deadline has passed. Not enforced by the server.
    pub fn deadline_exceeded(&self) -> bool {
        self.inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// The status currently set on the call, if any.
    pub fn status(&self) -> Option<Status> {
        self.inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set the status the call will finish with. Overwrites any earlier value.
    pub fn set_status(&self, status: Status) {
        *self
            .inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(status);
    }

    /// The status to send when finishing: the current one, or OK when unset.
    pub(crate) fn final_status(&self) -> Status {
        self.status().unwrap_or_else(|| Status::new(Code::Ok, ""))
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("call_id", &self.inner.call_id)
            .field("method", &self.inner.method)
            .field("deadline", &self.inner.deadline)
            .field("status", &self.status())
            .finish()
    }
}
