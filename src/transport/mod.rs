//! Call transport.
//!
//! The coordination layer only needs reliable, ordered, synchronous
//! request/response calls addressed by endpoint URIs. `Transport` is that
//! boundary; `InProcessNetwork` implements it by running every call in the
//! caller's thread, optionally pushing requests and replies through JSON so
//! that everything crossing it is known to be serializable.

mod in_process;
mod messages;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{SimResult, TransportError};
use crate::uri::{ConnectionId, EndpointUri, HostAddress};

pub use in_process::InProcessNetwork;
pub use messages::{
    EngineRequest, ManagementRequest, ModelRequest, ReflectionRequest, Reply, Request, SupervisionRequest,
};

/// Something that answers calls addressed to one endpoint URI.
pub trait Endpoint: Send + Sync {
    /// Handles one call. Errors travel back to the caller unchanged.
    ///
    /// # Errors
    ///
    /// Whatever the callee fails with.
    fn handle(&self, request: Request) -> SimResult<Reply>;
}

/// Synchronous remote invocation addressed by endpoint URIs.
pub trait Transport: Send + Sync {
    /// Delivers `request` to `endpoint` and blocks until it returns or fails.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::EndpointUnavailable` if nothing is bound at
    /// `endpoint`, or the callee's own error.
    fn invoke(&self, endpoint: &EndpointUri, request: Request) -> SimResult<Reply>;

    /// Returns true if something is bound at `endpoint`.
    fn is_bound(&self, endpoint: &EndpointUri) -> bool;

    /// Address of the naming/reflection facility of `host`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::HostNotFound` if `host` is not registered.
    fn locate_host(&self, host: &HostAddress) -> SimResult<EndpointUri>;
}

/// An open handle on one endpoint.
///
/// Calls fail with `TransportError::ConnectionClosed` once disconnected.
pub struct Connection {
    id: ConnectionId,
    endpoint: EndpointUri,
    transport: Arc<dyn Transport>,
    open: AtomicBool,
}

impl Connection {
    /// Connects to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::EndpointUnavailable` if nothing is bound there.
    pub fn open(transport: &Arc<dyn Transport>, endpoint: EndpointUri) -> SimResult<Self> {
        if !transport.is_bound(&endpoint) {
            return Err(TransportError::EndpointUnavailable { endpoint }.into());
        }
        let id = ConnectionId::new();
        debug!(connection = %id, endpoint = %endpoint, "Connection opened");
        Ok(Self {
            id,
            endpoint,
            transport: Arc::clone(transport),
            open: AtomicBool::new(true),
        })
    }

    /// Identifier of this connection.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Address of the remote endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &EndpointUri {
        &self.endpoint
    }

    /// Returns true until `disconnect` is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Performs one call on the remote endpoint.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionClosed` after `disconnect`, or
    /// whatever the transport or the callee fails with.
    pub fn call(&self, request: Request) -> SimResult<Reply> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed {
                endpoint: self.endpoint.clone(),
            }
            .into());
        }
        self.transport.invoke(&self.endpoint, request)
    }

    /// Closes the connection. Idempotent.
    pub fn disconnect(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!(connection = %self.id, endpoint = %self.endpoint, "Connection closed");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
