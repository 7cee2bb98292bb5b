//! Proxy for a coordinator engine held by another unit.

use std::fmt;

use tracing::debug;

use crate::engine::{EngineOps, ParentNotifier};
use crate::error::SimResult;
use crate::report::SimulationReport;
use crate::time::{SimDuration, SimTime};
use crate::transport::{Connection, EngineRequest};
use crate::uri::{EndpointUri, ModelUri};

use super::simulator::{forward_engine_ops, EnginePort};

/// Stands for the coordinator engine of another unit.
///
/// Serves two directions: a parent coordinator drives a coupled child
/// through it, and a child unit notifies its parent through it.
pub struct CoordinatorWrapper {
    port: EnginePort,
}

impl CoordinatorWrapper {
    /// Wraps the engine-access endpoint behind `connection`.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint does not answer, or answers as another model.
    pub fn new(connection: Connection, uri: ModelUri) -> SimResult<Self> {
        Ok(Self {
            port: EnginePort::new(connection, uri)?,
        })
    }

    /// URI the wrapped engine answered with when the wrapper was created.
    #[must_use]
    pub const fn model_uri(&self) -> &ModelUri {
        &self.port.uri
    }

    /// Closes the underlying connection.
    pub fn disconnect(&self) {
        self.port.connection.disconnect();
    }
}

impl fmt::Debug for CoordinatorWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorWrapper")
            .field("uri", &self.port.uri)
            .field("connection", &self.port.connection)
            .finish()
    }
}

impl EngineOps for CoordinatorWrapper {
    forward_engine_ops!();
}

impl ParentNotifier for CoordinatorWrapper {
    fn has_received_external_events(&self, model: &ModelUri) -> SimResult<()> {
        debug!(parent = %self.port.uri, child = %model, "Notifying received external events");
        self.port
            .ack(EngineRequest::HasReceivedExternalEvents { model: model.clone() })
    }

    fn has_performed_external_events(&self, model: &ModelUri) -> SimResult<()> {
        self.port
            .ack(EngineRequest::HasPerformedExternalEvents { model: model.clone() })
    }

    fn run_completed(&self, model: &ModelUri) -> SimResult<()> {
        debug!(parent = %self.port.uri, child = %model, "Notifying run completion");
        self.port.ack(EngineRequest::RunCompleted { model: model.clone() })
    }
}
