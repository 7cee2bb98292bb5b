//! Proxy for an atomic engine held by another unit.

use std::fmt;

use crate::engine::EngineOps;
use crate::error::SimResult;
use crate::report::SimulationReport;
use crate::time::{SimDuration, SimTime};
use crate::transport::{Connection, EngineRequest, Reply, Request};
use crate::uri::{EndpointUri, ModelUri};

use super::{call_unit, verify_uri};

/// Engine-access calls shared by the engine wrappers.
pub(crate) struct EnginePort {
    pub(crate) connection: Connection,
    pub(crate) uri: ModelUri,
}

impl EnginePort {
    pub(crate) fn new(connection: Connection, uri: ModelUri) -> SimResult<Self> {
        verify_uri(&connection, Request::Engine(EngineRequest::Uri), &uri)?;
        Ok(Self { connection, uri })
    }

    pub(crate) fn call(&self, request: EngineRequest) -> SimResult<Reply> {
        self.connection.call(Request::Engine(request))
    }

    pub(crate) fn ack(&self, request: EngineRequest) -> SimResult<()> {
        call_unit(&self.connection, Request::Engine(request))
    }

    pub(crate) fn time(&self, request: EngineRequest) -> SimResult<SimTime> {
        self.call(request)?.into_time()
    }

    /// Simulated time at the remote model right now.
    pub(crate) fn current_time(&self) -> SimResult<SimTime> {
        self.time(EngineRequest::CurrentTime)
    }
}

macro_rules! forward_engine_ops {
    () => {
        fn uri(&self) -> SimResult<ModelUri> {
            self.port.call(EngineRequest::Uri)?.into_model()
        }

        fn set_parent(&mut self, address: &EndpointUri) -> SimResult<()> {
            self.port.ack(EngineRequest::SetParent {
                address: address.clone(),
            })
        }

        fn initialise(&mut self, start: SimTime) -> SimResult<SimTime> {
            self.port.time(EngineRequest::Initialise { start })
        }

        fn time_of_last_event(&self) -> SimResult<SimTime> {
            self.port.time(EngineRequest::TimeOfLastEvent)
        }

        fn time_of_next_event(&self) -> SimResult<SimTime> {
            self.port.time(EngineRequest::TimeOfNextEvent)
        }

        fn next_time_advance(&self) -> SimResult<SimDuration> {
            self.port.call(EngineRequest::NextTimeAdvance)?.into_duration()
        }

        fn produce_output(&mut self, time: SimTime) -> SimResult<()> {
            self.port.ack(EngineRequest::ProduceOutput { time })
        }

        fn internal_event_step(&mut self, time: SimTime) -> SimResult<SimTime> {
            self.port.time(EngineRequest::InternalEventStep { time })
        }

        fn external_event_step(&mut self, time: SimTime) -> SimResult<SimTime> {
            self.port.time(EngineRequest::ExternalEventStep { time })
        }

        fn end_simulation(&mut self, time: SimTime) -> SimResult<()> {
            self.port.ack(EngineRequest::EndSimulation { time })
        }

        fn report(&self) -> SimResult<SimulationReport> {
            self.port.call(EngineRequest::Report)?.into_report()
        }

        fn connection(&self) -> Option<&Connection> {
            Some(&self.port.connection)
        }
    };
}

pub(crate) use forward_engine_ops;

/// Stands for the atomic engine of another unit.
pub struct SimulatorWrapper {
    port: EnginePort,
}

impl SimulatorWrapper {
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

    /// Simulated time at the wrapped model right now: the real-time clock
    /// during a real-time run, the time of last event otherwise.
    ///
    /// # Errors
    ///
    /// Whatever the remote unit fails with.
    pub fn current_time(&self) -> SimResult<SimTime> {
        self.port.current_time()
    }
}

impl fmt::Debug for SimulatorWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatorWrapper")
            .field("uri", &self.port.uri)
            .field("connection", &self.port.connection)
            .finish()
    }
}

impl EngineOps for SimulatorWrapper {
    forward_engine_ops!();
}
