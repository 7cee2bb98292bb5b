//! Host-resident simulation units.
//!
//! A unit owns one model and its engine and serves them on three endpoints:
//! model access, engine access and run management. Units are addressed by
//! their model URI; the endpoints of a unit are bound at
//! `{host}/{model}/{role}`.

mod atomic;
mod coordinator;
mod host;

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::architecture::ArchitectureDescriptor;
use crate::config::RunParameters;
use crate::error::{PreconditionError, SimResult, TransportError};
use crate::report::SimulationReport;
use crate::time::{SimDuration, SimTime};
use crate::transport::{
    Endpoint, EngineRequest, InProcessNetwork, ManagementRequest, ModelRequest, Reply, Request,
};
use crate::uri::{EndpointRole, EndpointUri, HostAddress, ModelUri};

pub use atomic::AtomicSimulationUnit;
pub use coordinator::CoordinatorUnit;
pub use host::{Host, HostedUnit};

/// Run-management surface, offered by every unit.
///
/// Implemented by both unit kinds and by the outbound `RunManagementPort`, so
/// a supervisor or parent coordinator drives a local or remote unit alike.
#[allow(missing_docs)]
pub trait RunManagement: Send + Sync {
    fn uri(&self) -> SimResult<ModelUri>;

    /// Builds the unit (and, for a coordinator, its whole subtree) for
    /// `architecture`, whose root must be `uri`.
    fn construct_simulator(&self, uri: &ModelUri, architecture: &ArchitectureDescriptor) -> SimResult<()>;

    fn is_simulator_set(&self) -> SimResult<bool>;

    /// Makes this unit the session root, reporting to the supervisor at `address`.
    fn connect_supervision(&self, address: &EndpointUri) -> SimResult<()>;

    fn set_simulation_run_parameters(&self, params: &RunParameters) -> SimResult<()>;

    /// Initialises the engines at `start` (zero if omitted) for a run of `duration`.
    fn initialise_simulation(&self, start: Option<SimTime>, duration: SimDuration) -> SimResult<()>;

    /// Runs from `start` for `duration` as fast as possible. Blocks until done.
    fn do_standalone_simulation(&self, start: SimTime, duration: SimDuration) -> SimResult<()>;

    /// Starts a real-time run where `sim_start` happens at `wall_start`.
    fn start_real_time_simulation(
        &self,
        wall_start: DateTime<Utc>,
        sim_start: SimTime,
        duration: SimDuration,
    ) -> SimResult<()>;

    fn is_simulation_running(&self) -> SimResult<bool>;

    /// Asks the run to stop at its next checkpoint.
    fn stop_simulation(&self) -> SimResult<()>;

    /// Stops and ends whatever run is in progress.
    fn finalise_simulation(&self) -> SimResult<()>;

    fn get_final_report(&self) -> SimResult<SimulationReport>;

    /// Tears the unit down so it can be constructed again. Idempotent.
    fn reinitialise(&self) -> SimResult<()>;
}

/// Model-access and engine-access handlers of a unit.
pub(crate) trait UnitService: RunManagement {
    fn handle_model(&self, request: ModelRequest) -> SimResult<Reply>;

    fn handle_engine(&self, request: EngineRequest) -> SimResult<Reply>;
}

/// Serves one run-management call on `unit`.
pub(crate) fn dispatch_management(unit: &dyn RunManagement, request: ManagementRequest) -> SimResult<Reply> {
    let reply = match request {
        ManagementRequest::Uri => Reply::Model(unit.uri()?),
        ManagementRequest::ConstructSimulator { uri, architecture } => {
            unit.construct_simulator(&uri, &architecture)?;
            Reply::Unit
        }
        ManagementRequest::IsSimulatorSet => Reply::Bool(unit.is_simulator_set()?),
        ManagementRequest::ConnectSupervision { address } => {
            unit.connect_supervision(&address)?;
            Reply::Unit
        }
        ManagementRequest::SetSimulationRunParameters { params } => {
            unit.set_simulation_run_parameters(&params)?;
            Reply::Unit
        }
        ManagementRequest::InitialiseSimulation { start, duration } => {
            unit.initialise_simulation(start, duration)?;
            Reply::Unit
        }
        ManagementRequest::DoStandaloneSimulation { start, duration } => {
            unit.do_standalone_simulation(start, duration)?;
            Reply::Unit
        }
        ManagementRequest::StartRealTimeSimulation {
            wall_start,
            sim_start,
            duration,
        } => {
            unit.start_real_time_simulation(wall_start, sim_start, duration)?;
            Reply::Unit
        }
        ManagementRequest::IsSimulationRunning => Reply::Bool(unit.is_simulation_running()?),
        ManagementRequest::StopSimulation => {
            unit.stop_simulation()?;
            Reply::Unit
        }
        ManagementRequest::FinaliseSimulation => {
            unit.finalise_simulation()?;
            Reply::Unit
        }
        ManagementRequest::GetFinalReport => Reply::Report(unit.get_final_report()?),
        ManagementRequest::Reinitialise => {
            unit.reinitialise()?;
            Reply::Unit
        }
    };
    Ok(reply)
}

/// One of the three endpoints of a unit.
struct UnitEndpoint<U> {
    address: EndpointUri,
    role: EndpointRole,
    unit: Weak<U>,
}

impl<U: UnitService + 'static> Endpoint for UnitEndpoint<U> {
    fn handle(&self, request: Request) -> SimResult<Reply> {
        let unit = self.unit.upgrade().ok_or_else(|| TransportError::EndpointUnavailable {
            endpoint: self.address.clone(),
        })?;
        match (self.role, request) {
            (EndpointRole::ModelAccess, Request::Model(r)) => unit.handle_model(r),
            (EndpointRole::EngineAccess, Request::Engine(r)) => unit.handle_engine(r),
            (EndpointRole::RunManagement, Request::Management(r)) => dispatch_management(unit.as_ref(), r),
            (_, other) => Err(TransportError::UnsupportedRequest {
                endpoint: self.address.clone(),
                request: other.surface().to_string(),
            }
            .into()),
        }
    }
}

const UNIT_ROLES: [EndpointRole; 3] = [
    EndpointRole::ModelAccess,
    EndpointRole::EngineAccess,
    EndpointRole::RunManagement,
];

/// Binds the three endpoints of `unit`. All or none are bound.
pub(crate) fn bind_unit<U: UnitService + 'static>(
    network: &InProcessNetwork,
    host: &HostAddress,
    uri: &ModelUri,
    unit: &Arc<U>,
) -> SimResult<()> {
    for (i, role) in UNIT_ROLES.iter().enumerate() {
        let address = EndpointUri::for_unit(host, uri, *role);
        let endpoint = Arc::new(UnitEndpoint {
            address: address.clone(),
            role: *role,
            unit: Arc::downgrade(unit),
        });
        if let Err(e) = network.bind(address, endpoint) {
            for bound in &UNIT_ROLES[..i] {
                network.unbind(&EndpointUri::for_unit(host, uri, *bound))?;
            }
            return Err(e);
        }
    }
    debug!(host = %host, uri = %uri, "Unit endpoints bound");
    Ok(())
}

/// Unbinds the three endpoints of the unit of `uri`.
pub(crate) fn unbind_unit(network: &InProcessNetwork, host: &HostAddress, uri: &ModelUri) -> SimResult<()> {
    for role in UNIT_ROLES {
        network.unbind(&EndpointUri::for_unit(host, uri, role))?;
    }
    debug!(host = %host, uri = %uri, "Unit endpoints unbound");
    Ok(())
}

/// Times of the run a unit has been initialised for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Session {
    pub(crate) start: SimTime,
    pub(crate) end: SimTime,
}

impl Session {
    pub(crate) fn new(start: SimTime, duration: SimDuration) -> SimResult<Self> {
        if !start.is_finite() || duration.value().is_nan() || duration.value() < 0.0 {
            return Err(PreconditionError::InvalidArgument {
                reason: format!("invalid run from {start} lasting {duration}"),
            }
            .into());
        }
        Ok(Self {
            start,
            end: start + duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_rejects_negative_durations() {
        assert!(Session::new(SimTime::ZERO, SimDuration::new(-1.0)).is_err());
        assert!(Session::new(SimTime::INFINITY, SimDuration::new(1.0)).is_err());
        let session = Session::new(SimTime::new(2.0), SimDuration::new(24.0)).unwrap();
        assert_eq!(session.end, SimTime::new(26.0));
        assert_eq!(
            Session::new(SimTime::ZERO, SimDuration::INFINITY).unwrap().end,
            SimTime::INFINITY
        );
    }
}
