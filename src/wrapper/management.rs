//! Outbound run-management port.

use chrono::{DateTime, Utc};

use crate::architecture::ArchitectureDescriptor;
use crate::config::RunParameters;
use crate::error::SimResult;
use crate::report::SimulationReport;
use crate::time::{SimDuration, SimTime};
use crate::transport::{Connection, ManagementRequest, Reply, Request};
use crate::unit::RunManagement;
use crate::uri::{EndpointUri, ModelUri};

use super::{call_unit, verify_uri};

/// Run-management surface of another unit.
#[derive(Debug)]
pub struct RunManagementPort {
    connection: Connection,
    uri: ModelUri,
}

impl RunManagementPort {
    /// Wraps the run-management endpoint behind `connection`.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint does not answer, or answers as another model.
    pub fn new(connection: Connection, uri: ModelUri) -> SimResult<Self> {
        verify_uri(&connection, Request::Management(ManagementRequest::Uri), &uri)?;
        Ok(Self { connection, uri })
    }

    /// URI the remote unit answered with when the port was opened.
    #[must_use]
    pub const fn model_uri(&self) -> &ModelUri {
        &self.uri
    }

    /// The underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Closes the underlying connection.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    fn call(&self, request: ManagementRequest) -> SimResult<Reply> {
        self.connection.call(Request::Management(request))
    }

    fn ack(&self, request: ManagementRequest) -> SimResult<()> {
        call_unit(&self.connection, Request::Management(request))
    }
}

impl RunManagement for RunManagementPort {
    fn uri(&self) -> SimResult<ModelUri> {
        self.call(ManagementRequest::Uri)?.into_model()
    }

    fn construct_simulator(&self, uri: &ModelUri, architecture: &ArchitectureDescriptor) -> SimResult<()> {
        self.ack(ManagementRequest::ConstructSimulator {
            uri: uri.clone(),
            architecture: architecture.clone(),
        })
    }

    fn is_simulator_set(&self) -> SimResult<bool> {
        self.call(ManagementRequest::IsSimulatorSet)?.into_bool()
    }

    fn connect_supervision(&self, address: &EndpointUri) -> SimResult<()> {
        self.ack(ManagementRequest::ConnectSupervision {
            address: address.clone(),
        })
    }

    fn set_simulation_run_parameters(&self, params: &RunParameters) -> SimResult<()> {
        self.ack(ManagementRequest::SetSimulationRunParameters { params: params.clone() })
    }

    fn initialise_simulation(&self, start: Option<SimTime>, duration: SimDuration) -> SimResult<()> {
        self.ack(ManagementRequest::InitialiseSimulation { start, duration })
    }

    fn do_standalone_simulation(&self, start: SimTime, duration: SimDuration) -> SimResult<()> {
        self.ack(ManagementRequest::DoStandaloneSimulation { start, duration })
    }

    fn start_real_time_simulation(
        &self,
        wall_start: DateTime<Utc>,
        sim_start: SimTime,
        duration: SimDuration,
    ) -> SimResult<()> {
        self.ack(ManagementRequest::StartRealTimeSimulation {
            wall_start,
            sim_start,
            duration,
        })
    }

    fn is_simulation_running(&self) -> SimResult<bool> {
        self.call(ManagementRequest::IsSimulationRunning)?.into_bool()
    }

    fn stop_simulation(&self) -> SimResult<()> {
        self.ack(ManagementRequest::StopSimulation)
    }

    fn finalise_simulation(&self) -> SimResult<()> {
        self.ack(ManagementRequest::FinaliseSimulation)
    }

    fn get_final_report(&self) -> SimResult<SimulationReport> {
        self.call(ManagementRequest::GetFinalReport)?.into_report()
    }

    fn reinitialise(&self) -> SimResult<()> {
        self.ack(ManagementRequest::Reinitialise)
    }
}
