//! Supervisor: bootstraps a unit tree from an architecture and drives runs.
//!
//! The supervisor owns one supervision endpoint. The root unit of a run
//! sends its final report there once the run ends. Accepting it moves a
//! running supervisor to idle; the report is queued on a bounded channel
//! and picked up by `wait_for_report`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::architecture::ArchitectureDescriptor;
use crate::bootstrap::{connect_component, connect_management_port, ComponentHandle};
use crate::config::{RunParameters, SupervisorConfig};
use crate::error::{lock_poisoned, SimError, SimResult, TransportError};
use crate::report::SimulationReport;
use crate::time::{SimDuration, SimTime};
use crate::transport::{Endpoint, InProcessNetwork, Reply, Request, SupervisionRequest, Transport};
use crate::unit::RunManagement;
use crate::uri::{EndpointRole, EndpointUri, HostAddress, ModelUri, SessionId};
use crate::wrapper::RunManagementPort;

/// Lifecycle of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No tree is connected.
    Disconnected,
    /// Connected to the root host, construction in progress.
    RootConnected,
    /// The tree is built and no run has started.
    SimulatorBuilt,
    /// A run is in progress.
    Running,
    /// The last run ended.
    Idle,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::RootConnected => "root-connected",
            Self::SimulatorBuilt => "simulator-built",
            Self::Running => "running",
            Self::Idle => "idle",
        };
        f.write_str(name)
    }
}

struct RootLink {
    handle: ComponentHandle,
    management: RunManagementPort,
}

impl RootLink {
    fn release(&self) -> SimResult<()> {
        let reinitialised = self.management.reinitialise();
        self.management.disconnect();
        if self.handle.is_coupled() {
            self.handle.uninstall()?;
        }
        self.handle.disconnect();
        reinitialised
    }
}

/// Supervision endpoint: accepts final reports and nothing else.
struct SupervisionEndpoint {
    address: EndpointUri,
    reports: Sender<SimulationReport>,
    state: Arc<Mutex<SupervisorState>>,
}

impl SupervisionEndpoint {
    /// A final report ends the run in progress.
    fn run_ended(&self) -> SimResult<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned("supervisor state"))?;
        if *state == SupervisorState::Running {
            debug!(supervisor = %self.address, from = %*state, to = %SupervisorState::Idle, "Supervisor state change");
            *state = SupervisorState::Idle;
        }
        Ok(())
    }
}

impl Endpoint for SupervisionEndpoint {
    fn handle(&self, request: Request) -> SimResult<Reply> {
        match request {
            Request::Supervision(SupervisionRequest::AcceptSimulationReport { report }) => {
                let model = report.model.clone();
                match self.reports.try_send(report) {
                    Ok(()) => debug!(supervisor = %self.address, uri = %model, "Final report accepted"),
                    Err(TrySendError::Full(_)) => {
                        warn!(supervisor = %self.address, uri = %model, "Report queue full, report dropped");
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        return Err(TransportError::EndpointUnavailable {
                            endpoint: self.address.clone(),
                        }
                        .into())
                    }
                }
                self.run_ended()?;
                Ok(Reply::Unit)
            }
            other => Err(TransportError::UnsupportedRequest {
                endpoint: self.address.clone(),
                request: other.surface().to_string(),
            }
            .into()),
        }
    }
}

/// Drives construct-and-run sessions of one architecture at a time.
pub struct Supervisor {
    address: EndpointUri,
    network: Arc<InProcessNetwork>,
    transport: Arc<dyn Transport>,
    config: SupervisorConfig,
    reports: Receiver<SimulationReport>,
    state: Arc<Mutex<SupervisorState>>,
    architecture: Mutex<Option<ArchitectureDescriptor>>,
    root: Mutex<Option<Arc<RootLink>>>,
    session: Mutex<Option<SessionId>>,
}

impl Supervisor {
    /// Creates a supervisor whose supervision endpoint lives at `host`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::AlreadyBound` if another supervisor uses `host`.
    pub fn new(network: &Arc<InProcessNetwork>, host: impl Into<HostAddress>, config: SupervisorConfig) -> SimResult<Self> {
        let host = host.into();
        let address = EndpointUri::new(format!("{host}/{}", EndpointRole::Supervision));
        let (tx, rx) = bounded(config.report_queue_capacity.max(1));
        let state = Arc::new(Mutex::new(SupervisorState::Disconnected));
        network.bind(
            address.clone(),
            Arc::new(SupervisionEndpoint {
                address: address.clone(),
                reports: tx,
                state: Arc::clone(&state),
            }),
        )?;
        info!(supervisor = %address, "Supervisor created");
        Ok(Self {
            address,
            network: Arc::clone(network),
            transport: network.transport(),
            config,
            reports: rx,
            state,
            architecture: Mutex::new(None),
            root: Mutex::new(None),
            session: Mutex::new(None),
        })
    }

    /// Address of the supervision endpoint.
    #[must_use]
    pub const fn address(&self) -> &EndpointUri {
        &self.address
    }

    /// Settings of this supervisor.
    #[must_use]
    pub const fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Current lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the supervisor is poisoned.
    pub fn state(&self) -> SimResult<SupervisorState> {
        Ok(*self.lock_state()?)
    }

    /// Identifier of the current session, once a tree is built.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the supervisor is poisoned.
    pub fn session(&self) -> SimResult<Option<SessionId>> {
        Ok(*self.session.lock().map_err(|_| lock_poisoned("supervisor session"))?)
    }

    /// The architecture currently built.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the supervisor is poisoned.
    pub fn architecture(&self) -> SimResult<Option<ArchitectureDescriptor>> {
        Ok(self
            .architecture
            .lock()
            .map_err(|_| lock_poisoned("supervisor architecture"))?
            .clone())
    }

    fn lock_state(&self) -> SimResult<MutexGuard<'_, SupervisorState>> {
        self.state.lock().map_err(|_| lock_poisoned("supervisor state"))
    }

    fn set_state(&self, state: SupervisorState) -> SimResult<()> {
        let mut current = self.lock_state()?;
        if *current != state {
            debug!(supervisor = %self.address, from = %*current, to = %state, "Supervisor state change");
        }
        *current = state;
        Ok(())
    }

    fn require(&self, operation: &str, allowed: &[SupervisorState]) -> SimResult<SupervisorState> {
        let state = self.state()?;
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(SimError::invalid_state("supervisor", state.to_string(), operation))
        }
    }

    fn root(&self) -> SimResult<Arc<RootLink>> {
        self.root
            .lock()
            .map_err(|_| lock_poisoned("supervisor root"))?
            .clone()
            .ok_or_else(|| SimError::invalid_state("supervisor", SupervisorState::Disconnected.to_string(), "root"))
    }

    /// URI of the root model of the built tree.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when no tree is connected.
    pub fn root_uri(&self) -> SimResult<ModelUri> {
        Ok(self.root()?.management.model_uri().clone())
    }

    /// Connects to the root of `architecture` and has it construct the whole
    /// unit tree.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless the supervisor is disconnected,
    /// or whatever construction fails with; the supervisor is then
    /// disconnected again.
    pub fn construct_simulator(&self, architecture: ArchitectureDescriptor) -> SimResult<()> {
        self.require("construct_simulator", &[SupervisorState::Disconnected])?;
        let descriptor = architecture.root_descriptor()?.clone();
        let handle = connect_component(&self.transport, &descriptor)?;
        let management = match connect_management_port(&handle, &descriptor.uri) {
            Ok(port) => port,
            Err(e) => {
                if handle.is_coupled() {
                    handle.uninstall()?;
                }
                handle.disconnect();
                return Err(e);
            }
        };
        let root = Arc::new(RootLink { handle, management });
        self.set_state(SupervisorState::RootConnected)?;
        info!(supervisor = %self.address, root = %descriptor.uri, host = %descriptor.host, "Root connected");

        let built = root
            .management
            .connect_supervision(&self.address)
            .and_then(|()| root.management.construct_simulator(&descriptor.uri, &architecture));
        if let Err(e) = built {
            warn!(supervisor = %self.address, error = %e, "Construction failed");
            if let Err(release) = root.release() {
                warn!(supervisor = %self.address, error = %release, "Root teardown failed");
            }
            self.set_state(SupervisorState::Disconnected)?;
            return Err(e);
        }

        let session = SessionId::new();
        *self.root.lock().map_err(|_| lock_poisoned("supervisor root"))? = Some(root);
        *self
            .architecture
            .lock()
            .map_err(|_| lock_poisoned("supervisor architecture"))? = Some(architecture);
        *self.session.lock().map_err(|_| lock_poisoned("supervisor session"))? = Some(session);
        self.set_state(SupervisorState::SimulatorBuilt)?;
        info!(supervisor = %self.address, session = %session, "Simulator built");
        Ok(())
    }

    /// Propagates `params` down the model tree.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless a tree is built and idle.
    pub fn set_simulation_run_parameters(&self, params: &RunParameters) -> SimResult<()> {
        self.require(
            "set_simulation_run_parameters",
            &[SupervisorState::SimulatorBuilt, SupervisorState::Idle],
        )?;
        self.root()?.management.set_simulation_run_parameters(params)
    }

    /// Initialises the tree at `start` (zero if omitted) for `duration`.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless a tree is built and idle.
    pub fn initialise_simulation(&self, start: Option<SimTime>, duration: SimDuration) -> SimResult<()> {
        self.require(
            "initialise_simulation",
            &[SupervisorState::SimulatorBuilt, SupervisorState::Idle],
        )?;
        self.root()?.management.initialise_simulation(start, duration)
    }

    /// Runs from `start` for `duration` as fast as possible and returns the
    /// final report.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless a tree is built and idle, or the
    /// failure of the run.
    pub fn do_standalone_simulation(&self, start: SimTime, duration: SimDuration) -> SimResult<SimulationReport> {
        self.require(
            "do_standalone_simulation",
            &[SupervisorState::SimulatorBuilt, SupervisorState::Idle],
        )?;
        let root = self.root()?;
        self.drain_reports();
        self.set_state(SupervisorState::Running)?;
        let outcome = root.management.do_standalone_simulation(start, duration);
        self.set_state(SupervisorState::Idle)?;
        outcome?;
        match self.reports.try_recv() {
            Ok(report) => Ok(report),
            Err(_) => root.management.get_final_report(),
        }
    }

    /// Starts a real-time run after the configured start delay. Returns the
    /// wall-clock instant at which `start` happens.
    ///
    /// # Errors
    ///
    /// Returns a precondition error unless a tree is built and idle, or if
    /// the architecture is not real-time.
    pub fn start_real_time_simulation(&self, start: SimTime, duration: SimDuration) -> SimResult<DateTime<Utc>> {
        self.require(
            "start_real_time_simulation",
            &[SupervisorState::SimulatorBuilt, SupervisorState::Idle],
        )?;
        let root = self.root()?;
        let delay = chrono::Duration::from_std(self.config.real_time.start_delay())
            .map_err(|e| SimError::internal(format!("start delay out of range: {e}")))?;
        let wall_start = Utc::now() + delay;
        self.drain_reports();
        self.set_state(SupervisorState::Running)?;
        if let Err(e) = root.management.start_real_time_simulation(wall_start, start, duration) {
            self.set_state(SupervisorState::Idle)?;
            return Err(e);
        }
        info!(supervisor = %self.address, wall_start = %wall_start, start = %start, "Real-time run requested");
        Ok(wall_start)
    }

    fn drain_reports(&self) {
        let stale = self.reports.try_iter().count();
        if stale > 0 {
            debug!(supervisor = %self.address, stale, "Discarded stale reports");
        }
    }

    /// Waits up to `timeout` for the final report of the run in progress.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the report channel is gone.
    pub fn wait_for_report(&self, timeout: Duration) -> SimResult<Option<SimulationReport>> {
        match self.reports.recv_timeout(timeout) {
            Ok(report) => Ok(Some(report)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SimError::internal("report channel disconnected")),
        }
    }

    /// Returns true while the root reports a run in progress.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when no tree is connected.
    pub fn is_simulation_running(&self) -> SimResult<bool> {
        let running = self.root()?.management.is_simulation_running()?;
        if !running && self.state()? == SupervisorState::Running {
            self.set_state(SupervisorState::Idle)?;
        }
        Ok(running)
    }

    /// Asks the run to stop at its next checkpoint.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when no tree is connected.
    pub fn stop_simulation(&self) -> SimResult<()> {
        info!(supervisor = %self.address, "Stop requested");
        self.root()?.management.stop_simulation()
    }

    /// Stops and ends whatever run is in progress.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when no tree is connected.
    pub fn finalise_simulation(&self) -> SimResult<()> {
        self.root()?.management.finalise_simulation()?;
        self.set_state(SupervisorState::Idle)
    }

    /// Final report of the last run, asked from the root.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::SimulationNotEnded` if no run has ended.
    pub fn final_report(&self) -> SimResult<SimulationReport> {
        self.root()?.management.get_final_report()
    }

    /// Tears the whole tree down. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the failure of the root's teardown; the supervisor is
    /// disconnected regardless.
    pub fn reinitialise(&self) -> SimResult<()> {
        let root = self.root.lock().map_err(|_| lock_poisoned("supervisor root"))?.take();
        *self
            .architecture
            .lock()
            .map_err(|_| lock_poisoned("supervisor architecture"))? = None;
        *self.session.lock().map_err(|_| lock_poisoned("supervisor session"))? = None;
        self.set_state(SupervisorState::Disconnected)?;
        self.drain_reports();
        match root {
            Some(root) => {
                info!(supervisor = %self.address, root = %root.management.model_uri(), "Tearing down tree");
                root.release()
            }
            None => Ok(()),
        }
    }

    /// Tears the current tree down and builds `architecture` from scratch.
    ///
    /// # Errors
    ///
    /// Whatever the teardown or the construction fails with.
    pub fn reset_architecture(&self, architecture: ArchitectureDescriptor) -> SimResult<()> {
        self.reinitialise()?;
        self.construct_simulator(architecture)
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("address", &self.address)
            .field("state", &self.state.lock().ok().map(|s| *s))
            .finish_non_exhaustive()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Err(e) = self.network.unbind(&self.address) {
            warn!(supervisor = %self.address, error = %e, "Failed to unbind supervision endpoint");
        }
    }
}
