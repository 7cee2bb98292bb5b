//! Coordinator unit: owns a coupled model and drives its children.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::architecture::{ArchitectureDescriptor, ModelDescriptor};
use crate::bootstrap::{
    connect_component, connect_management_port, connect_model_port, connect_parent_engine,
    connect_parent_model, connect_real_time_engine, connect_simulator_port, ComponentHandle,
};
use crate::config::{RealTimeConfig, RunParameters};
use crate::engine::{CoordinatorEngine, EngineOps, ExternalEventLedger, ParentNotifier};
use crate::error::{lock_poisoned, PreconditionError, SimResult};
use crate::event::Event;
use crate::model::{CoupledModel, ModelOps};
use crate::report::SimulationReport;
use crate::time::{RealTimeClock, SimDuration, SimTime};
use crate::transport::{
    Connection, EngineRequest, ModelRequest, Reply, Request, SupervisionRequest, Transport,
};
use crate::uri::{EndpointRole, EndpointUri, HostAddress, ModelUri};
use crate::wrapper::{CoordinatorWrapper, CoupledModelWrapper, RunManagementPort, SimulatorWrapper};

use super::{RunManagement, Session, UnitService};

fn lock<'a, T>(mutex: &'a Mutex<T>, context: &'static str) -> SimResult<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| lock_poisoned(context))
}

/// A connected child: its host handle and run-management port.
struct ChildLink {
    uri: ModelUri,
    handle: ComponentHandle,
    management: RunManagementPort,
}

impl ChildLink {
    /// Tears the child down. Best effort, failures are logged.
    fn release(self, owner: &ModelUri) {
        if let Err(e) = self.management.reinitialise() {
            warn!(uri = %owner, child = %self.uri, error = %e, "Child failed to reinitialise");
        }
        self.management.disconnect();
        if self.handle.is_coupled() {
            if let Err(e) = self.handle.uninstall() {
                warn!(uri = %owner, child = %self.uri, error = %e, "Child coordinator not uninstalled");
            }
        }
        self.handle.disconnect();
        debug!(uri = %owner, child = %self.uri, "Child released");
    }
}

#[derive(Default)]
struct ParentLinks {
    model: Option<CoupledModelWrapper>,
    engine: Option<Arc<CoordinatorWrapper>>,
}

/// State of the real-time run in progress, if any.
#[derive(Default)]
struct RealTimeState {
    clock: Option<RealTimeClock>,
    pending: BTreeSet<ModelUri>,
    engines: BTreeMap<ModelUri, SimulatorWrapper>,
    handles: Vec<ComponentHandle>,
}

impl RealTimeState {
    fn clear(&mut self) {
        for handle in self.handles.drain(..) {
            handle.disconnect();
        }
        self.engines.clear();
        self.pending.clear();
        self.clock = None;
    }
}

/// Unit owning one coupled model, its coordinator engine and one proxy set
/// per child.
pub struct CoordinatorUnit {
    uri: ModelUri,
    host: HostAddress,
    transport: Arc<dyn Transport>,
    config: RealTimeConfig,
    architecture: Mutex<Option<ArchitectureDescriptor>>,
    model: Mutex<Option<CoupledModel>>,
    engine: Mutex<Option<CoordinatorEngine>>,
    ledger: Arc<ExternalEventLedger>,
    children: Mutex<Vec<ChildLink>>,
    links: Mutex<ParentLinks>,
    supervision: Mutex<Option<Connection>>,
    session: Mutex<Option<Session>>,
    real_time: Mutex<RealTimeState>,
    running: AtomicBool,
    stop: AtomicBool,
}

impl CoordinatorUnit {
    /// Creates an unconstructed coordinator for the coupled model `uri`.
    #[must_use]
    pub fn new(uri: ModelUri, host: HostAddress, transport: Arc<dyn Transport>, config: RealTimeConfig) -> Arc<Self> {
        Arc::new(Self {
            ledger: Arc::new(ExternalEventLedger::new(uri.clone())),
            uri,
            host,
            transport,
            config,
            architecture: Mutex::new(None),
            model: Mutex::new(None),
            engine: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            links: Mutex::new(ParentLinks::default()),
            supervision: Mutex::new(None),
            session: Mutex::new(None),
            real_time: Mutex::new(RealTimeState::default()),
            running: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        })
    }

    /// URI of the coupled model.
    #[must_use]
    pub const fn model_uri(&self) -> &ModelUri {
        &self.uri
    }

    /// Host holding the unit.
    #[must_use]
    pub const fn host(&self) -> &HostAddress {
        &self.host
    }

    /// Settings of the real-time runs this unit takes part in.
    #[must_use]
    pub const fn real_time_config(&self) -> &RealTimeConfig {
        &self.config
    }

    fn own_endpoint(&self, role: EndpointRole) -> EndpointUri {
        EndpointUri::for_unit(&self.host, &self.uri, role)
    }

    fn with_model<T>(&self, f: impl FnOnce(&mut CoupledModel) -> SimResult<T>) -> SimResult<T> {
        let mut model = lock(&self.model, "coordinator model")?;
        match model.as_mut() {
            Some(model) => f(model),
            None => Err(PreconditionError::EngineNotBuilt { uri: self.uri.clone() }.into()),
        }
    }

    fn with_engine<T>(&self, f: impl FnOnce(&mut CoordinatorEngine) -> SimResult<T>) -> SimResult<T> {
        let mut engine = lock(&self.engine, "coordinator engine")?;
        match engine.as_mut() {
            Some(engine) => f(engine),
            None => Err(PreconditionError::EngineNotBuilt { uri: self.uri.clone() }.into()),
        }
    }

    /// URIs of the connected children, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the unit's state is poisoned.
    pub fn child_uris(&self) -> SimResult<Vec<ModelUri>> {
        Ok(lock(&self.children, "coordinator children")?
            .iter()
            .map(|c| c.uri.clone())
            .collect())
    }

    /// Open run-management and engine-access connections to children.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the unit's state is poisoned.
    pub fn connection_counts(&self) -> SimResult<(usize, usize)> {
        let management = lock(&self.children, "coordinator children")?
            .iter()
            .filter(|c| c.management.connection().is_open())
            .count();
        let engine = lock(&self.engine, "coordinator engine")?
            .as_ref()
            .map_or(0, |e| e.child_connections().filter(|c| c.is_open()).count());
        Ok((management, engine))
    }

    /// Atomic models whose engines the last real-time start collected.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the unit's state is poisoned.
    pub fn real_time_engines(&self) -> SimResult<Vec<ModelUri>> {
        Ok(lock(&self.real_time, "coordinator real-time state")?
            .engines
            .keys()
            .cloned()
            .collect())
    }

    /// Connects one child and has it construct itself. On failure the child
    /// is released before the error is returned.
    fn connect_child(
        &self,
        descriptor: &ModelDescriptor,
        architecture: &ArchitectureDescriptor,
    ) -> SimResult<(ChildLink, Box<dyn ModelOps>, Box<dyn EngineOps>)> {
        let uri = &descriptor.uri;
        let handle = connect_component(&self.transport, descriptor)?;
        let management = match connect_management_port(&handle, uri) {
            Ok(port) => port,
            Err(e) => {
                if handle.is_coupled() {
                    if let Err(u) = handle.uninstall() {
                        warn!(uri = %self.uri, child = %uri, error = %u, "Child coordinator not uninstalled");
                    }
                }
                handle.disconnect();
                return Err(e);
            }
        };
        let link = ChildLink {
            uri: uri.clone(),
            handle,
            management,
        };
        let ports = (|| -> SimResult<(Box<dyn ModelOps>, Box<dyn EngineOps>)> {
            let mut model = connect_model_port(&link.handle, uri)?;
            let mut engine = connect_simulator_port(&link.handle, uri)?;
            link.management
                .construct_simulator(uri, &architecture.sub_architecture(uri)?)?;
            model.set_parent(&self.own_endpoint(EndpointRole::ModelAccess))?;
            engine.set_parent(&self.own_endpoint(EndpointRole::EngineAccess))?;
            Ok((model, engine))
        })();
        match ports {
            Ok((model, engine)) => {
                debug!(uri = %self.uri, child = %uri, host = %link.handle.host(), "Child connected");
                Ok((link, model, engine))
            }
            Err(e) => {
                link.release(&self.uri);
                Err(e)
            }
        }
    }

    fn assemble(
        &self,
        descriptor: &ModelDescriptor,
        architecture: &ArchitectureDescriptor,
        links: &mut Vec<ChildLink>,
    ) -> SimResult<(CoupledModel, CoordinatorEngine)> {
        let mut models = Vec::with_capacity(descriptor.submodels.len());
        let mut engines = Vec::with_capacity(descriptor.submodels.len());
        for child in &descriptor.submodels {
            let (link, model, engine) = self.connect_child(architecture.descriptor(child)?, architecture)?;
            links.push(link);
            models.push(model);
            engines.push(engine);
        }
        let mut model = CoupledModel::new(descriptor, architecture.time_unit(), models)?;
        model.compose()?;
        let engine = CoordinatorEngine::new(self.uri.clone(), engines, Arc::clone(&self.ledger))?;
        Ok((model, engine))
    }

    /// Connects the upward model link to the parent model at `address`.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::ParentAlreadySet` if connected since the
    /// last `reinitialise`, or the connection failure.
    pub fn set_parent_model(&self, address: &EndpointUri) -> SimResult<()> {
        let mut links = lock(&self.links, "coordinator parent links")?;
        if links.model.is_some() {
            return Err(PreconditionError::ParentAlreadySet {
                uri: self.uri.clone(),
                link: "model".to_string(),
            }
            .into());
        }
        let wrapper = connect_parent_model(&self.transport, address)?;
        self.with_model(|model| model.set_parent(address))?;
        links.model = Some(wrapper);
        Ok(())
    }

    /// Connects the upward engine link to the parent engine at `address`.
    ///
    /// Notifications from the ledger bubble up through this link.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::ParentAlreadySet` if connected since the
    /// last `reinitialise`, or the connection failure.
    pub fn set_parent_engine(&self, address: &EndpointUri) -> SimResult<()> {
        let mut links = lock(&self.links, "coordinator parent links")?;
        if links.engine.is_some() {
            return Err(PreconditionError::ParentAlreadySet {
                uri: self.uri.clone(),
                link: "engine".to_string(),
            }
            .into());
        }
        let wrapper = Arc::new(connect_parent_engine(&self.transport, address)?);
        self.with_engine(|engine| engine.set_parent(address))?;
        self.ledger.set_parent(Arc::clone(&wrapper) as Arc<dyn ParentNotifier>)?;
        links.engine = Some(wrapper);
        Ok(())
    }

    fn parent_engine(&self) -> SimResult<Option<Arc<CoordinatorWrapper>>> {
        Ok(lock(&self.links, "coordinator parent links")?.engine.clone())
    }

    /// Synthesizes an event at the current simulated time of `destination`
    /// and delivers it there through the coupled model.
    ///
    /// During a real-time run the time is asked from the destination's own
    /// engine; otherwise it is the coordinator's time of last event.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::UnknownDestination` if `destination` is
    /// not in this unit's subtree, or whatever delivering the event fails with.
    pub fn trigger_external_event<F>(&self, destination: &ModelUri, make_event: F) -> SimResult<()>
    where
        F: FnOnce(SimTime) -> Event,
    {
        let rt_time = {
            let real_time = lock(&self.real_time, "coordinator real-time state")?;
            match real_time.engines.get(destination) {
                Some(engine) => Some(engine.current_time()?),
                None => None,
            }
        };
        let time = match rt_time {
            Some(time) => time,
            None => self.current_time()?,
        };
        let event = make_event(time);
        debug!(uri = %self.uri, destination = %destination, time = %time, "Triggering external event");
        self.with_model(|model| model.store_input(destination, vec![event]))
    }

    /// Simulated time at this unit's model right now.
    ///
    /// During a real-time run this follows the run's clock, capped at the
    /// end of the session; otherwise it is the time of the last event.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::EngineNotBuilt` before construction.
    pub fn current_time(&self) -> SimResult<SimTime> {
        let last = self.with_engine(|engine| engine.time_of_last_event())?;
        let clock = lock(&self.real_time, "coordinator real-time state")?.clock;
        match clock {
            Some(clock) if self.running.load(Ordering::Acquire) => {
                let end = lock(&self.session, "coordinator session")?.map_or(SimTime::INFINITY, |s| s.end);
                let now = clock.sim_now().min(end);
                Ok(if now < last { last } else { now })
            }
            _ => Ok(last),
        }
    }

    fn is_session_root(&self) -> SimResult<bool> {
        Ok(lock(&self.supervision, "coordinator supervision")?.is_some())
    }

    fn ensure_idle(&self) -> SimResult<()> {
        if self.running.load(Ordering::Acquire) {
            return Err(PreconditionError::SimulationRunning { uri: self.uri.clone() }.into());
        }
        Ok(())
    }

    fn report_to_supervisor(&self) {
        let outcome = (|| -> SimResult<bool> {
            let supervision = lock(&self.supervision, "coordinator supervision")?;
            let Some(connection) = supervision.as_ref() else {
                return Ok(false);
            };
            let report = self.get_final_report()?;
            connection
                .call(Request::Supervision(SupervisionRequest::AcceptSimulationReport { report }))?
                .into_unit()?;
            Ok(true)
        })();
        match outcome {
            Ok(true) => info!(uri = %self.uri, "Final report sent to supervisor"),
            Ok(false) => {}
            Err(e) => warn!(uri = %self.uri, error = %e, "Failed to send final report"),
        }
    }

    /// Records that `child` finished its real-time run; ends this unit's run
    /// once every child has.
    fn child_run_completed(&self, child: &ModelUri) -> SimResult<()> {
        let (done, clock) = {
            let mut real_time = lock(&self.real_time, "coordinator real-time state")?;
            let removed = real_time.pending.remove(child);
            (removed && real_time.pending.is_empty(), real_time.clock)
        };
        debug!(uri = %self.uri, child = %child, done, "Child run completed");
        if done && self.running.load(Ordering::Acquire) {
            self.complete_real_time(clock);
        }
        Ok(())
    }

    fn complete_real_time(&self, clock: Option<RealTimeClock>) {
        let end = lock(&self.session, "coordinator session")
            .ok()
            .and_then(|s| *s)
            .map_or(SimTime::INFINITY, |s| s.end);
        let time = match clock {
            Some(clock) if self.stop.load(Ordering::Acquire) => clock.sim_now().min(end),
            _ => end,
        };
        if let Err(e) = self.with_engine(|engine| engine.end_simulation(time)) {
            warn!(uri = %self.uri, error = %e, "Failed to end real-time run");
        }
        self.running.store(false, Ordering::Release);
        info!(uri = %self.uri, time = %time, "Real-time run ended");
        match self.parent_engine() {
            Ok(Some(parent)) => {
                if let Err(e) = parent.run_completed(&self.uri) {
                    warn!(uri = %self.uri, error = %e, "Failed to notify parent of run completion");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(uri = %self.uri, error = %e, "Parent link unavailable"),
        }
        self.report_to_supervisor();
    }

    fn collect_real_time_engines(&self, architecture: &ArchitectureDescriptor) -> SimResult<()> {
        let mut real_time = lock(&self.real_time, "coordinator real-time state")?;
        real_time.clear();
        for descriptor in architecture.atomic_models_under(&self.uri) {
            let handle = connect_component(&self.transport, descriptor)?;
            let engine = connect_real_time_engine(&handle, &descriptor.uri)?;
            real_time.engines.insert(descriptor.uri.clone(), engine);
            real_time.handles.push(handle);
        }
        debug!(uri = %self.uri, engines = real_time.engines.len(), "Real-time engines collected");
        Ok(())
    }

    fn tear_down(&self) -> SimResult<()> {
        let children = std::mem::take(&mut *lock(&self.children, "coordinator children")?);
        *lock(&self.engine, "coordinator engine")? = None;
        *lock(&self.model, "coordinator model")? = None;
        for child in children {
            child.release(&self.uri);
        }
        Ok(())
    }
}

impl fmt::Debug for CoordinatorUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorUnit")
            .field("uri", &self.uri)
            .field("host", &self.host)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RunManagement for CoordinatorUnit {
    fn uri(&self) -> SimResult<ModelUri> {
        Ok(self.uri.clone())
    }

    fn construct_simulator(&self, uri: &ModelUri, architecture: &ArchitectureDescriptor) -> SimResult<()> {
        if uri != &self.uri || architecture.root() != &self.uri {
            return Err(PreconditionError::RootMismatch {
                expected: self.uri.clone(),
                actual: architecture.root().clone(),
            }
            .into());
        }
        {
            let mut current = lock(&self.architecture, "coordinator architecture")?;
            if current.is_some() {
                return Err(PreconditionError::ArchitectureAlreadySet { uri: self.uri.clone() }.into());
            }
            *current = Some(architecture.clone());
        }
        let descriptor = architecture.descriptor(&self.uri)?.clone();
        info!(uri = %self.uri, children = descriptor.submodels.len(), "Constructing coordinator");

        let mut links = Vec::new();
        match self.assemble(&descriptor, architecture, &mut links) {
            Ok((model, engine)) => {
                *lock(&self.model, "coordinator model")? = Some(model);
                *lock(&self.engine, "coordinator engine")? = Some(engine);
                *lock(&self.children, "coordinator children")? = links;
                info!(uri = %self.uri, host = %self.host, "Coordinator constructed");
                Ok(())
            }
            Err(e) => {
                warn!(uri = %self.uri, error = %e, connected = links.len(), "Construction failed, rolling back");
                for link in links.into_iter().rev() {
                    link.release(&self.uri);
                }
                *lock(&self.architecture, "coordinator architecture")? = None;
                Err(e)
            }
        }
    }

    fn is_simulator_set(&self) -> SimResult<bool> {
        Ok(lock(&self.engine, "coordinator engine")?.is_some())
    }

    fn connect_supervision(&self, address: &EndpointUri) -> SimResult<()> {
        let connection = Connection::open(&self.transport, address.clone())?;
        *lock(&self.supervision, "coordinator supervision")? = Some(connection);
        debug!(uri = %self.uri, supervisor = %address, "Supervision connected");
        Ok(())
    }

    fn set_simulation_run_parameters(&self, params: &RunParameters) -> SimResult<()> {
        self.with_model(|model| model.set_simulation_run_parameters(params))
    }

    fn initialise_simulation(&self, start: Option<SimTime>, duration: SimDuration) -> SimResult<()> {
        self.ensure_idle()?;
        let session = Session::new(start.unwrap_or(SimTime::ZERO), duration)?;
        let next = self.with_engine(|engine| engine.initialise(session.start))?;
        *lock(&self.session, "coordinator session")? = Some(session);
        self.stop.store(false, Ordering::Release);
        debug!(uri = %self.uri, start = %session.start, next = %next, "Simulation initialised");
        Ok(())
    }

    fn do_standalone_simulation(&self, start: SimTime, duration: SimDuration) -> SimResult<()> {
        self.ensure_idle()?;
        let wanted = Session::new(start, duration)?;
        let current = *lock(&self.session, "coordinator session")?;
        let ended = self.with_engine(|engine| Ok(engine.is_ended()))?;
        if current != Some(wanted) || ended {
            self.initialise_simulation(Some(start), duration)?;
        }

        info!(uri = %self.uri, start = %start, end = %wanted.end, "Standalone run started");
        self.running.store(true, Ordering::Release);
        let outcome = self.with_engine(|engine| engine.run(wanted.end, &self.stop));
        self.running.store(false, Ordering::Release);
        outcome?;
        info!(uri = %self.uri, "Standalone run ended");
        self.report_to_supervisor();
        Ok(())
    }

    fn start_real_time_simulation(
        &self,
        wall_start: DateTime<Utc>,
        sim_start: SimTime,
        duration: SimDuration,
    ) -> SimResult<()> {
        self.ensure_idle()?;
        let architecture = lock(&self.architecture, "coordinator architecture")?
            .clone()
            .ok_or_else(|| PreconditionError::ArchitectureNotSet { uri: self.uri.clone() })?;
        let acceleration = architecture
            .effective_acceleration(&self.uri)
            .ok_or_else(|| PreconditionError::NotRealTime { uri: self.uri.clone() })?;
        if self.is_session_root()? {
            self.initialise_simulation(Some(sim_start), duration)?;
        } else {
            *lock(&self.session, "coordinator session")? = Some(Session::new(sim_start, duration)?);
            self.stop.store(false, Ordering::Release);
        }
        let clock = RealTimeClock::new(wall_start, sim_start, architecture.time_unit(), acceleration)?;
        self.collect_real_time_engines(&architecture)?;
        let children = self.child_uris()?;
        {
            let mut real_time = lock(&self.real_time, "coordinator real-time state")?;
            real_time.clock = Some(clock);
            real_time.pending = children.iter().cloned().collect();
        }
        self.running.store(true, Ordering::Release);
        info!(
            uri = %self.uri,
            wall_start = %wall_start,
            start = %sim_start,
            children = children.len(),
            acceleration,
            "Real-time run started"
        );

        let forwarded = {
            let links = lock(&self.children, "coordinator children")?;
            links
                .iter()
                .try_for_each(|c| c.management.start_real_time_simulation(wall_start, sim_start, duration))
        };
        if let Err(e) = forwarded {
            warn!(uri = %self.uri, error = %e, "Real-time start failed, stopping children");
            self.finalise_simulation()?;
            return Err(e);
        }
        if children.is_empty() {
            self.complete_real_time(Some(clock));
        }
        Ok(())
    }

    fn is_simulation_running(&self) -> SimResult<bool> {
        Ok(self.running.load(Ordering::Acquire))
    }

    fn stop_simulation(&self) -> SimResult<()> {
        self.stop.store(true, Ordering::Release);
        if self.running.load(Ordering::Acquire) && !lock(&self.real_time, "coordinator real-time state")?.pending.is_empty() {
            let links = lock(&self.children, "coordinator children")?;
            for child in links.iter() {
                child.management.stop_simulation()?;
            }
        }
        debug!(uri = %self.uri, "Stop requested");
        Ok(())
    }

    fn finalise_simulation(&self) -> SimResult<()> {
        self.stop.store(true, Ordering::Release);
        {
            let links = lock(&self.children, "coordinator children")?;
            for child in links.iter() {
                child.management.finalise_simulation()?;
            }
        }
        self.running.store(false, Ordering::Release);
        lock(&self.real_time, "coordinator real-time state")?.pending.clear();
        let initialised = lock(&self.session, "coordinator session")?.is_some();
        let mut engine = lock(&self.engine, "coordinator engine")?;
        if let Some(engine) = engine.as_mut() {
            if initialised && !engine.is_ended() {
                let time = engine.time_of_last_event()?;
                engine.end_simulation(time)?;
            }
        }
        Ok(())
    }

    fn get_final_report(&self) -> SimResult<SimulationReport> {
        self.with_engine(|engine| {
            if !engine.is_ended() {
                return Err(PreconditionError::SimulationNotEnded { uri: self.uri.clone() }.into());
            }
            engine.report()
        })
    }

    fn reinitialise(&self) -> SimResult<()> {
        if self.is_session_root()? {
            if let Err(e) = self.finalise_simulation() {
                warn!(uri = %self.uri, error = %e, "Finalisation before teardown failed");
            }
        }
        self.stop.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
        lock(&self.real_time, "coordinator real-time state")?.clear();
        self.tear_down()?;
        self.ledger.reset()?;
        *lock(&self.links, "coordinator parent links")? = ParentLinks::default();
        *lock(&self.supervision, "coordinator supervision")? = None;
        *lock(&self.session, "coordinator session")? = None;
        *lock(&self.architecture, "coordinator architecture")? = None;
        self.stop.store(false, Ordering::Release);
        info!(uri = %self.uri, "Coordinator reinitialised");
        Ok(())
    }
}

impl UnitService for CoordinatorUnit {
    fn handle_model(&self, request: ModelRequest) -> SimResult<Reply> {
        let reply = match request {
            ModelRequest::Uri => Reply::Model(self.uri.clone()),
            ModelRequest::IsCoupled => Reply::Bool(true),
            ModelRequest::ImportedEventTypes => Reply::EventTypes(self.with_model(|m| m.imported_event_types())?),
            ModelRequest::ExportedEventTypes => Reply::EventTypes(self.with_model(|m| m.exported_event_types())?),
            ModelRequest::IsImportedEventType { event_type } => {
                Reply::Bool(self.with_model(|m| m.is_imported_event_type(&event_type))?)
            }
            ModelRequest::IsExportedEventType { event_type } => {
                Reply::Bool(self.with_model(|m| m.is_exported_event_type(&event_type))?)
            }
            ModelRequest::IsDescendant { uri } => Reply::Bool(self.with_model(|m| m.is_descendant(&uri))?),
            ModelRequest::TimeUnit => Reply::TimeUnit(self.with_model(|m| m.time_unit())?),
            ModelRequest::SetRunParameters { params } => {
                self.set_simulation_run_parameters(&params)?;
                Reply::Unit
            }
            ModelRequest::SetParent { address } => {
                self.set_parent_model(&address)?;
                Reply::Unit
            }
            ModelRequest::AddInfluencees {
                model,
                event_type,
                sinks,
            } => {
                self.with_model(|m| m.add_influencees(&model, &event_type, sinks))?;
                Reply::Unit
            }
            ModelRequest::EventAtomicSinks { event_type } => {
                Reply::Sinks(self.with_model(|m| m.event_atomic_sinks(&event_type))?)
            }
            ModelRequest::StoreInput { destination, events } => {
                self.with_model(|m| m.store_input(&destination, events))?;
                Reply::Unit
            }
        };
        Ok(reply)
    }

    fn handle_engine(&self, request: EngineRequest) -> SimResult<Reply> {
        let reply = match request {
            EngineRequest::Uri => Reply::Model(self.uri.clone()),
            EngineRequest::SetParent { address } => {
                self.set_parent_engine(&address)?;
                Reply::Unit
            }
            EngineRequest::HasReceivedExternalEvents { model } => {
                self.ledger.mark_received(&model)?;
                Reply::Unit
            }
            EngineRequest::HasPerformedExternalEvents { model } => {
                self.ledger.mark_performed(&model)?;
                Reply::Unit
            }
            EngineRequest::RunCompleted { model } => {
                self.child_run_completed(&model)?;
                Reply::Unit
            }
            EngineRequest::Initialise { start } => {
                self.stop.store(false, Ordering::Release);
                Reply::Time(self.with_engine(|e| e.initialise(start))?)
            }
            EngineRequest::TimeOfLastEvent => Reply::Time(self.with_engine(|e| e.time_of_last_event())?),
            EngineRequest::CurrentTime => Reply::Time(self.current_time()?),
            EngineRequest::TimeOfNextEvent => Reply::Time(self.with_engine(|e| e.time_of_next_event())?),
            EngineRequest::NextTimeAdvance => Reply::Duration(self.with_engine(|e| e.next_time_advance())?),
            EngineRequest::ProduceOutput { time } => {
                self.with_engine(|e| e.produce_output(time))?;
                Reply::Unit
            }
            EngineRequest::InternalEventStep { time } => {
                Reply::Time(self.with_engine(|e| e.internal_event_step(time))?)
            }
            EngineRequest::ExternalEventStep { time } => {
                Reply::Time(self.with_engine(|e| e.external_event_step(time))?)
            }
            EngineRequest::EndSimulation { time } => {
                self.with_engine(|e| e.end_simulation(time))?;
                Reply::Unit
            }
            EngineRequest::Report => Reply::Report(self.with_engine(|e| e.report())?),
        };
        Ok(reply)
    }
}
