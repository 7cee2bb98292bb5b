//! Atomic simulation unit.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::architecture::ArchitectureDescriptor;
use crate::bootstrap::{connect_delivery_port, connect_parent_engine, connect_parent_model};
use crate::config::{RealTimeConfig, RunParameters};
use crate::engine::{AtomicEngine, ParentNotifier, RealTimeDriver, RealTimeScheduler};
use crate::error::{lock_poisoned, ContractError, PreconditionError, SimError, SimResult};
use crate::event::{Delivery, Event, EventAtomicSink, EventType};
use crate::model::{AtomicModel, BehaviorFactory, ModelOps};
use crate::report::SimulationReport;
use crate::time::{RealTimeClock, SimDuration, SimTime};
use crate::transport::{
    Connection, EngineRequest, ModelRequest, Reply, Request, SupervisionRequest, Transport,
};
use crate::uri::{EndpointUri, HostAddress, ModelUri};
use crate::wrapper::{CoordinatorWrapper, CoupledModelWrapper};

use super::{RunManagement, Session, UnitService};

#[derive(Default)]
struct ParentLinks {
    model: Option<CoupledModelWrapper>,
    engine: Option<Arc<CoordinatorWrapper>>,
}

/// Unit owning one atomic model and its engine.
///
/// The model is rebuilt from the behavior factory each time the unit is
/// constructed, so a reinitialised unit starts from fresh state.
pub struct AtomicSimulationUnit {
    uri: ModelUri,
    host: HostAddress,
    factory: BehaviorFactory,
    transport: Arc<dyn Transport>,
    config: RealTimeConfig,
    this: Weak<Self>,
    architecture: Mutex<Option<ArchitectureDescriptor>>,
    engine: Mutex<Option<AtomicEngine>>,
    deliveries: Mutex<BTreeMap<HostAddress, Connection>>,
    links: Mutex<ParentLinks>,
    supervision: Mutex<Option<Connection>>,
    session: Mutex<Option<Session>>,
    clock: Mutex<Option<RealTimeClock>>,
    scheduler: Mutex<Option<RealTimeScheduler>>,
    running: AtomicBool,
    stop: AtomicBool,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, context: &'static str) -> SimResult<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| lock_poisoned(context))
}

impl AtomicSimulationUnit {
    /// Creates an unconstructed unit for the model `uri` held by `host`.
    #[must_use]
    pub fn new(
        uri: ModelUri,
        host: HostAddress,
        factory: BehaviorFactory,
        transport: Arc<dyn Transport>,
        config: RealTimeConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            uri,
            host,
            factory,
            transport,
            config,
            this: this.clone(),
            architecture: Mutex::new(None),
            engine: Mutex::new(None),
            deliveries: Mutex::new(BTreeMap::new()),
            links: Mutex::new(ParentLinks::default()),
            supervision: Mutex::new(None),
            session: Mutex::new(None),
            clock: Mutex::new(None),
            scheduler: Mutex::new(None),
            running: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        })
    }

    /// URI of the unit's model.
    #[must_use]
    pub const fn model_uri(&self) -> &ModelUri {
        &self.uri
    }

    /// Host holding the unit.
    #[must_use]
    pub const fn host(&self) -> &HostAddress {
        &self.host
    }

    /// The architecture the unit was constructed for.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the unit's state is poisoned.
    pub fn architecture(&self) -> SimResult<Option<ArchitectureDescriptor>> {
        Ok(lock(&self.architecture, "unit architecture")?.clone())
    }

    fn with_engine<T>(&self, f: impl FnOnce(&mut AtomicEngine) -> SimResult<T>) -> SimResult<T> {
        let mut engine = lock(&self.engine, "unit engine")?;
        match engine.as_mut() {
            Some(engine) => f(engine),
            None => Err(PreconditionError::EngineNotBuilt { uri: self.uri.clone() }.into()),
        }
    }

    /// Records the architecture this unit takes part in as its root.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::ArchitectureAlreadySet` if one is set, or
    /// `PreconditionError::RootMismatch` if its root is another model.
    pub fn set_architecture(&self, architecture: ArchitectureDescriptor) -> SimResult<()> {
        let mut current = lock(&self.architecture, "unit architecture")?;
        if current.is_some() {
            return Err(PreconditionError::ArchitectureAlreadySet { uri: self.uri.clone() }.into());
        }
        if architecture.root() != &self.uri {
            return Err(PreconditionError::RootMismatch {
                expected: self.uri.clone(),
                actual: architecture.root().clone(),
            }
            .into());
        }
        *current = Some(architecture);
        Ok(())
    }

    /// Builds the model and engine from the architecture.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::ArchitectureNotSet` or
    /// `PreconditionError::EngineAlreadyBuilt`.
    pub fn build_engine(&self) -> SimResult<()> {
        let time_unit = lock(&self.architecture, "unit architecture")?
            .as_ref()
            .map(ArchitectureDescriptor::time_unit)
            .ok_or_else(|| PreconditionError::ArchitectureNotSet { uri: self.uri.clone() })?;
        let mut engine = lock(&self.engine, "unit engine")?;
        if engine.is_some() {
            return Err(PreconditionError::EngineAlreadyBuilt { uri: self.uri.clone() }.into());
        }
        let model = AtomicModel::new(self.uri.clone(), self.host.clone(), time_unit, (self.factory)());
        let built = AtomicEngine::new(model);
        if built.uri() != &self.uri {
            return Err(SimError::internal(format!("engine of {} drives {}", self.uri, built.uri())));
        }
        *engine = Some(built);
        debug!(uri = %self.uri, "Atomic engine built");
        Ok(())
    }

    fn check_contract(&self, architecture: &ArchitectureDescriptor) -> SimResult<()> {
        let descriptor = architecture.descriptor(&self.uri)?;
        self.with_engine(|engine| {
            let model = engine.model();
            if let Some(t) = descriptor.imported.iter().find(|t| !model.is_imported_event_type(t).unwrap_or(false)) {
                return Err(ContractError::UndeclaredImport {
                    model: self.uri.clone(),
                    event_type: t.clone(),
                }
                .into());
            }
            if let Some(t) = descriptor.exported.iter().find(|t| !model.is_exported_event_type(t).unwrap_or(false)) {
                return Err(ContractError::UndeclaredExport {
                    model: self.uri.clone(),
                    event_type: t.clone(),
                }
                .into());
            }
            Ok(())
        })
    }

    /// Connects the upward model link to the parent model at `address`.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::ParentAlreadySet` if connected since the
    /// last `reinitialise`, or the connection failure.
    pub fn set_parent_model(&self, address: &EndpointUri) -> SimResult<()> {
        let mut links = lock(&self.links, "unit parent links")?;
        if links.model.is_some() {
            return Err(PreconditionError::ParentAlreadySet {
                uri: self.uri.clone(),
                link: "model".to_string(),
            }
            .into());
        }
        let wrapper = connect_parent_model(&self.transport, address)?;
        self.with_engine(|engine| engine.model_mut().set_parent(address))?;
        links.model = Some(wrapper);
        Ok(())
    }

    /// Connects the upward engine link to the parent engine at `address`.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::ParentAlreadySet` if connected since the
    /// last `reinitialise`, or the connection failure.
    pub fn set_parent_engine(&self, address: &EndpointUri) -> SimResult<()> {
        let mut links = lock(&self.links, "unit parent links")?;
        if links.engine.is_some() {
            return Err(PreconditionError::ParentAlreadySet {
                uri: self.uri.clone(),
                link: "engine".to_string(),
            }
            .into());
        }
        let wrapper = connect_parent_engine(&self.transport, address)?;
        self.with_engine(|engine| engine.set_parent(address))?;
        links.engine = Some(Arc::new(wrapper));
        Ok(())
    }

    /// URI of the parent model, asked through the upward link.
    ///
    /// # Errors
    ///
    /// Returns the failure of the remote call.
    pub fn parent_uri(&self) -> SimResult<Option<ModelUri>> {
        let links = lock(&self.links, "unit parent links")?;
        links.model.as_ref().map(ModelOps::uri).transpose()
    }

    fn parent_engine(&self) -> SimResult<Option<Arc<CoordinatorWrapper>>> {
        Ok(lock(&self.links, "unit parent links")?.engine.clone())
    }

    /// Registers `sinks` for `event_type` exported by this unit's model,
    /// opening one delivery connection per distinct remote host.
    ///
    /// # Errors
    ///
    /// Returns the connection failure, or the model's refusal.
    pub fn add_influencees(
        &self,
        model: &ModelUri,
        event_type: &EventType,
        sinks: Vec<EventAtomicSink>,
    ) -> SimResult<()> {
        {
            let mut deliveries = lock(&self.deliveries, "unit deliveries")?;
            for sink in sinks.iter().filter(|s| s.host != self.host) {
                if !deliveries.contains_key(&sink.host) {
                    let connection = connect_delivery_port(&self.transport, &sink.host)?;
                    debug!(uri = %self.uri, host = %sink.host, "Delivery connection opened");
                    deliveries.insert(sink.host.clone(), connection);
                }
            }
        }
        self.with_engine(|engine| engine.model_mut().add_influencees(model, event_type, sinks))
    }

    /// Hosts this unit holds a delivery connection to.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the unit's state is poisoned.
    pub fn delivery_hosts(&self) -> SimResult<Vec<HostAddress>> {
        Ok(lock(&self.deliveries, "unit deliveries")?.keys().cloned().collect())
    }

    /// Queues `events` for the model and announces them.
    ///
    /// During a real-time run the scheduler applies them at once; otherwise
    /// the parent coordinator is told the model has input waiting.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::UnknownDestination` unless `destination`
    /// is this unit's model, `ContractError::EventNotImported` for an event
    /// of a type the model does not import, or the parent's failure.
    pub fn store_input(&self, destination: &ModelUri, events: Vec<Event>) -> SimResult<()> {
        self.with_engine(|engine| engine.model_mut().store_input(destination, events))?;
        if self.running.load(Ordering::Acquire) {
            if let Some(scheduler) = lock(&self.scheduler, "unit scheduler")?.as_ref() {
                scheduler.notify_external();
                return Ok(());
            }
        }
        if let Some(parent) = self.parent_engine()? {
            parent.has_received_external_events(&self.uri)?;
        }
        Ok(())
    }

    fn deliver(&self, deliveries: Vec<Delivery>) -> SimResult<()> {
        let mut batches: Vec<(HostAddress, ModelUri, Vec<Event>)> = Vec::new();
        for delivery in deliveries {
            match batches
                .iter_mut()
                .find(|(h, d, _)| h == &delivery.host && d == &delivery.destination)
            {
                Some((_, _, events)) => events.push(delivery.event),
                None => batches.push((delivery.host, delivery.destination, vec![delivery.event])),
            }
        }
        for (host, destination, events) in batches {
            debug!(uri = %self.uri, destination = %destination, count = events.len(), "Delivering events");
            if host == self.host {
                self.store_input(&destination, events)?;
                continue;
            }
            let mut connections = lock(&self.deliveries, "unit deliveries")?;
            if !connections.contains_key(&host) {
                let connection = connect_delivery_port(&self.transport, &host)?;
                connections.insert(host.clone(), connection);
            }
            if let Some(connection) = connections.get(&host) {
                connection
                    .call(Request::Model(ModelRequest::StoreInput { destination, events }))?
                    .into_unit()?;
            }
        }
        Ok(())
    }

    fn produce_and_deliver(&self, time: SimTime) -> SimResult<()> {
        let deliveries = self.with_engine(|engine| engine.produce_output(time))?;
        self.deliver(deliveries)
    }

    fn external_step(&self, time: SimTime) -> SimResult<SimTime> {
        let (had_input, next) = self.with_engine(|engine| {
            let had_input = engine.has_pending_input();
            let at = if time < engine.time_of_last_event() {
                engine.time_of_last_event()
            } else {
                time
            };
            Ok((had_input, engine.external_event_step(at)?))
        })?;
        if had_input {
            if let Some(parent) = self.parent_engine()? {
                parent.has_performed_external_events(&self.uri)?;
            }
        }
        Ok(next)
    }

    /// Simulated time at this model right now.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::EngineNotBuilt` before construction.
    pub fn current_time(&self) -> SimResult<SimTime> {
        let last = self.with_engine(|engine| Ok(engine.time_of_last_event()))?;
        let clock = *lock(&self.clock, "unit clock")?;
        match clock {
            Some(clock) if self.running.load(Ordering::Acquire) => {
                let now = clock.sim_now();
                let end = lock(&self.session, "unit session")?.map_or(SimTime::INFINITY, |s| s.end);
                Ok(if now < last { last } else { now.min(end) })
            }
            _ => Ok(last),
        }
    }

    /// Synthesizes an event at the model's current simulated time and
    /// delivers it to `destination`.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::UnknownDestination` unless `destination`
    /// is this unit's model, or whatever storing the event fails with.
    pub fn trigger_external_event<F>(&self, destination: &ModelUri, make_event: F) -> SimResult<()>
    where
        F: FnOnce(SimTime) -> Event,
    {
        if destination != &self.uri {
            return Err(PreconditionError::UnknownDestination {
                unit: self.uri.clone(),
                destination: destination.clone(),
            }
            .into());
        }
        let time = self.current_time()?;
        self.store_input(destination, vec![make_event(time)])
    }

    fn is_session_root(&self) -> SimResult<bool> {
        Ok(lock(&self.supervision, "unit supervision")?.is_some())
    }

    fn report_to_supervisor(&self) {
        let outcome = (|| -> SimResult<bool> {
            let supervision = lock(&self.supervision, "unit supervision")?;
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

    fn ensure_idle(&self) -> SimResult<()> {
        if self.running.load(Ordering::Acquire) {
            return Err(PreconditionError::SimulationRunning { uri: self.uri.clone() }.into());
        }
        Ok(())
    }

    fn halt_scheduler(&self) -> SimResult<()> {
        let scheduler = lock(&self.scheduler, "unit scheduler")?.take();
        if let Some(scheduler) = scheduler {
            scheduler.stop();
            scheduler.join()?;
        }
        Ok(())
    }

    fn finish_real_time(&self, time: SimTime, outcome: SimResult<()>) {
        if let Err(e) = self.with_engine(|engine| {
            engine.end_simulation(time);
            Ok(())
        }) {
            warn!(uri = %self.uri, error = %e, "Failed to end real-time run");
        }
        self.running.store(false, Ordering::Release);
        if let Err(e) = outcome {
            warn!(uri = %self.uri, error = %e, "Real-time run ended with an error");
        }
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
}

impl fmt::Debug for AtomicSimulationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicSimulationUnit")
            .field("uri", &self.uri)
            .field("host", &self.host)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Drives a unit's engine from its real-time scheduler thread.
struct RealTimeRun {
    unit: Weak<AtomicSimulationUnit>,
}

impl RealTimeRun {
    fn unit(&self) -> SimResult<Arc<AtomicSimulationUnit>> {
        self.unit
            .upgrade()
            .ok_or_else(|| SimError::internal("atomic unit dropped during a real-time run"))
    }
}

impl RealTimeDriver for RealTimeRun {
    fn next_event_time(&self) -> SimResult<SimTime> {
        self.unit()?.with_engine(|engine| Ok(engine.time_of_next_event()))
    }

    fn fire_internal(&self, time: SimTime) -> SimResult<()> {
        let unit = self.unit()?;
        unit.produce_and_deliver(time)?;
        unit.with_engine(|engine| engine.internal_event_step(time))?;
        Ok(())
    }

    fn apply_external(&self, time: SimTime) -> SimResult<()> {
        self.unit()?.external_step(time)?;
        Ok(())
    }

    fn finish(&self, time: SimTime, outcome: SimResult<()>) {
        match self.unit() {
            Ok(unit) => unit.finish_real_time(time, outcome),
            Err(e) => warn!(error = %e, "Real-time run finished without its unit"),
        }
    }
}

impl RunManagement for AtomicSimulationUnit {
    fn uri(&self) -> SimResult<ModelUri> {
        Ok(self.uri.clone())
    }

    fn construct_simulator(&self, uri: &ModelUri, architecture: &ArchitectureDescriptor) -> SimResult<()> {
        if uri != &self.uri {
            return Err(PreconditionError::RootMismatch {
                expected: self.uri.clone(),
                actual: uri.clone(),
            }
            .into());
        }
        let current = self.architecture()?;
        match current {
            Some(current) if &current == architecture => {}
            Some(_) => return Err(PreconditionError::ArchitectureAlreadySet { uri: self.uri.clone() }.into()),
            None => self.set_architecture(architecture.clone())?,
        }
        if lock(&self.engine, "unit engine")?.is_none() {
            self.build_engine()?;
        }
        if let Err(e) = self.check_contract(architecture) {
            *lock(&self.engine, "unit engine")? = None;
            *lock(&self.architecture, "unit architecture")? = None;
            return Err(e);
        }
        info!(uri = %self.uri, host = %self.host, "Atomic unit constructed");
        Ok(())
    }

    fn is_simulator_set(&self) -> SimResult<bool> {
        Ok(lock(&self.engine, "unit engine")?.is_some())
    }

    fn connect_supervision(&self, address: &EndpointUri) -> SimResult<()> {
        let connection = Connection::open(&self.transport, address.clone())?;
        *lock(&self.supervision, "unit supervision")? = Some(connection);
        debug!(uri = %self.uri, supervisor = %address, "Supervision connected");
        Ok(())
    }

    fn set_simulation_run_parameters(&self, params: &RunParameters) -> SimResult<()> {
        self.with_engine(|engine| engine.model_mut().set_simulation_run_parameters(params))
    }

    fn initialise_simulation(&self, start: Option<SimTime>, duration: SimDuration) -> SimResult<()> {
        self.ensure_idle()?;
        let session = Session::new(start.unwrap_or(SimTime::ZERO), duration)?;
        let next = self.with_engine(|engine| Ok(engine.initialise(session.start)))?;
        *lock(&self.session, "unit session")? = Some(session);
        self.stop.store(false, Ordering::Release);
        debug!(uri = %self.uri, start = %session.start, next = %next, "Simulation initialised");
        Ok(())
    }

    fn do_standalone_simulation(&self, start: SimTime, duration: SimDuration) -> SimResult<()> {
        self.ensure_idle()?;
        let wanted = Session::new(start, duration)?;
        let current = *lock(&self.session, "unit session")?;
        let fresh = self.with_engine(|engine| Ok(engine.is_initialised() && !engine.is_ended()))?;
        if current != Some(wanted) || !fresh {
            self.initialise_simulation(Some(start), duration)?;
        }

        info!(uri = %self.uri, start = %start, end = %wanted.end, "Standalone run started");
        self.running.store(true, Ordering::Release);
        let outcome = (|| -> SimResult<SimTime> {
            loop {
                if self.stop.load(Ordering::Acquire) {
                    return self.with_engine(|engine| Ok(engine.time_of_last_event()));
                }
                let (pending, last) = self.with_engine(|e| Ok((e.has_pending_input(), e.time_of_last_event())))?;
                if pending {
                    self.external_step(last)?;
                }
                let next = self.with_engine(|engine| Ok(engine.time_of_next_event()))?;
                if !next.is_finite() || next > wanted.end {
                    return Ok(wanted.end);
                }
                self.produce_and_deliver(next)?;
                self.with_engine(|engine| engine.internal_event_step(next))?;
            }
        })();
        self.running.store(false, Ordering::Release);
        let ended_at = outcome?;
        self.with_engine(|engine| {
            engine.end_simulation(ended_at);
            Ok(())
        })?;
        info!(uri = %self.uri, time = %ended_at, "Standalone run ended");
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
        let architecture = self
            .architecture()?
            .ok_or_else(|| PreconditionError::ArchitectureNotSet { uri: self.uri.clone() })?;
        let acceleration = architecture
            .effective_acceleration(&self.uri)
            .ok_or_else(|| PreconditionError::NotRealTime { uri: self.uri.clone() })?;
        let initialised = self.with_engine(|engine| Ok(engine.is_initialised() && !engine.is_ended()))?;
        if self.is_session_root()? || !initialised {
            self.initialise_simulation(Some(sim_start), duration)?;
        } else {
            *lock(&self.session, "unit session")? = Some(Session::new(sim_start, duration)?);
        }
        let session = Session::new(sim_start, duration)?;
        let clock = RealTimeClock::new(wall_start, sim_start, architecture.time_unit(), acceleration)?;
        *lock(&self.clock, "unit clock")? = Some(clock);

        self.halt_scheduler()?;
        self.stop.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);
        let driver = Arc::new(RealTimeRun { unit: self.this.clone() });
        let scheduler = match RealTimeScheduler::spawn(
            self.uri.clone(),
            clock,
            session.end,
            self.config.command_queue_capacity,
            driver,
        ) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(e);
            }
        };
        *lock(&self.scheduler, "unit scheduler")? = Some(scheduler);
        info!(
            uri = %self.uri,
            wall_start = %wall_start,
            start = %sim_start,
            end = %session.end,
            acceleration,
            "Real-time run started"
        );
        Ok(())
    }

    fn is_simulation_running(&self) -> SimResult<bool> {
        Ok(self.running.load(Ordering::Acquire))
    }

    fn stop_simulation(&self) -> SimResult<()> {
        self.stop.store(true, Ordering::Release);
        if let Some(scheduler) = lock(&self.scheduler, "unit scheduler")?.as_ref() {
            scheduler.stop();
        }
        debug!(uri = %self.uri, "Stop requested");
        Ok(())
    }

    fn finalise_simulation(&self) -> SimResult<()> {
        self.stop_simulation()?;
        self.halt_scheduler()?;
        self.running.store(false, Ordering::Release);
        let built = lock(&self.engine, "unit engine")?.is_some();
        if built {
            self.with_engine(|engine| {
                if engine.is_initialised() && !engine.is_ended() {
                    engine.end_simulation(engine.time_of_last_event());
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    fn get_final_report(&self) -> SimResult<SimulationReport> {
        self.with_engine(|engine| {
            if !engine.is_ended() {
                return Err(PreconditionError::SimulationNotEnded { uri: self.uri.clone() }.into());
            }
            Ok(engine.report())
        })
    }

    fn reinitialise(&self) -> SimResult<()> {
        self.stop.store(true, Ordering::Release);
        self.halt_scheduler()?;
        self.running.store(false, Ordering::Release);
        *lock(&self.links, "unit parent links")? = ParentLinks::default();
        lock(&self.deliveries, "unit deliveries")?.clear();
        *lock(&self.supervision, "unit supervision")? = None;
        *lock(&self.session, "unit session")? = None;
        *lock(&self.clock, "unit clock")? = None;
        *lock(&self.engine, "unit engine")? = None;
        *lock(&self.architecture, "unit architecture")? = None;
        self.stop.store(false, Ordering::Release);
        info!(uri = %self.uri, "Atomic unit reinitialised");
        Ok(())
    }
}

impl UnitService for AtomicSimulationUnit {
    fn handle_model(&self, request: ModelRequest) -> SimResult<Reply> {
        let reply = match request {
            ModelRequest::Uri => Reply::Model(self.uri.clone()),
            ModelRequest::IsCoupled => Reply::Bool(false),
            ModelRequest::ImportedEventTypes => {
                Reply::EventTypes(self.with_engine(|e| e.model().imported_event_types())?)
            }
            ModelRequest::ExportedEventTypes => {
                Reply::EventTypes(self.with_engine(|e| e.model().exported_event_types())?)
            }
            ModelRequest::IsImportedEventType { event_type } => {
                Reply::Bool(self.with_engine(|e| e.model().is_imported_event_type(&event_type))?)
            }
            ModelRequest::IsExportedEventType { event_type } => {
                Reply::Bool(self.with_engine(|e| e.model().is_exported_event_type(&event_type))?)
            }
            ModelRequest::IsDescendant { .. } => Reply::Bool(false),
            ModelRequest::TimeUnit => Reply::TimeUnit(self.with_engine(|e| e.model().time_unit())?),
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
                self.add_influencees(&model, &event_type, sinks)?;
                Reply::Unit
            }
            ModelRequest::EventAtomicSinks { event_type } => {
                Reply::Sinks(self.with_engine(|e| e.model().event_atomic_sinks(&event_type))?)
            }
            ModelRequest::StoreInput { destination, events } => {
                self.store_input(&destination, events)?;
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
            EngineRequest::Initialise { start } => {
                self.stop.store(false, Ordering::Release);
                Reply::Time(self.with_engine(|e| Ok(e.initialise(start)))?)
            }
            EngineRequest::TimeOfLastEvent => Reply::Time(self.with_engine(|e| Ok(e.time_of_last_event()))?),
            EngineRequest::TimeOfNextEvent => Reply::Time(self.with_engine(|e| Ok(e.time_of_next_event()))?),
            EngineRequest::NextTimeAdvance => Reply::Duration(self.with_engine(|e| Ok(e.next_time_advance()))?),
            EngineRequest::CurrentTime => Reply::Time(self.current_time()?),
            EngineRequest::ProduceOutput { time } => {
                self.produce_and_deliver(time)?;
                Reply::Unit
            }
            EngineRequest::InternalEventStep { time } => {
                Reply::Time(self.with_engine(|e| e.internal_event_step(time))?)
            }
            EngineRequest::ExternalEventStep { time } => Reply::Time(self.external_step(time)?),
            EngineRequest::EndSimulation { time } => {
                self.with_engine(|e| {
                    e.end_simulation(time);
                    Ok(())
                })?;
                Reply::Unit
            }
            EngineRequest::Report => Reply::Report(self.with_engine(|e| Ok(e.report()))?),
            EngineRequest::HasReceivedExternalEvents { model }
            | EngineRequest::HasPerformedExternalEvents { model }
            | EngineRequest::RunCompleted { model } => {
                return Err(PreconditionError::UnknownDestination {
                    unit: self.uri.clone(),
                    destination: model,
                }
                .into())
            }
        };
        Ok(reply)
    }
}
