//! The real atomic model held by an atomic simulation unit.

use std::collections::BTreeSet;
use std::fmt;

use tracing::warn;

use crate::config::RunParameters;
use crate::error::{ContractError, PreconditionError, SimResult};
use crate::event::{Delivery, Event, EventAtomicSink, EventConverter, EventType, InfluenceSet};
use crate::time::{SimDuration, SimTime, TimeUnit};
use crate::uri::{EndpointUri, HostAddress, ModelUri};

use super::{AtomicBehavior, LocalModelOps, ModelOps};

/// An atomic model: user behavior plus the routing state the engine needs.
pub struct AtomicModel {
    uri: ModelUri,
    host: HostAddress,
    time_unit: TimeUnit,
    behavior: Box<dyn AtomicBehavior>,
    imported: BTreeSet<EventType>,
    exported: BTreeSet<EventType>,
    influences: InfluenceSet,
    inbox: Vec<Event>,
    parent: Option<EndpointUri>,
    params: RunParameters,
}

impl AtomicModel {
    /// Wraps `behavior` as the model `uri` held by `host`.
    #[must_use]
    pub fn new(uri: ModelUri, host: HostAddress, time_unit: TimeUnit, behavior: Box<dyn AtomicBehavior>) -> Self {
        let imported = behavior.imported_event_types();
        let exported = behavior.exported_event_types();
        Self {
            uri,
            host,
            time_unit,
            behavior,
            imported,
            exported,
            influences: InfluenceSet::new(),
            inbox: Vec::new(),
            parent: None,
            params: RunParameters::new(),
        }
    }

    /// URI of the model.
    #[must_use]
    pub const fn model_uri(&self) -> &ModelUri {
        &self.uri
    }

    /// Host holding the model.
    #[must_use]
    pub const fn host(&self) -> &HostAddress {
        &self.host
    }

    /// Parent model address, once set.
    #[must_use]
    pub const fn parent(&self) -> Option<&EndpointUri> {
        self.parent.as_ref()
    }

    /// Run parameters last received.
    #[must_use]
    pub const fn run_parameters(&self) -> &RunParameters {
        &self.params
    }

    /// Routing table of the events this model exports.
    #[must_use]
    pub const fn influences(&self) -> &InfluenceSet {
        &self.influences
    }

    /// Forbids influence changes for the current run.
    pub fn seal_influences(&mut self) {
        self.influences.seal();
    }

    /// Deliveries caused by `events` emitted by this model.
    #[must_use]
    pub fn deliveries(&self, events: &[Event]) -> Vec<Delivery> {
        self.influences.deliveries(&self.uri, events)
    }
}

impl fmt::Debug for AtomicModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicModel")
            .field("uri", &self.uri)
            .field("host", &self.host)
            .field("imported", &self.imported)
            .field("exported", &self.exported)
            .field("influences", &self.influences.len())
            .field("inbox", &self.inbox.len())
            .finish_non_exhaustive()
    }
}

impl ModelOps for AtomicModel {
    fn uri(&self) -> SimResult<ModelUri> {
        Ok(self.uri.clone())
    }

    fn is_coupled(&self) -> SimResult<bool> {
        Ok(false)
    }

    fn imported_event_types(&self) -> SimResult<BTreeSet<EventType>> {
        Ok(self.imported.clone())
    }

    fn exported_event_types(&self) -> SimResult<BTreeSet<EventType>> {
        Ok(self.exported.clone())
    }

    fn is_imported_event_type(&self, event_type: &EventType) -> SimResult<bool> {
        Ok(self.imported.contains(event_type))
    }

    fn is_exported_event_type(&self, event_type: &EventType) -> SimResult<bool> {
        Ok(self.exported.contains(event_type))
    }

    fn is_descendant(&self, _uri: &ModelUri) -> SimResult<bool> {
        Ok(false)
    }

    fn time_unit(&self) -> SimResult<TimeUnit> {
        Ok(self.time_unit)
    }

    fn set_simulation_run_parameters(&mut self, params: &RunParameters) -> SimResult<()> {
        self.params = params.clone();
        self.behavior.set_run_parameters(params);
        Ok(())
    }

    fn set_parent(&mut self, address: &EndpointUri) -> SimResult<()> {
        if self.parent.is_some() {
            return Err(PreconditionError::ParentAlreadySet {
                uri: self.uri.clone(),
                link: "model".to_string(),
            }
            .into());
        }
        self.parent = Some(address.clone());
        Ok(())
    }

    fn add_influencees(
        &mut self,
        model: &ModelUri,
        event_type: &EventType,
        sinks: Vec<EventAtomicSink>,
    ) -> SimResult<()> {
        if model != &self.uri {
            return Err(PreconditionError::UnknownDestination {
                unit: self.uri.clone(),
                destination: model.clone(),
            }
            .into());
        }
        if !self.exported.contains(event_type) {
            return Err(ContractError::UndeclaredExport {
                model: self.uri.clone(),
                event_type: event_type.clone(),
            }
            .into());
        }
        self.influences.add(model, event_type, sinks)
    }

    fn event_atomic_sinks(&self, event_type: &EventType) -> SimResult<Vec<EventAtomicSink>> {
        if !self.imported.contains(event_type) {
            return Err(ContractError::UndeclaredImport {
                model: self.uri.clone(),
                event_type: event_type.clone(),
            }
            .into());
        }
        Ok(vec![EventAtomicSink::new(
            self.uri.clone(),
            EventConverter::Identity,
            self.host.clone(),
        )])
    }

    fn store_input(&mut self, destination: &ModelUri, events: Vec<Event>) -> SimResult<()> {
        if destination != &self.uri {
            return Err(PreconditionError::UnknownDestination {
                unit: self.uri.clone(),
                destination: destination.clone(),
            }
            .into());
        }
        if let Some(event) = events.iter().find(|e| !self.imported.contains(e.event_type())) {
            return Err(ContractError::EventNotImported {
                model: self.uri.clone(),
                event_type: event.event_type().clone(),
            }
            .into());
        }
        self.inbox.extend(events);
        Ok(())
    }

    fn as_local(&mut self) -> SimResult<&mut dyn LocalModelOps> {
        Ok(self)
    }
}

impl LocalModelOps for AtomicModel {
    fn initialise_state(&mut self, start: SimTime) {
        self.inbox.clear();
        self.behavior.initialise_state(start);
    }

    fn time_advance(&self) -> SimDuration {
        self.behavior.time_advance()
    }

    fn output(&mut self, time: SimTime) -> Vec<Event> {
        let mut events = Vec::new();
        for emission in self.behavior.output(time) {
            if !self.exported.contains(&emission.event_type) {
                warn!(uri = %self.uri, event_type = %emission.event_type, "Dropping undeclared output");
                continue;
            }
            events.push(Event::new(emission.event_type, self.uri.clone(), time, emission.payload));
        }
        events
    }

    fn internal_transition(&mut self, time: SimTime) {
        self.behavior.internal_transition(time);
    }

    fn external_transition(&mut self, time: SimTime, elapsed: SimDuration, events: &[Event]) {
        self.behavior.external_transition(time, elapsed, events);
    }

    fn take_inbox(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.inbox)
    }

    fn has_pending_input(&self) -> bool {
        !self.inbox.is_empty()
    }

    fn report(&self) -> serde_json::Value {
        self.behavior.report()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event::Emission;

    /// Emits `Tick` every `period`, counts the `Tock`s it receives.
    pub(crate) struct Metronome {
        pub(crate) period: f64,
        pub(crate) received: usize,
    }

    impl AtomicBehavior for Metronome {
        fn imported_event_types(&self) -> BTreeSet<EventType> {
            BTreeSet::from([EventType::new("Tock")])
        }

        fn exported_event_types(&self) -> BTreeSet<EventType> {
            BTreeSet::from([EventType::new("Tick")])
        }

        fn initialise_state(&mut self, _start: SimTime) {
            self.received = 0;
        }

        fn time_advance(&self) -> SimDuration {
            SimDuration::new(self.period)
        }

        fn output(&self, _time: SimTime) -> Vec<Emission> {
            vec![
                Emission::new("Tick", serde_json::json!({"n": self.received})),
                Emission::new("Undeclared", serde_json::Value::Null),
            ]
        }

        fn internal_transition(&mut self, _time: SimTime) {}

        fn external_transition(&mut self, _time: SimTime, _elapsed: SimDuration, events: &[Event]) {
            self.received += events.len();
        }

        fn report(&self) -> serde_json::Value {
            serde_json::json!({"received": self.received})
        }
    }

    pub(crate) fn metronome(uri: &str) -> AtomicModel {
        AtomicModel::new(
            ModelUri::new(uri),
            HostAddress::new(format!("host-{uri}")),
            TimeUnit::Seconds,
            Box::new(Metronome { period: 1.0, received: 0 }),
        )
    }

    fn tock(source: &str) -> Event {
        Event::new(EventType::new("Tock"), ModelUri::new(source), SimTime::ZERO, serde_json::Value::Null)
    }

    #[test]
    fn store_input_checks_destination_and_imports() {
        let mut model = metronome("m");
        let err = model.store_input(&ModelUri::new("other"), vec![tock("x")]).unwrap_err();
        assert!(err.is_precondition());

        let wrong = Event::new(EventType::new("Tick"), ModelUri::new("x"), SimTime::ZERO, serde_json::Value::Null);
        let err = model.store_input(&ModelUri::new("m"), vec![tock("x"), wrong]).unwrap_err();
        assert!(err.is_contract());
        assert!(!model.has_pending_input());

        model.store_input(&ModelUri::new("m"), vec![tock("x")]).unwrap();
        assert_eq!(model.take_inbox().len(), 1);
        assert!(!model.has_pending_input());
    }

    #[test]
    fn output_drops_undeclared_emissions() {
        let mut model = metronome("m");
        let out = model.output(SimTime::new(2.0));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source(), &ModelUri::new("m"));
        assert_eq!(out[0].time(), SimTime::new(2.0));
    }

    #[test]
    fn parent_is_set_once() {
        let mut model = metronome("m");
        model.set_parent(&EndpointUri::new("h/house/model-access")).unwrap();
        let err = model.set_parent(&EndpointUri::new("h/house/model-access")).unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn sinks_and_influencees_follow_declared_types() {
        let mut model = metronome("m");
        assert_eq!(model.event_atomic_sinks(&EventType::new("Tock")).unwrap().len(), 1);
        assert!(model.event_atomic_sinks(&EventType::new("Tick")).unwrap_err().is_contract());

        let sink = EventAtomicSink::new(ModelUri::new("n"), EventConverter::Identity, HostAddress::new("host-n"));
        assert!(model
            .add_influencees(&ModelUri::new("m"), &EventType::new("Tock"), vec![sink.clone()])
            .unwrap_err()
            .is_contract());
        model
            .add_influencees(&ModelUri::new("m"), &EventType::new("Tick"), vec![sink])
            .unwrap();
        assert_eq!(model.influences().len(), 1);
    }
}
