//! Events, converters and influence sets.
//!
//! An event is an immutable value: a type, the URI of the model that produced
//! it, the simulated time at which it occurred and an opaque JSON payload.
//! Influence sets record, for each (exporting model, event type) pair, the
//! atomic models that must receive the event and how to convert it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PreconditionError, SimResult};
use crate::time::SimTime;
use crate::uri::{HostAddress, ModelUri};

/// Name of an event type, as declared in imported/exported sets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    /// Creates an event type name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A typed message exchanged between models.
///
/// Events cannot be modified once created; conversion produces a new event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    event_type: EventType,
    source: ModelUri,
    time: SimTime,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Event {
    /// Creates an event.
    #[must_use]
    pub fn new(event_type: EventType, source: ModelUri, time: SimTime, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            source,
            time,
            payload,
        }
    }

    /// Type of the event.
    #[must_use]
    pub const fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// URI of the model that produced the event.
    #[must_use]
    pub const fn source(&self) -> &ModelUri {
        &self.source
    }

    /// Simulated time at which the event occurred.
    #[must_use]
    pub const fn time(&self) -> SimTime {
        self.time
    }

    /// Payload carried by the event.
    #[must_use]
    pub const fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// A copy of this event carrying another type.
    #[must_use]
    pub fn retyped(&self, event_type: EventType) -> Self {
        Self {
            event_type,
            source: self.source.clone(),
            time: self.time,
            payload: self.payload.clone(),
        }
    }
}

/// An output produced by an atomic behavior, before it is stamped with its
/// source URI and occurrence time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emission {
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

impl Emission {
    /// Creates an emission.
    #[must_use]
    pub fn new(event_type: impl Into<EventType>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Converts an exported event into the event an importing model expects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "to", rename_all = "snake_case")]
pub enum EventConverter {
    /// Deliver the event as is.
    #[default]
    Identity,
    /// Deliver the event under another type, keeping source, time and payload.
    Retype(EventType),
}

impl EventConverter {
    /// Converter that changes `from` into `to` (identity if they are equal).
    #[must_use]
    pub fn between(from: &EventType, to: &EventType) -> Self {
        if from == to {
            Self::Identity
        } else {
            Self::Retype(to.clone())
        }
    }

    /// Applies the converter.
    #[must_use]
    pub fn apply(&self, event: &Event) -> Event {
        match self {
            Self::Identity => event.clone(),
            Self::Retype(to) => event.retyped(to.clone()),
        }
    }

    /// Converter applying `self` first, then `next`.
    #[must_use]
    pub fn then(&self, next: &Self) -> Self {
        match next {
            Self::Identity => self.clone(),
            Self::Retype(_) => next.clone(),
        }
    }

    /// Type of the event produced from an event of type `input`.
    #[must_use]
    pub fn output_type(&self, input: &EventType) -> EventType {
        match self {
            Self::Identity => input.clone(),
            Self::Retype(to) => to.clone(),
        }
    }
}

/// One receiver of an exported event: the importing atomic model, the
/// converter to apply and the host where the importing model lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventAtomicSink {
    pub importing_model: ModelUri,
    pub converter: EventConverter,
    pub host: HostAddress,
}

impl EventAtomicSink {
    /// Creates a sink.
    #[must_use]
    pub fn new(importing_model: ModelUri, converter: EventConverter, host: HostAddress) -> Self {
        Self {
            importing_model,
            converter,
            host,
        }
    }

    /// The same sink, with `first` applied before this sink's converter.
    #[must_use]
    pub fn preceded_by(&self, first: &EventConverter) -> Self {
        Self {
            importing_model: self.importing_model.clone(),
            converter: first.then(&self.converter),
            host: self.host.clone(),
        }
    }
}

/// An event ready to be delivered to one importing model.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub destination: ModelUri,
    pub host: HostAddress,
    pub event: Event,
}

/// Routing table from (exporting model, event type) to the sinks receiving it.
///
/// Append-only while the model is being composed; sealed when a run starts.
#[derive(Debug, Clone, Default)]
pub struct InfluenceSet {
    routes: BTreeMap<(ModelUri, EventType), BTreeSet<EventAtomicSink>>,
    sealed: bool,
}

impl InfluenceSet {
    /// Creates an empty, open influence set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers sinks for events of `event_type` exported by `model`.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::InfluenceSetSealed` once the run has started.
    pub fn add(&mut self, model: &ModelUri, event_type: &EventType, sinks: Vec<EventAtomicSink>) -> SimResult<()> {
        if self.sealed {
            return Err(PreconditionError::InfluenceSetSealed { uri: model.clone() }.into());
        }
        self.routes
            .entry((model.clone(), event_type.clone()))
            .or_default()
            .extend(sinks);
        Ok(())
    }

    /// Sinks registered for `event_type` exported by `model`.
    pub fn sinks(&self, model: &ModelUri, event_type: &EventType) -> impl Iterator<Item = &EventAtomicSink> {
        self.routes
            .get(&(model.clone(), event_type.clone()))
            .into_iter()
            .flatten()
    }

    /// Resolves the deliveries caused by `events` exported by `model`.
    #[must_use]
    pub fn deliveries(&self, model: &ModelUri, events: &[Event]) -> Vec<Delivery> {
        let mut out = Vec::new();
        for event in events {
            for sink in self.sinks(model, event.event_type()) {
                out.push(Delivery {
                    destination: sink.importing_model.clone(),
                    host: sink.host.clone(),
                    event: sink.converter.apply(event),
                });
            }
        }
        out
    }

    /// Distinct hosts reached by this influence set.
    #[must_use]
    pub fn destination_hosts(&self) -> BTreeSet<HostAddress> {
        self.routes
            .values()
            .flatten()
            .map(|sink| sink.host.clone())
            .collect()
    }

    /// Number of registered sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.values().map(BTreeSet::len).sum()
    }

    /// Returns true if no sink is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forbids further additions for the current run.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Returns true once sealed.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Drops every route and reopens the set.
    pub fn clear(&mut self) {
        self.routes.clear();
        self.sealed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(model: &str, converter: EventConverter) -> EventAtomicSink {
        EventAtomicSink::new(ModelUri::new(model), converter, HostAddress::new(format!("host-{model}")))
    }

    #[test]
    fn converter_composition_keeps_last_retype() {
        let heat = EventType::new("Heat");
        let cool = EventType::new("Cool");
        let first = EventConverter::Retype(heat.clone());
        assert_eq!(first.then(&EventConverter::Identity), first);
        assert_eq!(
            first.then(&EventConverter::Retype(cool.clone())),
            EventConverter::Retype(cool.clone())
        );
        assert_eq!(EventConverter::between(&heat, &heat), EventConverter::Identity);
        assert_eq!(EventConverter::between(&heat, &cool).output_type(&heat), cool);
    }

    #[test]
    fn influence_set_resolves_converted_deliveries() {
        let ac = ModelUri::new("ac");
        let on = EventType::new("SwitchOn");
        let mut set = InfluenceSet::new();
        set.add(
            &ac,
            &on,
            vec![
                sink("meter", EventConverter::Identity),
                sink("logger", EventConverter::Retype(EventType::new("Log"))),
            ],
        )
        .unwrap();

        let event = Event::new(on.clone(), ac.clone(), SimTime::new(1.0), serde_json::json!({"power": 3}));
        let deliveries = set.deliveries(&ac, &[event]);
        assert_eq!(deliveries.len(), 2);
        let logged = deliveries
            .iter()
            .find(|d| d.destination == ModelUri::new("logger"))
            .unwrap();
        assert_eq!(logged.event.event_type(), &EventType::new("Log"));
        assert_eq!(logged.event.payload()["power"], 3);
        assert_eq!(set.destination_hosts().len(), 2);

        // Nothing is routed for an unknown type.
        let other = Event::new(EventType::new("Other"), ac.clone(), SimTime::ZERO, serde_json::Value::Null);
        assert!(set.deliveries(&ac, &[other]).is_empty());
    }

    #[test]
    fn influence_set_ignores_duplicate_sinks() {
        let ac = ModelUri::new("ac");
        let on = EventType::new("SwitchOn");
        let mut set = InfluenceSet::new();
        set.add(&ac, &on, vec![sink("meter", EventConverter::Identity)]).unwrap();
        set.add(&ac, &on, vec![sink("meter", EventConverter::Identity)]).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn sealed_influence_set_rejects_additions_until_cleared() {
        let ac = ModelUri::new("ac");
        let on = EventType::new("SwitchOn");
        let mut set = InfluenceSet::new();
        set.seal();
        let err = set.add(&ac, &on, vec![sink("meter", EventConverter::Identity)]).unwrap_err();
        assert!(err.is_precondition());

        set.clear();
        assert!(!set.is_sealed());
        set.add(&ac, &on, vec![sink("meter", EventConverter::Identity)]).unwrap();
        assert!(!set.is_empty());
    }
}
