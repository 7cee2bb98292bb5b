//! Model contract.
//!
//! Two capability sets split what may cross a host boundary from what may not:
//! - `ModelOps` is the forwardable surface (identity, event-type queries,
//!   composition, input delivery). Real models and proxy wrappers implement it.
//! - `LocalModelOps` is step execution. Only the real `AtomicModel` implements
//!   it; `ModelOps::as_local` is the single gate to it, and proxies refuse it
//!   with `SimError::CrossBoundary`.
//!
//! User model logic plugs in through `AtomicBehavior`.

pub(crate) mod atomic;
mod coupled;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::RunParameters;
use crate::error::SimResult;
use crate::event::{Emission, Event, EventAtomicSink, EventType};
use crate::time::{SimDuration, SimTime, TimeUnit};
use crate::transport::Connection;
use crate::uri::{EndpointUri, ModelUri};

pub use atomic::AtomicModel;
pub use coupled::CoupledModel;

/// Behavior of an atomic model: its state and DEVS functions.
///
/// Implementations never see URIs or hosts; outputs are plain emissions which
/// the model stamps with its URI and the current simulated time.
pub trait AtomicBehavior: Send {
    /// Event types this model accepts.
    fn imported_event_types(&self) -> BTreeSet<EventType>;

    /// Event types this model may emit.
    fn exported_event_types(&self) -> BTreeSet<EventType>;

    /// Resets the state at the start of a run.
    fn initialise_state(&mut self, start: SimTime);

    /// Time until the next internal transition.
    fn time_advance(&self) -> SimDuration;

    /// Outputs emitted just before the internal transition at `time`.
    fn output(&self, time: SimTime) -> Vec<Emission>;

    /// Internal transition at `time`.
    fn internal_transition(&mut self, time: SimTime);

    /// External transition at `time`, `elapsed` after the previous transition.
    fn external_transition(&mut self, time: SimTime, elapsed: SimDuration, events: &[Event]);

    /// Receives the run parameters propagated before a run.
    fn set_run_parameters(&mut self, _params: &RunParameters) {}

    /// Model-specific part of the final report.
    fn report(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Builds a fresh behavior each time a unit (re)builds its model.
pub type BehaviorFactory = Arc<dyn Fn() -> Box<dyn AtomicBehavior> + Send + Sync>;

/// Forwardable model surface.
#[allow(missing_docs)]
pub trait ModelOps: Send {
    fn uri(&self) -> SimResult<ModelUri>;

    fn is_coupled(&self) -> SimResult<bool>;

    fn imported_event_types(&self) -> SimResult<BTreeSet<EventType>>;

    fn exported_event_types(&self) -> SimResult<BTreeSet<EventType>>;

    fn is_imported_event_type(&self, event_type: &EventType) -> SimResult<bool> {
        Ok(self.imported_event_types()?.contains(event_type))
    }

    fn is_exported_event_type(&self, event_type: &EventType) -> SimResult<bool> {
        Ok(self.exported_event_types()?.contains(event_type))
    }

    /// Returns true if `uri` lies strictly inside this model's subtree.
    fn is_descendant(&self, uri: &ModelUri) -> SimResult<bool>;

    fn time_unit(&self) -> SimResult<TimeUnit>;

    fn set_simulation_run_parameters(&mut self, params: &RunParameters) -> SimResult<()>;

    /// Records the address of the parent model. Once per run.
    fn set_parent(&mut self, address: &EndpointUri) -> SimResult<()>;

    /// Registers `sinks` as receivers of `event_type` exported by `model`.
    fn add_influencees(
        &mut self,
        model: &ModelUri,
        event_type: &EventType,
        sinks: Vec<EventAtomicSink>,
    ) -> SimResult<()>;

    /// Atomic models receiving an imported `event_type`, with their converters.
    fn event_atomic_sinks(&self, event_type: &EventType) -> SimResult<Vec<EventAtomicSink>>;

    /// Delivers `events` to `destination`, this model or one of its descendants.
    fn store_input(&mut self, destination: &ModelUri, events: Vec<Event>) -> SimResult<()>;

    /// Step execution, available on genuinely local atomic models only.
    fn as_local(&mut self) -> SimResult<&mut dyn LocalModelOps>;

    /// Connection used to reach the model, for proxies.
    fn connection(&self) -> Option<&Connection> {
        None
    }
}

/// Step execution of a local atomic model.
#[allow(missing_docs)]
pub trait LocalModelOps {
    fn initialise_state(&mut self, start: SimTime);

    fn time_advance(&self) -> SimDuration;

    /// Outputs at `time`, stamped with this model's URI.
    fn output(&mut self, time: SimTime) -> Vec<Event>;

    fn internal_transition(&mut self, time: SimTime);

    fn external_transition(&mut self, time: SimTime, elapsed: SimDuration, events: &[Event]);

    /// Removes and returns every queued input event.
    fn take_inbox(&mut self) -> Vec<Event>;

    fn has_pending_input(&self) -> bool;

    fn report(&self) -> serde_json::Value;
}
