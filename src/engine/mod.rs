//! Simulation engines.
//!
//! `AtomicEngine` drives one local atomic model. `CoordinatorEngine` drives a
//! set of child engines through `EngineOps`, which proxies implement as well,
//! so a coordinator cannot tell a remote child from a local one.
//!
//! Engines never call out while their owner holds them locked: an atomic
//! engine returns the deliveries caused by its outputs instead of sending
//! them, and child notifications go through the `ExternalEventLedger`, which
//! lives outside the coordinator engine.

mod atomic;
mod coordinator;
mod real_time;

use crate::error::SimResult;
use crate::report::SimulationReport;
use crate::time::{SimDuration, SimTime};
use crate::transport::Connection;
use crate::uri::{EndpointUri, ModelUri};

pub use atomic::AtomicEngine;
pub use coordinator::{CoordinatorEngine, ExternalEventLedger};
pub use real_time::{RealTimeDriver, RealTimeScheduler};

/// Engine-access surface: the DEVS step protocol.
///
/// Step operations return the engine's new time of next event.
pub trait EngineOps: Send {
    /// URI of the driven model.
    fn uri(&self) -> SimResult<ModelUri>;

    /// Records the address of the parent engine. Once per run.
    fn set_parent(&mut self, address: &EndpointUri) -> SimResult<()>;

    /// Initialises the driven model(s) at `start`.
    fn initialise(&mut self, start: SimTime) -> SimResult<SimTime>;

    /// Time of the last transition.
    fn time_of_last_event(&self) -> SimResult<SimTime>;

    /// Time of the next scheduled internal transition.
    fn time_of_next_event(&self) -> SimResult<SimTime>;

    /// Time advance from the last transition to the next one.
    fn next_time_advance(&self) -> SimResult<SimDuration>;

    /// Emits the outputs of every model imminent at `time`.
    fn produce_output(&mut self, time: SimTime) -> SimResult<()>;

    /// Internal transition of every model imminent at `time`.
    fn internal_event_step(&mut self, time: SimTime) -> SimResult<SimTime>;

    /// Applies pending external input at `time`. No-op without input.
    fn external_event_step(&mut self, time: SimTime) -> SimResult<SimTime>;

    /// Marks the end of the run at `time`.
    fn end_simulation(&mut self, time: SimTime) -> SimResult<()>;

    /// Final report of the driven model(s).
    fn report(&self) -> SimResult<SimulationReport>;

    /// Connection used to reach the engine, for proxies.
    fn connection(&self) -> Option<&Connection> {
        None
    }
}

/// Upward notifications from a child unit to its parent coordinator.
pub trait ParentNotifier: Send + Sync {
    /// `model` has external input waiting for an external step.
    ///
    /// # Errors
    ///
    /// Whatever the parent fails with.
    fn has_received_external_events(&self, model: &ModelUri) -> SimResult<()>;

    /// `model` has applied its external input.
    ///
    /// # Errors
    ///
    /// Whatever the parent fails with.
    fn has_performed_external_events(&self, model: &ModelUri) -> SimResult<()>;

    /// `model` has finished its real-time run.
    ///
    /// # Errors
    ///
    /// Whatever the parent fails with.
    fn run_completed(&self, model: &ModelUri) -> SimResult<()>;
}
