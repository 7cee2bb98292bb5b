//! Atomic engine: drives one local atomic model.

use crate::error::{PreconditionError, SimError, SimResult};
use crate::event::Delivery;
use crate::model::{AtomicModel, LocalModelOps};
use crate::report::SimulationReport;
use crate::time::{SimDuration, SimTime};
use crate::uri::{EndpointUri, ModelUri};

/// DEVS simulator of one atomic model.
#[derive(Debug)]
pub struct AtomicEngine {
    model: AtomicModel,
    parent: Option<EndpointUri>,
    tl: SimTime,
    tn: SimTime,
    initialised: bool,
    output_time: Option<SimTime>,
    internal_transitions: u64,
    external_transitions: u64,
    ended_at: Option<SimTime>,
}

impl AtomicEngine {
    /// Creates an engine for `model`. Nothing is scheduled before `initialise`.
    #[must_use]
    pub fn new(model: AtomicModel) -> Self {
        Self {
            model,
            parent: None,
            tl: SimTime::ZERO,
            tn: SimTime::INFINITY,
            initialised: false,
            output_time: None,
            internal_transitions: 0,
            external_transitions: 0,
            ended_at: None,
        }
    }

    /// URI of the driven model.
    #[must_use]
    pub const fn uri(&self) -> &ModelUri {
        self.model.model_uri()
    }

    /// The driven model.
    #[must_use]
    pub const fn model(&self) -> &AtomicModel {
        &self.model
    }

    /// The driven model, mutably.
    pub fn model_mut(&mut self) -> &mut AtomicModel {
        &mut self.model
    }

    /// Parent engine address, once set.
    #[must_use]
    pub const fn parent(&self) -> Option<&EndpointUri> {
        self.parent.as_ref()
    }

    /// Records the parent engine address.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::ParentAlreadySet` on a second call.
    pub fn set_parent(&mut self, address: &EndpointUri) -> SimResult<()> {
        if self.parent.is_some() {
            return Err(PreconditionError::ParentAlreadySet {
                uri: self.uri().clone(),
                link: "engine".to_string(),
            }
            .into());
        }
        self.parent = Some(address.clone());
        Ok(())
    }

    /// Time of the last transition.
    #[must_use]
    pub const fn time_of_last_event(&self) -> SimTime {
        self.tl
    }

    /// Time of the next internal transition.
    #[must_use]
    pub const fn time_of_next_event(&self) -> SimTime {
        self.tn
    }

    /// Time advance between the last and the next transition.
    #[must_use]
    pub fn next_time_advance(&self) -> SimDuration {
        self.tn - self.tl
    }

    /// Returns true once `initialise` has run.
    #[must_use]
    pub const fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Returns true once `end_simulation` has run.
    #[must_use]
    pub const fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Returns true if input is waiting for an external step.
    #[must_use]
    pub fn has_pending_input(&self) -> bool {
        self.model.has_pending_input()
    }

    fn schedule(&mut self, time: SimTime) {
        self.tl = time;
        self.tn = time + self.model.time_advance();
    }

    fn require_initialised(&self, operation: &str) -> SimResult<()> {
        if self.initialised {
            Ok(())
        } else {
            Err(SimError::invalid_state("atomic engine", "uninitialised", operation))
        }
    }

    /// Resets the model state and schedules its first internal transition.
    ///
    /// Seals the model's influence set for the run.
    pub fn initialise(&mut self, start: SimTime) -> SimTime {
        self.model.initialise_state(start);
        self.model.seal_influences();
        self.schedule(start);
        self.initialised = true;
        self.output_time = None;
        self.internal_transitions = 0;
        self.external_transitions = 0;
        self.ended_at = None;
        self.tn
    }

    /// Outputs of the model if it is imminent at `time`, resolved to deliveries.
    ///
    /// Outputs are produced once per instant; a repeated call returns nothing.
    ///
    /// # Errors
    ///
    /// Returns a precondition error before `initialise`.
    pub fn produce_output(&mut self, time: SimTime) -> SimResult<Vec<Delivery>> {
        self.require_initialised("produce_output")?;
        if time != self.tn || self.output_time == Some(time) {
            return Ok(Vec::new());
        }
        self.output_time = Some(time);
        let events = self.model.output(time);
        Ok(self.model.deliveries(&events))
    }

    /// Internal transition at `time`, which must be the time of next event.
    ///
    /// # Errors
    ///
    /// Returns a precondition error before `initialise` or at any other time.
    pub fn internal_event_step(&mut self, time: SimTime) -> SimResult<SimTime> {
        self.require_initialised("internal_event_step")?;
        if time != self.tn {
            return Err(PreconditionError::InvalidArgument {
                reason: format!("{}: internal step at {time}, next event is at {}", self.uri(), self.tn),
            }
            .into());
        }
        self.model.internal_transition(time);
        self.schedule(time);
        self.internal_transitions += 1;
        self.output_time = None;
        Ok(self.tn)
    }

    /// External transition at `time` with every queued input event.
    ///
    /// # Errors
    ///
    /// Returns a precondition error before `initialise` or if `time` is before
    /// the last transition.
    pub fn external_event_step(&mut self, time: SimTime) -> SimResult<SimTime> {
        self.require_initialised("external_event_step")?;
        if !self.model.has_pending_input() {
            return Ok(self.tn);
        }
        if time < self.tl {
            return Err(PreconditionError::InvalidArgument {
                reason: format!("{}: external step at {time}, last event was at {}", self.uri(), self.tl),
            }
            .into());
        }
        let events = self.model.take_inbox();
        let elapsed = time.since(self.tl);
        self.model.external_transition(time, elapsed, &events);
        self.schedule(time);
        self.external_transitions += 1;
        Ok(self.tn)
    }

    /// Marks the end of the run.
    pub fn end_simulation(&mut self, time: SimTime) {
        self.ended_at = Some(time);
    }

    /// Final report of the model.
    #[must_use]
    pub fn report(&self) -> SimulationReport {
        SimulationReport::atomic(
            self.uri().clone(),
            self.ended_at.unwrap_or(self.tl),
            self.internal_transitions,
            self.external_transitions,
            self.model.report(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventAtomicSink, EventConverter, EventType};
    use crate::model::atomic::tests::metronome;
    use crate::model::ModelOps;
    use crate::report::ReportDetail;
    use crate::uri::HostAddress;

    fn tock() -> Event {
        Event::new(EventType::new("Tock"), ModelUri::new("other"), SimTime::ZERO, serde_json::Value::Null)
    }

    #[test]
    fn steps_follow_the_time_advance() {
        let mut engine = AtomicEngine::new(metronome("m"));
        assert!(engine.produce_output(SimTime::ZERO).is_err());

        assert_eq!(engine.initialise(SimTime::ZERO), SimTime::new(1.0));
        assert!(engine.internal_event_step(SimTime::new(0.5)).is_err());
        assert_eq!(engine.internal_event_step(SimTime::new(1.0)).unwrap(), SimTime::new(2.0));
        assert_eq!(engine.time_of_last_event(), SimTime::new(1.0));
        assert_eq!(engine.next_time_advance(), SimDuration::new(1.0));
    }

    #[test]
    fn outputs_are_produced_once_per_instant_and_routed() {
        let mut engine = AtomicEngine::new(metronome("m"));
        let sink = EventAtomicSink::new(ModelUri::new("n"), EventConverter::Identity, HostAddress::new("host-n"));
        engine
            .model_mut()
            .add_influencees(&ModelUri::new("m"), &EventType::new("Tick"), vec![sink])
            .unwrap();
        engine.initialise(SimTime::ZERO);

        assert!(engine.produce_output(SimTime::new(0.5)).unwrap().is_empty());
        let deliveries = engine.produce_output(SimTime::new(1.0)).unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].destination, ModelUri::new("n"));
        assert!(engine.produce_output(SimTime::new(1.0)).unwrap().is_empty());

        // Sealed for the run.
        let late = EventAtomicSink::new(ModelUri::new("o"), EventConverter::Identity, HostAddress::new("host-o"));
        assert!(engine
            .model_mut()
            .add_influencees(&ModelUri::new("m"), &EventType::new("Tick"), vec![late])
            .is_err());
    }

    #[test]
    fn external_step_applies_queued_input_only() {
        let mut engine = AtomicEngine::new(metronome("m"));
        engine.initialise(SimTime::ZERO);
        assert_eq!(engine.external_event_step(SimTime::new(0.5)).unwrap(), SimTime::new(1.0));

        engine.model_mut().store_input(&ModelUri::new("m"), vec![tock(), tock()]).unwrap();
        assert!(engine.has_pending_input());
        assert_eq!(engine.external_event_step(SimTime::new(0.5)).unwrap(), SimTime::new(1.5));

        engine.end_simulation(SimTime::new(3.0));
        let report = engine.report();
        assert_eq!(report.end_time, SimTime::new(3.0));
        match report.detail {
            ReportDetail::Atomic {
                internal_transitions,
                external_transitions,
                summary,
            } => {
                assert_eq!(internal_transitions, 0);
                assert_eq!(external_transitions, 1);
                assert_eq!(summary["received"], 2);
            }
            ReportDetail::Coupled { .. } => panic!("atomic engine produced a coupled report"),
        }
    }

    #[test]
    fn parent_engine_is_set_once() {
        let mut engine = AtomicEngine::new(metronome("m"));
        engine.set_parent(&EndpointUri::new("h/house/engine-access")).unwrap();
        assert!(engine.set_parent(&EndpointUri::new("h/house/engine-access")).is_err());
    }
}
