//! Coordinator engine and external event ledger.
//!
//! The coordinator caches each child's time of next event. At its own time of
//! next event it asks every imminent child for its outputs before any of them
//! transitions, then steps the imminent children, then gives every child that
//! received input an external step at the same instant. Which children
//! received input is recorded by the ledger, fed by the children themselves
//! through `has_received_external_events`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::error::{lock_poisoned, PreconditionError, SimResult};
use crate::report::SimulationReport;
use crate::time::{SimDuration, SimTime};
use crate::transport::Connection;
use crate::uri::{EndpointUri, ModelUri};

use super::{EngineOps, ParentNotifier};

#[derive(Default)]
struct LedgerState {
    pending: BTreeSet<ModelUri>,
    stepping: bool,
    parent: Option<Arc<dyn ParentNotifier>>,
}

/// Children of a coordinator that hold unapplied external input.
///
/// When the ledger goes from empty to non-empty outside of a step of its
/// coordinator, the coordinator's own parent is told that the coordinator
/// has received external events, so the notification bubbles up until it
/// reaches a coordinator that will step.
pub struct ExternalEventLedger {
    owner: ModelUri,
    state: Mutex<LedgerState>,
}

impl ExternalEventLedger {
    /// Creates an empty ledger for the coordinator of `owner`.
    #[must_use]
    pub fn new(owner: ModelUri) -> Self {
        Self {
            owner,
            state: Mutex::new(LedgerState::default()),
        }
    }

    fn lock(&self) -> SimResult<std::sync::MutexGuard<'_, LedgerState>> {
        self.state.lock().map_err(|_| lock_poisoned("external event ledger"))
    }

    /// Connects the ledger to the parent coordinator.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::ParentAlreadySet` if a parent is connected.
    pub fn set_parent(&self, parent: Arc<dyn ParentNotifier>) -> SimResult<()> {
        let mut state = self.lock()?;
        if state.parent.is_some() {
            return Err(PreconditionError::ParentAlreadySet {
                uri: self.owner.clone(),
                link: "engine".to_string(),
            }
            .into());
        }
        state.parent = Some(parent);
        Ok(())
    }

    /// The parent coordinator, if connected.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the ledger is poisoned.
    pub fn parent(&self) -> SimResult<Option<Arc<dyn ParentNotifier>>> {
        Ok(self.lock()?.parent.clone())
    }

    /// Disconnects the parent and forgets every pending child.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the ledger is poisoned.
    pub fn reset(&self) -> SimResult<Option<Arc<dyn ParentNotifier>>> {
        let mut state = self.lock()?;
        state.pending.clear();
        state.stepping = false;
        Ok(state.parent.take())
    }

    /// Records that `child` holds external input.
    ///
    /// # Errors
    ///
    /// Returns the parent's failure if the notification had to bubble up.
    pub fn mark_received(&self, child: &ModelUri) -> SimResult<()> {
        let notify = {
            let mut state = self.lock()?;
            let was_empty = state.pending.is_empty();
            state.pending.insert(child.clone());
            if was_empty && !state.stepping {
                state.parent.clone()
            } else {
                None
            }
        };
        if let Some(parent) = notify {
            debug!(uri = %self.owner, child = %child, "Bubbling external input to parent");
            parent.has_received_external_events(&self.owner)?;
        }
        Ok(())
    }

    /// Records that `child` applied its external input. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the ledger is poisoned.
    pub fn mark_performed(&self, child: &ModelUri) -> SimResult<bool> {
        Ok(self.lock()?.pending.remove(child))
    }

    /// Removes and returns every pending child.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the ledger is poisoned.
    pub fn drain(&self) -> SimResult<BTreeSet<ModelUri>> {
        Ok(std::mem::take(&mut self.lock()?.pending))
    }

    /// Returns true if no child holds external input.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the ledger is poisoned.
    pub fn is_empty(&self) -> SimResult<bool> {
        Ok(self.lock()?.pending.is_empty())
    }

    /// Suppresses bubbling while the coordinator steps.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the ledger is poisoned.
    pub fn begin_step(&self) -> SimResult<()> {
        self.lock()?.stepping = true;
        Ok(())
    }

    /// Ends a step, bubbling input that arrived after the last drain.
    ///
    /// # Errors
    ///
    /// Returns the parent's failure if the notification had to bubble up.
    pub fn end_step(&self) -> SimResult<()> {
        let notify = {
            let mut state = self.lock()?;
            state.stepping = false;
            if state.pending.is_empty() {
                None
            } else {
                state.parent.clone()
            }
        };
        if let Some(parent) = notify {
            parent.has_received_external_events(&self.owner)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ExternalEventLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.state.lock().map(|s| s.pending.len()).unwrap_or(0);
        f.debug_struct("ExternalEventLedger")
            .field("owner", &self.owner)
            .field("pending", &pending)
            .finish_non_exhaustive()
    }
}

struct ChildEngine {
    uri: ModelUri,
    engine: Box<dyn EngineOps>,
    tn: SimTime,
}

/// DEVS coordinator of a coupled model's children.
pub struct CoordinatorEngine {
    uri: ModelUri,
    children: Vec<ChildEngine>,
    ledger: Arc<ExternalEventLedger>,
    parent: Option<EndpointUri>,
    tl: SimTime,
    tn: SimTime,
    ended_at: Option<SimTime>,
}

impl CoordinatorEngine {
    /// Creates a coordinator over `children`, sharing `ledger` with its unit.
    ///
    /// # Errors
    ///
    /// Returns the error of a child URI query.
    pub fn new(uri: ModelUri, children: Vec<Box<dyn EngineOps>>, ledger: Arc<ExternalEventLedger>) -> SimResult<Self> {
        let children = children
            .into_iter()
            .map(|engine| {
                Ok(ChildEngine {
                    uri: engine.uri()?,
                    engine,
                    tn: SimTime::INFINITY,
                })
            })
            .collect::<SimResult<Vec<_>>>()?;
        Ok(Self {
            uri,
            children,
            ledger,
            parent: None,
            tl: SimTime::ZERO,
            tn: SimTime::INFINITY,
            ended_at: None,
        })
    }

    /// URI of the coupled model.
    #[must_use]
    pub const fn model_uri(&self) -> &ModelUri {
        &self.uri
    }

    /// URIs of the child engines.
    pub fn child_uris(&self) -> impl Iterator<Item = &ModelUri> {
        self.children.iter().map(|c| &c.uri)
    }

    /// Connections of the child engine proxies.
    pub fn child_connections(&self) -> impl Iterator<Item = &Connection> {
        self.children.iter().filter_map(|c| c.engine.connection())
    }

    /// Returns true once `end_simulation` has run.
    #[must_use]
    pub const fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Gives the child engines back.
    #[must_use]
    pub fn into_children(self) -> Vec<(ModelUri, Box<dyn EngineOps>)> {
        self.children.into_iter().map(|c| (c.uri, c.engine)).collect()
    }

    fn refresh(&mut self) {
        self.tn = self
            .children
            .iter()
            .map(|c| c.tn)
            .fold(SimTime::INFINITY, SimTime::min);
    }

    fn apply_external(&mut self, time: SimTime) -> SimResult<()> {
        let pending = self.ledger.drain()?;
        for uri in &pending {
            match self.children.iter_mut().find(|c| &c.uri == uri) {
                Some(child) => child.tn = child.engine.external_event_step(time)?,
                None => warn!(uri = %self.uri, child = %uri, "External input recorded for an unknown child"),
            }
        }
        Ok(())
    }

    fn step_children(&mut self, time: SimTime) -> SimResult<()> {
        for child in self.children.iter_mut().filter(|c| c.tn == time) {
            child.tn = child.engine.internal_event_step(time)?;
        }
        self.apply_external(time)
    }

    /// Runs the children from the current state until `end` or until `stop` is set.
    ///
    /// # Errors
    ///
    /// Returns the first failure of a step; the run is left where it failed.
    pub fn run(&mut self, end: SimTime, stop: &AtomicBool) -> SimResult<()> {
        let mut steps = 0_u64;
        loop {
            if stop.load(Ordering::Acquire) {
                info!(uri = %self.uri, time = %self.tl, "Standalone run stopped");
                break;
            }
            if !self.ledger.is_empty()? {
                self.external_event_step(self.tl)?;
            }
            let time = self.tn;
            if !time.is_finite() || time > end {
                break;
            }
            self.produce_output(time)?;
            self.internal_event_step(time)?;
            steps += 1;
        }
        debug!(uri = %self.uri, steps, "Standalone run finished");
        self.end_simulation(end)
    }
}

impl fmt::Debug for CoordinatorEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorEngine")
            .field("uri", &self.uri)
            .field("children", &self.child_uris().collect::<Vec<_>>())
            .field("tl", &self.tl)
            .field("tn", &self.tn)
            .finish_non_exhaustive()
    }
}

impl EngineOps for CoordinatorEngine {
    fn uri(&self) -> SimResult<ModelUri> {
        Ok(self.uri.clone())
    }

    fn set_parent(&mut self, address: &EndpointUri) -> SimResult<()> {
        if self.parent.is_some() {
            return Err(PreconditionError::ParentAlreadySet {
                uri: self.uri.clone(),
                link: "engine".to_string(),
            }
            .into());
        }
        self.parent = Some(address.clone());
        Ok(())
    }

    fn initialise(&mut self, start: SimTime) -> SimResult<SimTime> {
        self.ledger.drain()?;
        for child in &mut self.children {
            child.tn = child.engine.initialise(start)?;
        }
        self.tl = start;
        self.ended_at = None;
        self.refresh();
        debug!(uri = %self.uri, start = %start, next = %self.tn, "Coordinator initialised");
        Ok(self.tn)
    }

    fn time_of_last_event(&self) -> SimResult<SimTime> {
        Ok(self.tl)
    }

    fn time_of_next_event(&self) -> SimResult<SimTime> {
        Ok(self.tn)
    }

    fn next_time_advance(&self) -> SimResult<SimDuration> {
        Ok(self.tn - self.tl)
    }

    fn produce_output(&mut self, time: SimTime) -> SimResult<()> {
        if time != self.tn {
            return Ok(());
        }
        for child in self.children.iter_mut().filter(|c| c.tn == time) {
            child.engine.produce_output(time)?;
        }
        Ok(())
    }

    fn internal_event_step(&mut self, time: SimTime) -> SimResult<SimTime> {
        if time != self.tn {
            return Err(PreconditionError::InvalidArgument {
                reason: format!("{}: internal step at {time}, next event is at {}", self.uri, self.tn),
            }
            .into());
        }
        self.ledger.begin_step()?;
        let stepped = self.step_children(time);
        let ended = self.ledger.end_step();
        stepped?;
        ended?;
        self.tl = time;
        self.refresh();
        Ok(self.tn)
    }

    fn external_event_step(&mut self, time: SimTime) -> SimResult<SimTime> {
        if self.ledger.is_empty()? {
            return Ok(self.tn);
        }
        self.ledger.begin_step()?;
        let applied = self.apply_external(time);
        let ended = self.ledger.end_step();
        applied?;
        ended?;
        self.tl = time;
        self.refresh();
        Ok(self.tn)
    }

    fn end_simulation(&mut self, time: SimTime) -> SimResult<()> {
        for child in &mut self.children {
            child.engine.end_simulation(time)?;
        }
        self.ended_at = Some(time);
        Ok(())
    }

    fn report(&self) -> SimResult<SimulationReport> {
        let children = self
            .children
            .iter()
            .map(|c| c.engine.report())
            .collect::<SimResult<Vec<_>>>()?;
        Ok(SimulationReport::coupled(
            self.uri.clone(),
            self.ended_at.unwrap_or(self.tl),
            children,
        ))
    }
}
