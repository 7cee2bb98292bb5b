//! The real coupled model held by a coordinator unit.
//!
//! A coupled model has no behavior of its own: it owns its children (local
//! models or proxies, it cannot tell) and the routing between them. Composing
//! it resolves every internal coupling down to atomic sinks and registers them
//! on the exporting child, so that at run time events travel directly from
//! atomic model to atomic model.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::architecture::{Coupling, EventRoute, ModelDescriptor};
use crate::config::RunParameters;
use crate::error::{ContractError, PreconditionError, SimError, SimResult};
use crate::event::{Event, EventAtomicSink, EventConverter, EventType};
use crate::time::TimeUnit;
use crate::uri::{EndpointUri, ModelUri};

use super::{LocalModelOps, ModelOps};

/// A coupled model built from its children.
pub struct CoupledModel {
    uri: ModelUri,
    time_unit: TimeUnit,
    children: Vec<(ModelUri, Box<dyn ModelOps>)>,
    imported: BTreeSet<EventType>,
    exported: BTreeSet<EventType>,
    import_routes: BTreeMap<EventType, Vec<EventRoute>>,
    reexports: BTreeMap<EventType, Vec<EventRoute>>,
    couplings: Vec<Coupling>,
    parent: Option<EndpointUri>,
}

impl CoupledModel {
    /// Assembles the coupled model described by `descriptor` from `children`.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionError::UnknownModel` if the children do not match
    /// the descriptor's submodels, or the error of a child URI query.
    pub fn new(descriptor: &ModelDescriptor, time_unit: TimeUnit, children: Vec<Box<dyn ModelOps>>) -> SimResult<Self> {
        let mut named = Vec::with_capacity(children.len());
        for child in children {
            let uri = child.uri()?;
            if !descriptor.submodels.contains(&uri) {
                return Err(PreconditionError::UnknownModel { uri }.into());
            }
            named.push((uri, child));
        }
        if let Some(missing) = descriptor
            .submodels
            .iter()
            .find(|uri| !named.iter().any(|(u, _)| u == *uri))
        {
            return Err(PreconditionError::UnknownModel { uri: missing.clone() }.into());
        }
        Ok(Self {
            uri: descriptor.uri.clone(),
            time_unit,
            children: named,
            imported: descriptor.imported.clone(),
            exported: descriptor.exported.clone(),
            import_routes: descriptor.import_routes.clone(),
            reexports: descriptor.reexports.clone(),
            couplings: descriptor.couplings.clone(),
            parent: None,
        })
    }

    /// URIs of the children, in declaration order.
    pub fn child_uris(&self) -> impl Iterator<Item = &ModelUri> {
        self.children.iter().map(|(uri, _)| uri)
    }

    /// Number of children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Returns true if the model has no child.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Parent model address, once set.
    #[must_use]
    pub const fn parent(&self) -> Option<&EndpointUri> {
        self.parent.as_ref()
    }

    /// Gives the children back, dropping the routing.
    #[must_use]
    pub fn into_children(self) -> Vec<(ModelUri, Box<dyn ModelOps>)> {
        self.children
    }

    fn child(&self, uri: &ModelUri) -> SimResult<&dyn ModelOps> {
        self.children
            .iter()
            .find(|(u, _)| u == uri)
            .map(|(_, c)| c.as_ref())
            .ok_or_else(|| {
                PreconditionError::UnknownDestination {
                    unit: self.uri.clone(),
                    destination: uri.clone(),
                }
                .into()
            })
    }

    fn child_mut(&mut self, uri: &ModelUri) -> SimResult<&mut Box<dyn ModelOps>> {
        let unit = self.uri.clone();
        self.children
            .iter_mut()
            .find(|(u, _)| u == uri)
            .map(|(_, c)| c)
            .ok_or_else(|| {
                PreconditionError::UnknownDestination {
                    unit,
                    destination: uri.clone(),
                }
                .into()
            })
    }

    /// Atomic sinks behind the imported `event_type` of child `route.model`,
    /// seen from an event of type `from`.
    fn route_sinks(&self, from: &EventType, route: &EventRoute) -> SimResult<Vec<EventAtomicSink>> {
        let first = EventConverter::between(from, &route.event_type);
        Ok(self
            .child(&route.model)?
            .event_atomic_sinks(&route.event_type)?
            .iter()
            .map(|sink| sink.preceded_by(&first))
            .collect())
    }

    /// Registers every internal coupling on the exporting children.
    ///
    /// # Errors
    ///
    /// Returns the first failure of a child, e.g. a contract mismatch or a
    /// remote call failure.
    pub fn compose(&mut self) -> SimResult<()> {
        let couplings = self.couplings.clone();
        for coupling in &couplings {
            let mut sinks = Vec::new();
            for route in &coupling.to {
                sinks.extend(self.route_sinks(&coupling.from.event_type, route)?);
            }
            debug!(
                uri = %self.uri,
                from = %coupling.from.model,
                event_type = %coupling.from.event_type,
                sinks = sinks.len(),
                "Registering coupling"
            );
            let from = coupling.from.model.clone();
            self.child_mut(&from)?
                .add_influencees(&from, &coupling.from.event_type, sinks)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CoupledModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoupledModel")
            .field("uri", &self.uri)
            .field("children", &self.child_uris().collect::<Vec<_>>())
            .field("couplings", &self.couplings.len())
            .finish_non_exhaustive()
    }
}

impl ModelOps for CoupledModel {
    fn uri(&self) -> SimResult<ModelUri> {
        Ok(self.uri.clone())
    }

    fn is_coupled(&self) -> SimResult<bool> {
        Ok(true)
    }

    fn imported_event_types(&self) -> SimResult<BTreeSet<EventType>> {
        Ok(self.imported.clone())
    }

    fn exported_event_types(&self) -> SimResult<BTreeSet<EventType>> {
        Ok(self.exported.clone())
    }

    fn is_descendant(&self, uri: &ModelUri) -> SimResult<bool> {
        for (child_uri, child) in &self.children {
            if child_uri == uri || child.is_descendant(uri)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn time_unit(&self) -> SimResult<TimeUnit> {
        Ok(self.time_unit)
    }

    fn set_simulation_run_parameters(&mut self, params: &RunParameters) -> SimResult<()> {
        for (_, child) in &mut self.children {
            child.set_simulation_run_parameters(params)?;
        }
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
        let routes = self.reexports.get(event_type).cloned().ok_or_else(|| {
            SimError::from(ContractError::UndeclaredExport {
                model: self.uri.clone(),
                event_type: event_type.clone(),
            })
        })?;
        for route in routes {
            let first = EventConverter::between(&route.event_type, event_type);
            let forwarded = sinks.iter().map(|s| s.preceded_by(&first)).collect();
            self.child_mut(&route.model)?
                .add_influencees(&route.model, &route.event_type, forwarded)?;
        }
        Ok(())
    }

    fn event_atomic_sinks(&self, event_type: &EventType) -> SimResult<Vec<EventAtomicSink>> {
        if !self.imported.contains(event_type) {
            return Err(ContractError::UndeclaredImport {
                model: self.uri.clone(),
                event_type: event_type.clone(),
            }
            .into());
        }
        let mut sinks = Vec::new();
        for route in self.import_routes.get(event_type).into_iter().flatten() {
            sinks.extend(self.route_sinks(event_type, route)?);
        }
        Ok(sinks)
    }

    fn store_input(&mut self, destination: &ModelUri, events: Vec<Event>) -> SimResult<()> {
        if destination == &self.uri {
            if let Some(event) = events.iter().find(|e| !self.imported.contains(e.event_type())) {
                return Err(ContractError::EventNotImported {
                    model: self.uri.clone(),
                    event_type: event.event_type().clone(),
                }
                .into());
            }
            let mut per_route: Vec<(EventRoute, Vec<Event>)> = Vec::new();
            for event in &events {
                for route in self.import_routes.get(event.event_type()).into_iter().flatten() {
                    let converted = EventConverter::between(event.event_type(), &route.event_type).apply(event);
                    match per_route.iter_mut().find(|(r, _)| r == route) {
                        Some((_, batch)) => batch.push(converted),
                        None => per_route.push((route.clone(), vec![converted])),
                    }
                }
            }
            for (route, batch) in per_route {
                self.child_mut(&route.model)?.store_input(&route.model, batch)?;
            }
            return Ok(());
        }

        let mut target = None;
        for (child_uri, child) in &self.children {
            if child_uri == destination || child.is_descendant(destination)? {
                target = Some(child_uri.clone());
                break;
            }
        }
        match target {
            Some(child_uri) => self.child_mut(&child_uri)?.store_input(destination, events),
            None => Err(PreconditionError::UnknownDestination {
                unit: self.uri.clone(),
                destination: destination.clone(),
            }
            .into()),
        }
    }

    fn as_local(&mut self) -> SimResult<&mut dyn LocalModelOps> {
        Err(SimError::invalid_state("coupled model", self.uri.as_str(), "as_local"))
    }
}
