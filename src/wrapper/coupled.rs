//! Proxy for a coupled model held by another coordinator unit.

use std::collections::BTreeSet;
use std::fmt;

use crate::config::RunParameters;
use crate::error::SimResult;
use crate::event::{Event, EventAtomicSink, EventType};
use crate::model::{LocalModelOps, ModelOps};
use crate::time::TimeUnit;
use crate::transport::{Connection, ModelRequest};
use crate::uri::{EndpointUri, ModelUri};

use super::model::ModelPort;

/// Stands for a coupled model held by another coordinator unit.
///
/// Unlike `ModelWrapper`, structural queries are forwarded: a parent needs to
/// know whether a URI lies inside a remote subtree before routing into it.
pub struct CoupledModelWrapper {
    port: ModelPort,
    parent: Option<EndpointUri>,
}

impl CoupledModelWrapper {
    /// Wraps the model-access endpoint behind `connection`.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint does not answer, or answers as another model.
    pub fn new(connection: Connection, uri: ModelUri) -> SimResult<Self> {
        Ok(Self {
            port: ModelPort::new(connection, uri)?,
            parent: None,
        })
    }

    /// URI the wrapped model answered with when the wrapper was created.
    #[must_use]
    pub const fn model_uri(&self) -> &ModelUri {
        &self.port.uri
    }

    /// Parent address forwarded through this wrapper, if any.
    #[must_use]
    pub const fn parent(&self) -> Option<&EndpointUri> {
        self.parent.as_ref()
    }
}

impl fmt::Debug for CoupledModelWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoupledModelWrapper")
            .field("uri", &self.port.uri)
            .field("parent", &self.parent)
            .field("connection", &self.port.connection)
            .finish()
    }
}

impl ModelOps for CoupledModelWrapper {
    fn uri(&self) -> SimResult<ModelUri> {
        self.port.uri()
    }

    fn is_coupled(&self) -> SimResult<bool> {
        self.port.is_coupled()
    }

    fn imported_event_types(&self) -> SimResult<BTreeSet<EventType>> {
        self.port.imported_event_types()
    }

    fn exported_event_types(&self) -> SimResult<BTreeSet<EventType>> {
        self.port.exported_event_types()
    }

    fn is_imported_event_type(&self, event_type: &EventType) -> SimResult<bool> {
        self.port.is_imported_event_type(event_type)
    }

    fn is_exported_event_type(&self, event_type: &EventType) -> SimResult<bool> {
        self.port.is_exported_event_type(event_type)
    }

    fn is_descendant(&self, uri: &ModelUri) -> SimResult<bool> {
        self.port
            .call(ModelRequest::IsDescendant { uri: uri.clone() })?
            .into_bool()
    }

    fn time_unit(&self) -> SimResult<TimeUnit> {
        self.port.time_unit()
    }

    fn set_simulation_run_parameters(&mut self, params: &RunParameters) -> SimResult<()> {
        self.port.set_run_parameters(params)
    }

    fn set_parent(&mut self, address: &EndpointUri) -> SimResult<()> {
        self.port.set_parent(address)?;
        self.parent = Some(address.clone());
        Ok(())
    }

    fn add_influencees(
        &mut self,
        model: &ModelUri,
        event_type: &EventType,
        sinks: Vec<EventAtomicSink>,
    ) -> SimResult<()> {
        self.port.add_influencees(model, event_type, sinks)
    }

    fn event_atomic_sinks(&self, event_type: &EventType) -> SimResult<Vec<EventAtomicSink>> {
        self.port.event_atomic_sinks(event_type)
    }

    fn store_input(&mut self, destination: &ModelUri, events: Vec<Event>) -> SimResult<()> {
        self.port.store_input(destination, events)
    }

    fn as_local(&mut self) -> SimResult<&mut dyn LocalModelOps> {
        Err(self.port.refuse_local())
    }

    fn connection(&self) -> Option<&Connection> {
        Some(&self.port.connection)
    }
}
