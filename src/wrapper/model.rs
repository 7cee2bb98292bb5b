//! Proxy for an atomic model held by another unit.

use std::collections::BTreeSet;
use std::fmt;

use crate::config::RunParameters;
use crate::error::{SimError, SimResult};
use crate::event::{Event, EventAtomicSink, EventType};
use crate::model::{LocalModelOps, ModelOps};
use crate::time::TimeUnit;
use crate::transport::{Connection, ModelRequest, Reply, Request};
use crate::uri::{EndpointUri, ModelUri};

use super::{call_unit, verify_uri};

/// Model-access calls shared by the model wrappers.
pub(crate) struct ModelPort {
    pub(crate) connection: Connection,
    pub(crate) uri: ModelUri,
}

impl ModelPort {
    pub(crate) fn new(connection: Connection, uri: ModelUri) -> SimResult<Self> {
        verify_uri(&connection, Request::Model(ModelRequest::Uri), &uri)?;
        Ok(Self { connection, uri })
    }

    pub(crate) fn call(&self, request: ModelRequest) -> SimResult<Reply> {
        self.connection.call(Request::Model(request))
    }

    pub(crate) fn ack(&self, request: ModelRequest) -> SimResult<()> {
        call_unit(&self.connection, Request::Model(request))
    }

    pub(crate) fn uri(&self) -> SimResult<ModelUri> {
        self.call(ModelRequest::Uri)?.into_model()
    }

    pub(crate) fn is_coupled(&self) -> SimResult<bool> {
        self.call(ModelRequest::IsCoupled)?.into_bool()
    }

    pub(crate) fn imported_event_types(&self) -> SimResult<BTreeSet<EventType>> {
        self.call(ModelRequest::ImportedEventTypes)?.into_event_types()
    }

    pub(crate) fn exported_event_types(&self) -> SimResult<BTreeSet<EventType>> {
        self.call(ModelRequest::ExportedEventTypes)?.into_event_types()
    }

    pub(crate) fn is_imported_event_type(&self, event_type: &EventType) -> SimResult<bool> {
        self.call(ModelRequest::IsImportedEventType {
            event_type: event_type.clone(),
        })?
        .into_bool()
    }

    pub(crate) fn is_exported_event_type(&self, event_type: &EventType) -> SimResult<bool> {
        self.call(ModelRequest::IsExportedEventType {
            event_type: event_type.clone(),
        })?
        .into_bool()
    }

    pub(crate) fn time_unit(&self) -> SimResult<TimeUnit> {
        self.call(ModelRequest::TimeUnit)?.into_time_unit()
    }

    pub(crate) fn set_run_parameters(&self, params: &RunParameters) -> SimResult<()> {
        self.ack(ModelRequest::SetRunParameters { params: params.clone() })
    }

    pub(crate) fn set_parent(&self, address: &EndpointUri) -> SimResult<()> {
        self.ack(ModelRequest::SetParent {
            address: address.clone(),
        })
    }

    pub(crate) fn add_influencees(
        &self,
        model: &ModelUri,
        event_type: &EventType,
        sinks: Vec<EventAtomicSink>,
    ) -> SimResult<()> {
        self.ack(ModelRequest::AddInfluencees {
            model: model.clone(),
            event_type: event_type.clone(),
            sinks,
        })
    }

    pub(crate) fn event_atomic_sinks(&self, event_type: &EventType) -> SimResult<Vec<EventAtomicSink>> {
        self.call(ModelRequest::EventAtomicSinks {
            event_type: event_type.clone(),
        })?
        .into_sinks()
    }

    pub(crate) fn store_input(&self, destination: &ModelUri, events: Vec<Event>) -> SimResult<()> {
        self.ack(ModelRequest::StoreInput {
            destination: destination.clone(),
            events,
        })
    }

    pub(crate) fn refuse_local(&self) -> SimError {
        SimError::cross_boundary("as_local", &self.uri)
    }
}

/// Stands for an atomic model held by another unit.
pub struct ModelWrapper {
    port: ModelPort,
}

impl ModelWrapper {
    /// Wraps the model-access endpoint behind `connection`.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint does not answer, or answers as another model.
    pub fn new(connection: Connection, uri: ModelUri) -> SimResult<Self> {
        Ok(Self {
            port: ModelPort::new(connection, uri)?,
        })
    }

    /// URI the wrapped model answered with when the wrapper was created.
    #[must_use]
    pub const fn model_uri(&self) -> &ModelUri {
        &self.port.uri
    }
}

impl fmt::Debug for ModelWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelWrapper")
            .field("uri", &self.port.uri)
            .field("connection", &self.port.connection)
            .finish()
    }
}

impl ModelOps for ModelWrapper {
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

    /// An atomic model has no descendants; nothing to ask.
    fn is_descendant(&self, _uri: &ModelUri) -> SimResult<bool> {
        Ok(false)
    }

    fn time_unit(&self) -> SimResult<TimeUnit> {
        self.port.time_unit()
    }

    fn set_simulation_run_parameters(&mut self, params: &RunParameters) -> SimResult<()> {
        self.port.set_run_parameters(params)
    }

    fn set_parent(&mut self, address: &EndpointUri) -> SimResult<()> {
        self.port.set_parent(address)
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
