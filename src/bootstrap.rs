//! Bootstrap helper used while a tree of units is being constructed.
//!
//! Every function either returns a verified, live connection or fails; none
//! leaves a half-open connection behind. Units pass their own transport in
//! explicitly, there is no ambient registry.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::architecture::ModelDescriptor;
use crate::engine::EngineOps;
use crate::error::{PreconditionError, SimResult, TransportError};
use crate::model::ModelOps;
use crate::transport::{Connection, EngineRequest, ModelRequest, ReflectionRequest, Request, Transport};
use crate::uri::{EndpointRole, EndpointUri, HostAddress, ModelUri};
use crate::wrapper::{
    CoordinatorWrapper, CoupledModelWrapper, ModelWrapper, RunManagementPort, SimulatorWrapper,
};

/// Handle on the reflection facility of the host holding one model.
pub struct ComponentHandle {
    host: HostAddress,
    model: ModelUri,
    coupled: bool,
    reflection: Connection,
    transport: Arc<dyn Transport>,
}

impl ComponentHandle {
    /// Host holding the model.
    #[must_use]
    pub const fn host(&self) -> &HostAddress {
        &self.host
    }

    /// The model this handle was opened for.
    #[must_use]
    pub const fn model(&self) -> &ModelUri {
        &self.model
    }

    /// Returns true if the model is coupled (the host runs a coordinator for it).
    #[must_use]
    pub const fn is_coupled(&self) -> bool {
        self.coupled
    }

    /// Endpoint of the given role on the host.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::EndpointNotFound` if the host exposes no
    /// such endpoint.
    pub fn resolve(&self, role: EndpointRole) -> SimResult<EndpointUri> {
        self.reflection
            .call(Request::Reflection(ReflectionRequest::ResolveEndpoint { role }))?
            .into_endpoint()?
            .ok_or_else(|| {
                TransportError::EndpointNotFound {
                    host: self.host.clone(),
                    role,
                }
                .into()
            })
    }

    fn open(&self, role: EndpointRole) -> SimResult<Connection> {
        let endpoint = self.resolve(role)?;
        Connection::open(&self.transport, endpoint)
    }

    /// Asks the host to drop the coordinator installed for the model.
    ///
    /// # Errors
    ///
    /// Whatever the host fails with.
    pub fn uninstall(&self) -> SimResult<bool> {
        let removed = self
            .reflection
            .call(Request::Reflection(ReflectionRequest::UninstallCoordinator {
                uri: self.model.clone(),
            }))?
            .into_bool()?;
        if removed {
            info!(host = %self.host, uri = %self.model, "Coordinator uninstalled");
        }
        Ok(removed)
    }

    /// Closes the reflection connection.
    pub fn disconnect(&self) {
        self.reflection.disconnect();
    }
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("host", &self.host)
            .field("model", &self.model)
            .field("coupled", &self.coupled)
            .finish_non_exhaustive()
    }
}

/// Connects to the host of `descriptor` and, for a coupled model, installs a
/// fresh coordinator unit there.
///
/// # Errors
///
/// Returns `TransportError::HostNotFound` if the host is not registered,
/// `PreconditionError::InvalidArchitecture` if it answers under another
/// address, or whatever the installation fails with.
pub fn connect_component(transport: &Arc<dyn Transport>, descriptor: &ModelDescriptor) -> SimResult<ComponentHandle> {
    let reflection = Connection::open(transport, transport.locate_host(&descriptor.host)?)?;
    let address = reflection
        .call(Request::Reflection(ReflectionRequest::HostAddress))?
        .into_host()?;
    if address != descriptor.host {
        return Err(PreconditionError::InvalidArchitecture {
            reason: format!("host {} answers as {address}", descriptor.host),
        }
        .into());
    }
    let coupled = descriptor.is_coupled();
    if coupled {
        reflection
            .call(Request::Reflection(ReflectionRequest::InstallCoordinator {
                uri: descriptor.uri.clone(),
            }))?
            .into_unit()?;
        debug!(host = %address, uri = %descriptor.uri, "Coordinator installed");
    }
    Ok(ComponentHandle {
        host: address,
        model: descriptor.uri.clone(),
        coupled,
        reflection,
        transport: Arc::clone(transport),
    })
}

/// Opens the run-management port of `uri`.
///
/// # Errors
///
/// Fails if the endpoint cannot be resolved, reached, or answers as another model.
pub fn connect_management_port(handle: &ComponentHandle, uri: &ModelUri) -> SimResult<RunManagementPort> {
    RunManagementPort::new(handle.open(EndpointRole::RunManagement)?, uri.clone())
}

/// Opens the model-access port of `uri`, wrapped for its role.
///
/// # Errors
///
/// Fails if the endpoint cannot be resolved, reached, or answers as another model.
pub fn connect_model_port(handle: &ComponentHandle, uri: &ModelUri) -> SimResult<Box<dyn ModelOps>> {
    let connection = handle.open(EndpointRole::ModelAccess)?;
    Ok(if handle.is_coupled() {
        Box::new(CoupledModelWrapper::new(connection, uri.clone())?)
    } else {
        Box::new(ModelWrapper::new(connection, uri.clone())?)
    })
}

/// Opens the engine-access port of `uri`, wrapped for its role.
///
/// # Errors
///
/// Fails if the endpoint cannot be resolved, reached, or answers as another model.
pub fn connect_simulator_port(handle: &ComponentHandle, uri: &ModelUri) -> SimResult<Box<dyn EngineOps>> {
    let connection = handle.open(EndpointRole::EngineAccess)?;
    Ok(if handle.is_coupled() {
        Box::new(CoordinatorWrapper::new(connection, uri.clone())?)
    } else {
        Box::new(SimulatorWrapper::new(connection, uri.clone())?)
    })
}

/// Opens the engine-access port of an atomic unit, for real-time queries.
///
/// # Errors
///
/// Fails if the endpoint cannot be resolved, reached, or answers as another model.
pub fn connect_real_time_engine(handle: &ComponentHandle, uri: &ModelUri) -> SimResult<SimulatorWrapper> {
    SimulatorWrapper::new(handle.open(EndpointRole::EngineAccess)?, uri.clone())
}

/// Opens the upward link from a child to the parent engine at `address`.
///
/// # Errors
///
/// Fails if nothing answers at `address`.
pub fn connect_parent_engine(transport: &Arc<dyn Transport>, address: &EndpointUri) -> SimResult<CoordinatorWrapper> {
    let connection = Connection::open(transport, address.clone())?;
    let uri = connection
        .call(Request::Engine(EngineRequest::Uri))?
        .into_model()?;
    CoordinatorWrapper::new(connection, uri)
}

/// Opens the upward link from a child to the parent model at `address`.
///
/// # Errors
///
/// Fails if nothing answers at `address`.
pub fn connect_parent_model(transport: &Arc<dyn Transport>, address: &EndpointUri) -> SimResult<CoupledModelWrapper> {
    let connection = Connection::open(transport, address.clone())?;
    let uri = connection
        .call(Request::Model(ModelRequest::Uri))?
        .into_model()?;
    CoupledModelWrapper::new(connection, uri)
}

/// Opens an event-delivery connection to the model-access endpoint of the
/// unit held by `host`.
///
/// # Errors
///
/// Fails if the host is unknown or exposes no model-access endpoint.
pub fn connect_delivery_port(transport: &Arc<dyn Transport>, host: &HostAddress) -> SimResult<Connection> {
    let reflection = Connection::open(transport, transport.locate_host(host)?)?;
    let endpoint = reflection
        .call(Request::Reflection(ReflectionRequest::ResolveEndpoint {
            role: EndpointRole::ModelAccess,
        }))?
        .into_endpoint()?
        .ok_or_else(|| TransportError::EndpointNotFound {
            host: host.clone(),
            role: EndpointRole::ModelAccess,
        })?;
    reflection.disconnect();
    Connection::open(transport, endpoint)
}
