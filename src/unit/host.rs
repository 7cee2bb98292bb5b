//! Hosts and their naming/reflection facility.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, warn};

use crate::config::RealTimeConfig;
use crate::error::{lock_poisoned, PreconditionError, SimResult, TransportError};
use crate::model::BehaviorFactory;
use crate::transport::{Endpoint, InProcessNetwork, ReflectionRequest, Reply, Request};
use crate::uri::{EndpointRole, EndpointUri, HostAddress, ModelUri};

use super::{bind_unit, unbind_unit, AtomicSimulationUnit, CoordinatorUnit, RunManagement};

/// The unit a host currently holds.
#[derive(Debug, Clone, Default)]
pub enum HostedUnit {
    /// Nothing installed yet.
    #[default]
    Empty,
    /// An atomic unit, created with the host.
    Atomic(Arc<AtomicSimulationUnit>),
    /// A coordinator installed during construction of a parent.
    Coordinator(Arc<CoordinatorUnit>),
}

impl HostedUnit {
    fn uri(&self) -> Option<&ModelUri> {
        match self {
            Self::Empty => None,
            Self::Atomic(unit) => Some(unit.model_uri()),
            Self::Coordinator(unit) => Some(unit.model_uri()),
        }
    }
}

/// One host address on an in-process network, holding at most one unit.
pub struct Host {
    address: HostAddress,
    network: Arc<InProcessNetwork>,
    config: RealTimeConfig,
    unit: Mutex<HostedUnit>,
}

impl Host {
    /// Registers an empty host, ready to receive a coordinator.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::AlreadyBound` if the address is registered.
    pub fn empty(network: &Arc<InProcessNetwork>, address: impl Into<HostAddress>, config: RealTimeConfig) -> SimResult<Arc<Self>> {
        let host = Arc::new(Self {
            address: address.into(),
            network: Arc::clone(network),
            config,
            unit: Mutex::new(HostedUnit::Empty),
        });
        let reflection = Arc::new(Reflection {
            host: Arc::downgrade(&host),
        });
        network.register_host(&host.address, reflection)?;
        info!(host = %host.address, "Host registered");
        Ok(host)
    }

    /// Registers a host holding the atomic model `uri`, built from `factory`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::AlreadyBound` if the address or one of the
    /// unit's endpoints is taken.
    pub fn atomic(
        network: &Arc<InProcessNetwork>,
        address: impl Into<HostAddress>,
        uri: impl Into<ModelUri>,
        factory: BehaviorFactory,
        config: RealTimeConfig,
    ) -> SimResult<Arc<Self>> {
        let host = Self::empty(network, address, config)?;
        let uri = uri.into();
        let unit = AtomicSimulationUnit::new(
            uri.clone(),
            host.address.clone(),
            factory,
            network.transport(),
            host.config.clone(),
        );
        bind_unit(network, &host.address, &uri, &unit)?;
        *host.lock()? = HostedUnit::Atomic(unit);
        debug!(host = %host.address, uri = %uri, "Atomic unit hosted");
        Ok(host)
    }

    /// Address of this host.
    #[must_use]
    pub const fn address(&self) -> &HostAddress {
        &self.address
    }

    fn lock(&self) -> SimResult<MutexGuard<'_, HostedUnit>> {
        self.unit.lock().map_err(|_| lock_poisoned("host unit"))
    }

    /// The unit currently held.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the host is poisoned.
    pub fn unit(&self) -> SimResult<HostedUnit> {
        Ok(self.lock()?.clone())
    }

    /// URI of the model of the unit currently held.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the host is poisoned.
    pub fn unit_uri(&self) -> SimResult<Option<ModelUri>> {
        Ok(self.lock()?.uri().cloned())
    }

    /// The atomic unit, if this host holds one.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the host is poisoned.
    pub fn atomic_unit(&self) -> SimResult<Option<Arc<AtomicSimulationUnit>>> {
        Ok(match &*self.lock()? {
            HostedUnit::Atomic(unit) => Some(Arc::clone(unit)),
            _ => None,
        })
    }

    /// The coordinator, if one is installed.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the host is poisoned.
    pub fn coordinator_unit(&self) -> SimResult<Option<Arc<CoordinatorUnit>>> {
        Ok(match &*self.lock()? {
            HostedUnit::Coordinator(unit) => Some(Arc::clone(unit)),
            _ => None,
        })
    }

    fn resolve(&self, role: EndpointRole) -> SimResult<Option<EndpointUri>> {
        if role == EndpointRole::Reflection {
            return Ok(Some(EndpointUri::reflection(&self.address)));
        }
        Ok(self
            .lock()?
            .uri()
            .map(|uri| EndpointUri::for_unit(&self.address, uri, role)))
    }

    fn install_coordinator(&self, uri: ModelUri) -> SimResult<()> {
        let mut current = self.lock()?;
        match &*current {
            HostedUnit::Empty => {}
            HostedUnit::Coordinator(unit) if unit.model_uri() == &uri => {
                if unit.is_simulator_set()? {
                    return Err(PreconditionError::ArchitectureAlreadySet { uri }.into());
                }
                debug!(host = %self.address, uri = %uri, "Reusing installed coordinator");
                return Ok(());
            }
            other => {
                return Err(PreconditionError::InvalidArchitecture {
                    reason: format!(
                        "host {} already holds {}, cannot install {uri}",
                        self.address,
                        other.uri().map_or_else(|| "nothing".to_string(), ToString::to_string)
                    ),
                }
                .into())
            }
        }
        let unit = CoordinatorUnit::new(
            uri.clone(),
            self.address.clone(),
            self.network.transport(),
            self.config.clone(),
        );
        bind_unit(&self.network, &self.address, &uri, &unit)?;
        *current = HostedUnit::Coordinator(unit);
        info!(host = %self.address, uri = %uri, "Coordinator installed");
        Ok(())
    }

    fn uninstall_coordinator(&self, uri: &ModelUri) -> SimResult<bool> {
        let mut current = self.lock()?;
        match &*current {
            HostedUnit::Coordinator(unit) if unit.model_uri() == uri => {
                unbind_unit(&self.network, &self.address, uri)?;
                *current = HostedUnit::Empty;
                info!(host = %self.address, uri = %uri, "Coordinator uninstalled");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.address)
            .field("unit", &self.unit.lock().ok().and_then(|u| u.uri().cloned()))
            .finish_non_exhaustive()
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        let uri = self.unit.get_mut().ok().and_then(|u| u.uri().cloned());
        if let Some(uri) = uri {
            if let Err(e) = unbind_unit(&self.network, &self.address, &uri) {
                warn!(host = %self.address, error = %e, "Failed to unbind unit");
            }
        }
        if let Err(e) = self.network.deregister_host(&self.address) {
            warn!(host = %self.address, error = %e, "Failed to deregister host");
        }
    }
}

/// Reflection endpoint of one host.
struct Reflection {
    host: Weak<Host>,
}

impl Endpoint for Reflection {
    fn handle(&self, request: Request) -> SimResult<Reply> {
        let host = self.host.upgrade().ok_or_else(|| TransportError::EndpointUnavailable {
            endpoint: EndpointUri::new("<dropped host>"),
        })?;
        let Request::Reflection(request) = request else {
            return Err(TransportError::UnsupportedRequest {
                endpoint: EndpointUri::reflection(&host.address),
                request: request.surface().to_string(),
            }
            .into());
        };
        let reply = match request {
            ReflectionRequest::HostAddress => Reply::Host(host.address.clone()),
            ReflectionRequest::ResolveEndpoint { role } => Reply::Endpoint(host.resolve(role)?),
            ReflectionRequest::InstallCoordinator { uri } => {
                host.install_coordinator(uri)?;
                Reply::Unit
            }
            ReflectionRequest::UninstallCoordinator { uri } => Reply::Bool(host.uninstall_coordinator(&uri)?),
        };
        Ok(reply)
    }
}
