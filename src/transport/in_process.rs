//! In-process call transport.
//!
//! Endpoints are registered in a shared table keyed by URI. A call looks the
//! callee up, releases the table and runs the handler in the caller's thread,
//! so a callee may itself call further endpoints (including back into the
//! caller's host) without holding any transport lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::config::NetworkConfig;
use crate::error::{lock_poisoned, SimResult, TransportError};
use crate::uri::{EndpointUri, HostAddress};

use super::{Endpoint, Reply, Request, Transport};

/// A set of hosts and endpoints living in one process.
pub struct InProcessNetwork {
    config: NetworkConfig,
    endpoints: RwLock<HashMap<EndpointUri, Arc<dyn Endpoint>>>,
    hosts: RwLock<HashMap<HostAddress, EndpointUri>>,
    calls: AtomicU64,
}

impl InProcessNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new(config: NetworkConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            endpoints: RwLock::new(HashMap::new()),
            hosts: RwLock::new(HashMap::new()),
            calls: AtomicU64::new(0),
        })
    }

    /// This network as a shareable transport handle.
    #[must_use]
    pub fn transport(self: &Arc<Self>) -> Arc<dyn Transport> {
        Arc::clone(self) as Arc<dyn Transport>
    }

    /// Settings of this network.
    #[must_use]
    pub const fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Binds `endpoint` at `uri`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::AlreadyBound` if `uri` is taken.
    pub fn bind(&self, uri: EndpointUri, endpoint: Arc<dyn Endpoint>) -> SimResult<()> {
        let mut endpoints = self.endpoints.write().map_err(|_| lock_poisoned("network endpoints"))?;
        if endpoints.contains_key(&uri) {
            return Err(TransportError::AlreadyBound { endpoint: uri }.into());
        }
        debug!(endpoint = %uri, "Endpoint bound");
        endpoints.insert(uri, endpoint);
        Ok(())
    }

    /// Unbinds `uri`. Returns whether something was bound there.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the endpoint table is poisoned.
    pub fn unbind(&self, uri: &EndpointUri) -> SimResult<bool> {
        let mut endpoints = self.endpoints.write().map_err(|_| lock_poisoned("network endpoints"))?;
        let removed = endpoints.remove(uri).is_some();
        if removed {
            debug!(endpoint = %uri, "Endpoint unbound");
        }
        Ok(removed)
    }

    /// Registers the naming/reflection facility of `host`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::AlreadyBound` if the host is already registered.
    pub fn register_host(&self, host: &HostAddress, reflection: Arc<dyn Endpoint>) -> SimResult<()> {
        let uri = EndpointUri::reflection(host);
        self.bind(uri.clone(), reflection)?;
        self.hosts
            .write()
            .map_err(|_| lock_poisoned("network hosts"))?
            .insert(host.clone(), uri);
        Ok(())
    }

    /// Removes `host` and its reflection endpoint.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if a table is poisoned.
    pub fn deregister_host(&self, host: &HostAddress) -> SimResult<()> {
        let uri = self
            .hosts
            .write()
            .map_err(|_| lock_poisoned("network hosts"))?
            .remove(host);
        if let Some(uri) = uri {
            self.unbind(&uri)?;
        }
        Ok(())
    }

    /// Number of endpoints currently bound.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Number of calls delivered since the network was created.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn lookup(&self, endpoint: &EndpointUri) -> SimResult<Arc<dyn Endpoint>> {
        let endpoints = self.endpoints.read().map_err(|_| lock_poisoned("network endpoints"))?;
        endpoints.get(endpoint).cloned().ok_or_else(|| {
            TransportError::EndpointUnavailable {
                endpoint: endpoint.clone(),
            }
            .into()
        })
    }
}

fn encoding_error(e: &serde_json::Error) -> crate::error::SimError {
    TransportError::Encoding { message: e.to_string() }.into()
}

fn through_json<T: serde::Serialize + serde::de::DeserializeOwned>(value: &T) -> SimResult<T> {
    let bytes = serde_json::to_vec(value).map_err(|e| encoding_error(&e))?;
    serde_json::from_slice(&bytes).map_err(|e| encoding_error(&e))
}

impl Transport for InProcessNetwork {
    fn invoke(&self, endpoint: &EndpointUri, request: Request) -> SimResult<Reply> {
        let callee = self.lookup(endpoint)?;
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.config.encode_messages {
            return callee.handle(request);
        }

        let request = through_json(&request)?;
        let result = callee.handle(request);
        match through_json(&result) {
            Ok(result) => result,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Reply could not be encoded");
                Err(e)
            }
        }
    }

    fn is_bound(&self, endpoint: &EndpointUri) -> bool {
        self.endpoints
            .read()
            .map(|e| e.contains_key(endpoint))
            .unwrap_or(false)
    }

    fn locate_host(&self, host: &HostAddress) -> SimResult<EndpointUri> {
        let hosts = self.hosts.read().map_err(|_| lock_poisoned("network hosts"))?;
        hosts
            .get(host)
            .cloned()
            .ok_or_else(|| TransportError::HostNotFound { host: host.clone() }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PreconditionError, SimError};
    use crate::transport::{Connection, ManagementRequest};
    use crate::uri::ModelUri;

    struct Echo;

    impl Endpoint for Echo {
        fn handle(&self, request: Request) -> SimResult<Reply> {
            match request {
                Request::Management(ManagementRequest::Uri) => Ok(Reply::Model(ModelUri::new("echo"))),
                _ => Err(PreconditionError::InvalidArgument {
                    reason: "echo only answers uri".to_string(),
                }
                .into()),
            }
        }
    }

    fn network(encode_messages: bool) -> Arc<InProcessNetwork> {
        let net = InProcessNetwork::new(NetworkConfig { encode_messages });
        net.bind(EndpointUri::new("h/echo/run-management"), Arc::new(Echo)).unwrap();
        net
    }

    #[test]
    fn calls_reach_bound_endpoints_and_errors_come_back_unchanged() {
        for encode in [false, true] {
            let net = network(encode);
            let transport = net.transport();
            let conn = Connection::open(&transport, EndpointUri::new("h/echo/run-management")).unwrap();
            let uri = conn.call(Request::Management(ManagementRequest::Uri)).unwrap();
            assert_eq!(uri.into_model().unwrap(), ModelUri::new("echo"));

            let err = conn.call(Request::Management(ManagementRequest::StopSimulation)).unwrap_err();
            assert!(matches!(
                err,
                SimError::Precondition(PreconditionError::InvalidArgument { .. })
            ));
            assert_eq!(net.calls(), 2);
        }
    }

    #[test]
    fn unbound_endpoints_are_unavailable() {
        let net = network(false);
        let err = Connection::open(&net.transport(), EndpointUri::new("h/other/run-management")).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn closed_connections_refuse_calls() {
        let net = network(false);
        let conn = Connection::open(&net.transport(), EndpointUri::new("h/echo/run-management")).unwrap();
        conn.disconnect();
        conn.disconnect();
        assert!(!conn.is_open());
        let err = conn.call(Request::Management(ManagementRequest::Uri)).unwrap_err();
        assert!(matches!(
            err,
            SimError::Transport(TransportError::ConnectionClosed { .. })
        ));
    }

    #[test]
    fn endpoints_bind_once() {
        let net = network(false);
        let err = net
            .bind(EndpointUri::new("h/echo/run-management"), Arc::new(Echo))
            .unwrap_err();
        assert!(err.is_transport());
        assert!(net.unbind(&EndpointUri::new("h/echo/run-management")).unwrap());
        assert_eq!(net.endpoint_count(), 0);
    }

    #[test]
    fn unknown_hosts_are_reported() {
        let net = network(false);
        let err = net.locate_host(&HostAddress::new("nowhere")).unwrap_err();
        assert!(matches!(err, SimError::Transport(TransportError::HostNotFound { .. })));
    }
}
