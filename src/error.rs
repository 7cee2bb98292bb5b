//! Error types for distdevs.
//!
//! All errors are strongly typed using thiserror. The taxonomy mirrors the
//! four failure classes of the coordination layer: precondition violations,
//! contract mismatches, remote call failures and invalid cross-boundary calls.
//! Errors are serializable so that a failure raised inside a remote unit
//! travels back to the caller unchanged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::EventType;
use crate::uri::{EndpointRole, EndpointUri, HostAddress, ModelUri};

/// An operation was called with invalid input or out of sequence.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum PreconditionError {
    #[error("Architecture already set on unit {uri}")]
    ArchitectureAlreadySet {
        uri: ModelUri,
    },

    #[error("No architecture set on unit {uri}")]
    ArchitectureNotSet {
        uri: ModelUri,
    },

    #[error("Architecture root {actual} does not match unit {expected}")]
    RootMismatch {
        expected: ModelUri,
        actual: ModelUri,
    },

    #[error("Simulation engine already built for {uri}")]
    EngineAlreadyBuilt {
        uri: ModelUri,
    },

    #[error("Simulation engine not built for {uri}")]
    EngineNotBuilt {
        uri: ModelUri,
    },

    #[error("Parent {link} connection already set on {uri}")]
    ParentAlreadySet {
        uri: ModelUri,
        link: String,
    },

    #[error("Unit {unit} has no descendant {destination}")]
    UnknownDestination {
        unit: ModelUri,
        destination: ModelUri,
    },

    #[error("Model {uri} is not part of the architecture")]
    UnknownModel {
        uri: ModelUri,
    },

    #[error("Influence set of {uri} is sealed for the current run")]
    InfluenceSetSealed {
        uri: ModelUri,
    },

    #[error("Operation '{operation}' is not valid for {component} in state {state}")]
    InvalidState {
        component: String,
        state: String,
        operation: String,
    },

    #[error("Simulation of {uri} has not ended yet")]
    SimulationNotEnded {
        uri: ModelUri,
    },

    #[error("Simulation of {uri} is still running")]
    SimulationRunning {
        uri: ModelUri,
    },

    #[error("Model {uri} is not configured for real-time simulation")]
    NotRealTime {
        uri: ModelUri,
    },

    #[error("Invalid architecture: {reason}")]
    InvalidArchitecture {
        reason: String,
    },

    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        reason: String,
    },
}

/// Declared event types do not line up between a model and its architecture.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ContractError {
    #[error("Architecture routes imported event type '{event_type}' into {model}, which does not import it")]
    UndeclaredImport {
        model: ModelUri,
        event_type: EventType,
    },

    #[error("Architecture routes exported event type '{event_type}' out of {model}, which does not export it")]
    UndeclaredExport {
        model: ModelUri,
        event_type: EventType,
    },

    #[error("Model {model} does not import events of type '{event_type}'")]
    EventNotImported {
        model: ModelUri,
        event_type: EventType,
    },
}

/// The call transport could not reach, or got an error from, a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TransportError {
    #[error("Host not registered: {host}")]
    HostNotFound {
        host: HostAddress,
    },

    #[error("Host {host} exposes no {role} endpoint")]
    EndpointNotFound {
        host: HostAddress,
        role: EndpointRole,
    },

    #[error("Endpoint unavailable: {endpoint}")]
    EndpointUnavailable {
        endpoint: EndpointUri,
    },

    #[error("Endpoint already bound: {endpoint}")]
    AlreadyBound {
        endpoint: EndpointUri,
    },

    #[error("Connection to {endpoint} is closed")]
    ConnectionClosed {
        endpoint: EndpointUri,
    },

    #[error("Failed to encode or decode a call: {message}")]
    Encoding {
        message: String,
    },

    #[error("Endpoint {endpoint} does not serve {request} requests")]
    UnsupportedRequest {
        endpoint: EndpointUri,
        request: String,
    },

    #[error("Unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        expected: String,
        actual: String,
    },
}

/// Top-level error type for distdevs.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum SimError {
    #[error("Precondition violated: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("Contract mismatch: {0}")]
    Contract(#[from] ContractError),

    #[error("Remote call failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Operation '{operation}' cannot be called across the boundary to {uri}")]
    CrossBoundary {
        operation: String,
        uri: ModelUri,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl SimError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid cross-boundary call error.
    #[must_use]
    pub fn cross_boundary(operation: impl Into<String>, uri: &ModelUri) -> Self {
        Self::CrossBoundary {
            operation: operation.into(),
            uri: uri.clone(),
        }
    }

    /// Creates an invalid-state precondition error.
    #[must_use]
    pub fn invalid_state(
        component: impl Into<String>,
        state: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Precondition(PreconditionError::InvalidState {
            component: component.into(),
            state: state.into(),
            operation: operation.into(),
        })
    }

    /// Returns true if this is a precondition violation.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }

    /// Returns true if this is a contract mismatch.
    #[must_use]
    pub const fn is_contract(&self) -> bool {
        matches!(self, Self::Contract(_))
    }

    /// Returns true if this is a remote call failure.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if a proxy refused a locally-only operation.
    #[must_use]
    pub const fn is_cross_boundary(&self) -> bool {
        matches!(self, Self::CrossBoundary { .. })
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if resetting and retrying the whole architecture may help.
    ///
    /// This layer never retries by itself; the answer is for the supervisor.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => matches!(
                e,
                TransportError::HostNotFound { .. }
                    | TransportError::EndpointNotFound { .. }
                    | TransportError::EndpointUnavailable { .. }
            ),
            Self::Precondition(_) | Self::Contract(_) | Self::CrossBoundary { .. } | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for distdevs operations.
pub type SimResult<T> = Result<T, SimError>;

pub(crate) fn lock_poisoned(context: &'static str) -> SimError {
    SimError::internal(format!("poisoned lock: {context}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_parent_already_set() {
        let err = PreconditionError::ParentAlreadySet {
            uri: ModelUri::new("ac"),
            link: "model".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("ac"));
        assert!(msg.contains("already set"));
    }

    #[test]
    fn test_contract_event_not_imported() {
        let err = ContractError::EventNotImported {
            model: ModelUri::new("meter"),
            event_type: EventType::new("SwitchOn"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("meter"));
        assert!(msg.contains("SwitchOn"));
    }

    #[test]
    fn test_transport_endpoint_not_found() {
        let err = TransportError::EndpointNotFound {
            host: HostAddress::new("host-a"),
            role: EndpointRole::EngineAccess,
        };
        let msg = format!("{err}");
        assert!(msg.contains("host-a"));
        assert!(msg.contains("engine-access"));
    }

    #[test]
    fn test_sim_error_from_precondition() {
        let err: SimError = PreconditionError::EngineNotBuilt {
            uri: ModelUri::new("ac"),
        }
        .into();
        assert!(err.is_precondition());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_sim_error_cross_boundary() {
        let err = SimError::cross_boundary("internal_transition", &ModelUri::new("ac"));
        assert!(err.is_cross_boundary());
        let msg = format!("{err}");
        assert!(msg.contains("internal_transition"));
        assert!(msg.contains("ac"));
    }

    #[test]
    fn test_sim_error_retryable() {
        // Not retryable
        let err1: SimError = ContractError::UndeclaredExport {
            model: ModelUri::new("ac"),
            event_type: EventType::new("Heat"),
        }
        .into();
        assert!(!err1.is_retryable());

        let err2: SimError = TransportError::ConnectionClosed {
            endpoint: EndpointUri::new("host-a/ac/model-access"),
        }
        .into();
        assert!(!err2.is_retryable());

        // Retryable
        let err3: SimError = TransportError::HostNotFound {
            host: HostAddress::new("host-z"),
        }
        .into();
        assert!(err3.is_retryable());
    }

    #[test]
    fn test_sim_error_survives_json() {
        let err: SimError = PreconditionError::RootMismatch {
            expected: ModelUri::new("house"),
            actual: ModelUri::new("ac"),
        }
        .into();
        let bytes = serde_json::to_vec(&err).unwrap();
        let decoded: SimError = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(err, decoded);
    }
}
