//! Identifiers used across the coordination layer.
//!
//! Models, endpoints, hosts and architectures are addressed by plain string
//! identifiers ("URIs"). Units never hold references to each other: a unit
//! refers to its parent and children only through these addresses, so the
//! parent/child graph has no reference cycles.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from any string-like value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Globally unique identifier of a model. A unit's identity equals its model's URI.
    ModelUri
);

string_id!(
    /// Address of a callable endpoint on the call transport.
    EndpointUri
);

string_id!(
    /// Address of an execution host (the naming facility is reached through it).
    HostAddress
);

string_id!(
    /// Identifier of an architecture descriptor.
    ArchitectureUri
);

/// Kind of endpoint a host can expose for the unit it currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointRole {
    /// The host's naming/reflection facility.
    Reflection,
    /// Model-access surface (URI and type queries, influencees, input).
    ModelAccess,
    /// Engine-access surface (the DEVS step protocol).
    EngineAccess,
    /// Run-management surface (construct, run, report, reinitialise).
    RunManagement,
    /// Supervision surface (final report notifications).
    Supervision,
}

impl EndpointRole {
    /// Stable textual name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reflection => "reflection",
            Self::ModelAccess => "model-access",
            Self::EngineAccess => "engine-access",
            Self::RunManagement => "run-management",
            Self::Supervision => "supervision",
        }
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EndpointUri {
    /// Endpoint address of the given role for the unit of `model` held by `host`.
    #[must_use]
    pub fn for_unit(host: &HostAddress, model: &ModelUri, role: EndpointRole) -> Self {
        Self(format!("{host}/{model}/{role}"))
    }

    /// Endpoint address of the naming/reflection facility of `host`.
    #[must_use]
    pub fn reflection(host: &HostAddress) -> Self {
        Self(format!("{host}/{}", EndpointRole::Reflection))
    }
}

/// Identifier of one construct-and-run session started by a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one open connection on the call transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new random connection ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_endpoints_are_distinct_per_role() {
        let host = HostAddress::new("host-a");
        let model = ModelUri::new("ac");
        let m = EndpointUri::for_unit(&host, &model, EndpointRole::ModelAccess);
        let e = EndpointUri::for_unit(&host, &model, EndpointRole::EngineAccess);
        assert_ne!(m, e);
        assert_eq!(m.as_str(), "host-a/ac/model-access");
        assert_eq!(EndpointUri::reflection(&host).as_str(), "host-a/reflection");
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let uri = ModelUri::new("house");
        assert_eq!(serde_json::to_string(&uri).unwrap(), "\"house\"");
        let role: EndpointRole = serde_json::from_str("\"run-management\"").unwrap();
        assert_eq!(role, EndpointRole::RunManagement);
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
