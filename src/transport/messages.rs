//! Requests and replies carried by the call transport.
//!
//! Each endpoint role serves one request family. Replies are a single enum
//! with typed accessors; a reply of the wrong kind is reported as
//! `TransportError::UnexpectedReply` instead of being coerced.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::architecture::ArchitectureDescriptor;
use crate::config::RunParameters;
use crate::error::{SimResult, TransportError};
use crate::event::{Event, EventAtomicSink, EventType};
use crate::report::SimulationReport;
use crate::time::{SimDuration, SimTime, TimeUnit};
use crate::uri::{EndpointRole, EndpointUri, HostAddress, ModelUri};

/// Any call on the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "surface", content = "call", rename_all = "snake_case")]
pub enum Request {
    Reflection(ReflectionRequest),
    Model(ModelRequest),
    Engine(EngineRequest),
    Management(ManagementRequest),
    Supervision(SupervisionRequest),
}

impl Request {
    /// Name of the surface the call belongs to.
    #[must_use]
    pub const fn surface(&self) -> &'static str {
        match self {
            Self::Reflection(_) => "reflection",
            Self::Model(_) => "model",
            Self::Engine(_) => "engine",
            Self::Management(_) => "management",
            Self::Supervision(_) => "supervision",
        }
    }
}

/// Naming/reflection facility of a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReflectionRequest {
    HostAddress,
    ResolveEndpoint { role: EndpointRole },
    InstallCoordinator { uri: ModelUri },
    UninstallCoordinator { uri: ModelUri },
}

/// Model-access surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ModelRequest {
    Uri,
    IsCoupled,
    ImportedEventTypes,
    ExportedEventTypes,
    IsImportedEventType { event_type: EventType },
    IsExportedEventType { event_type: EventType },
    IsDescendant { uri: ModelUri },
    TimeUnit,
    SetRunParameters { params: RunParameters },
    SetParent { address: EndpointUri },
    AddInfluencees {
        model: ModelUri,
        event_type: EventType,
        sinks: Vec<EventAtomicSink>,
    },
    EventAtomicSinks { event_type: EventType },
    StoreInput { destination: ModelUri, events: Vec<Event> },
}

/// Engine-access surface: the DEVS step protocol plus child notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EngineRequest {
    Uri,
    SetParent { address: EndpointUri },
    Initialise { start: SimTime },
    TimeOfLastEvent,
    TimeOfNextEvent,
    NextTimeAdvance,
    CurrentTime,
    ProduceOutput { time: SimTime },
    InternalEventStep { time: SimTime },
    ExternalEventStep { time: SimTime },
    EndSimulation { time: SimTime },
    Report,
    HasReceivedExternalEvents { model: ModelUri },
    HasPerformedExternalEvents { model: ModelUri },
    RunCompleted { model: ModelUri },
}

/// Run-management surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ManagementRequest {
    Uri,
    ConstructSimulator {
        uri: ModelUri,
        architecture: ArchitectureDescriptor,
    },
    IsSimulatorSet,
    ConnectSupervision { address: EndpointUri },
    SetSimulationRunParameters { params: RunParameters },
    InitialiseSimulation {
        start: Option<SimTime>,
        duration: SimDuration,
    },
    DoStandaloneSimulation { start: SimTime, duration: SimDuration },
    StartRealTimeSimulation {
        wall_start: DateTime<Utc>,
        sim_start: SimTime,
        duration: SimDuration,
    },
    IsSimulationRunning,
    StopSimulation,
    FinaliseSimulation,
    GetFinalReport,
    Reinitialise,
}

/// Supervision surface: the only call a supervisor accepts unsolicited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SupervisionRequest {
    AcceptSimulationReport { report: SimulationReport },
}

/// Result of a successful call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reply {
    Unit,
    Bool(bool),
    Model(ModelUri),
    Host(HostAddress),
    Endpoint(Option<EndpointUri>),
    EventTypes(BTreeSet<EventType>),
    TimeUnit(TimeUnit),
    Time(SimTime),
    Duration(SimDuration),
    Sinks(Vec<EventAtomicSink>),
    Report(SimulationReport),
}

macro_rules! reply_accessor {
    ($(#[$meta:meta])* $fn:ident, $variant:ident, $ty:ty) => {
        $(#[$meta])*
        ///
        /// # Errors
        ///
        /// Returns `TransportError::UnexpectedReply` for any other reply kind.
        pub fn $fn(self) -> SimResult<$ty> {
            match self {
                Self::$variant(v) => Ok(v),
                other => Err(other.unexpected(stringify!($variant))),
            }
        }
    };
}

impl Reply {
    /// Name of the reply kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unit => "Unit",
            Self::Bool(_) => "Bool",
            Self::Model(_) => "Model",
            Self::Host(_) => "Host",
            Self::Endpoint(_) => "Endpoint",
            Self::EventTypes(_) => "EventTypes",
            Self::TimeUnit(_) => "TimeUnit",
            Self::Time(_) => "Time",
            Self::Duration(_) => "Duration",
            Self::Sinks(_) => "Sinks",
            Self::Report(_) => "Report",
        }
    }

    fn unexpected(&self, expected: &str) -> crate::error::SimError {
        TransportError::UnexpectedReply {
            expected: expected.to_string(),
            actual: self.kind().to_string(),
        }
        .into()
    }

    /// Expects an empty acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::UnexpectedReply` for any other reply kind.
    pub fn into_unit(self) -> SimResult<()> {
        match self {
            Self::Unit => Ok(()),
            other => Err(other.unexpected("Unit")),
        }
    }

    reply_accessor!(
        /// Expects a boolean.
        into_bool, Bool, bool
    );
    reply_accessor!(
        /// Expects a model URI.
        into_model, Model, ModelUri
    );
    reply_accessor!(
        /// Expects a host address.
        into_host, Host, HostAddress
    );
    reply_accessor!(
        /// Expects an optional endpoint address.
        into_endpoint, Endpoint, Option<EndpointUri>
    );
    reply_accessor!(
        /// Expects a set of event types.
        into_event_types, EventTypes, BTreeSet<EventType>
    );
    reply_accessor!(
        /// Expects a time unit.
        into_time_unit, TimeUnit, TimeUnit
    );
    reply_accessor!(
        /// Expects a simulated time.
        into_time, Time, SimTime
    );
    reply_accessor!(
        /// Expects a simulated duration.
        into_duration, Duration, SimDuration
    );
    reply_accessor!(
        /// Expects event atomic sinks.
        into_sinks, Sinks, Vec<EventAtomicSink>
    );
    reply_accessor!(
        /// Expects a simulation report.
        into_report, Report, SimulationReport
    );
}
