//! # distdevs - distributed coordination for hierarchical DEVS simulations
//!
//! distdevs runs a DEVS model tree whose atomic and coupled models are held
//! by independent hosts. Every model lives in a unit on its own host; units
//! reach each other only through proxies over a synchronous call transport,
//! so a coordinator drives a remote child exactly as it would a local one.
//!
//! ## Core Concepts
//!
//! - **Architecture**: which model is atomic or coupled, where it is hosted,
//!   and how events are routed between models
//! - **Unit**: owns one model and its engine, serves model-access,
//!   engine-access and run-management endpoints
//! - **Proxy wrappers**: forward the remotable surface, refuse local-only
//!   operations loudly
//! - **Supervisor**: builds the unit tree from an architecture and drives runs
//!
//! ## Usage
//!
//! ```rust
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//!
//! use distdevs::config::{NetworkConfig, RealTimeConfig, SupervisorConfig};
//! use distdevs::model::{AtomicBehavior, BehaviorFactory};
//! use distdevs::{
//!     ArchitectureDescriptor, Emission, Event, EventType, Host, InProcessNetwork, ModelDescriptor,
//!     SimDuration, SimTime, Supervisor, TimeUnit,
//! };
//!
//! struct Clock;
//!
//! impl AtomicBehavior for Clock {
//!     fn imported_event_types(&self) -> BTreeSet<EventType> {
//!         BTreeSet::new()
//!     }
//!     fn exported_event_types(&self) -> BTreeSet<EventType> {
//!         BTreeSet::from([EventType::new("Tick")])
//!     }
//!     fn initialise_state(&mut self, _start: SimTime) {}
//!     fn time_advance(&self) -> SimDuration {
//!         SimDuration::new(1.0)
//!     }
//!     fn output(&self, _time: SimTime) -> Vec<Emission> {
//!         vec![Emission::new("Tick", serde_json::Value::Null)]
//!     }
//!     fn internal_transition(&mut self, _time: SimTime) {}
//!     fn external_transition(&mut self, _time: SimTime, _elapsed: SimDuration, _events: &[Event]) {}
//! }
//!
//! let network = InProcessNetwork::new(NetworkConfig::default());
//! let factory: BehaviorFactory = Arc::new(|| Box::new(Clock) as Box<dyn AtomicBehavior>);
//! let _clock = Host::atomic(&network, "host-clock", "clock", factory, RealTimeConfig::default())?;
//! let _house = Host::empty(&network, "host-house", RealTimeConfig::default())?;
//!
//! let architecture = ArchitectureDescriptor::builder("demo", "house", TimeUnit::Hours)
//!     .model(ModelDescriptor::coupled("house", "host-house", ["clock"]))
//!     .model(ModelDescriptor::atomic("clock", "host-clock").exports(["Tick"]))
//!     .build()?;
//!
//! let supervisor = Supervisor::new(&network, "control", SupervisorConfig::default())?;
//! supervisor.construct_simulator(architecture)?;
//! let report = supervisor.do_standalone_simulation(SimTime::ZERO, SimDuration::new(24.0))?;
//! assert_eq!(report.total_transitions(), 24);
//! supervisor.reinitialise()?;
//! # Ok::<(), distdevs::SimError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod event;
pub mod report;
pub mod time;
pub mod uri;

// Configuration and composition
pub mod architecture;
pub mod config;

// Call transport
pub mod transport;

// Models, engines and their proxies
pub mod engine;
pub mod model;
pub mod wrapper;

// Units, bootstrap and supervision
pub mod bootstrap;
pub mod supervisor;
pub mod unit;

// Re-export primary types at crate root for convenience
pub use architecture::{ArchitectureDescriptor, Coupling, EventRoute, ModelDescriptor, ModelRole};
pub use error::{ContractError, PreconditionError, SimError, SimResult, TransportError};
pub use event::{Emission, Event, EventAtomicSink, EventConverter, EventType};
pub use report::{ReportDetail, SimulationReport};
pub use time::{RealTimeClock, SimDuration, SimTime, TimeUnit};
pub use uri::{ArchitectureUri, EndpointRole, EndpointUri, HostAddress, ModelUri, SessionId};

pub use supervisor::{Supervisor, SupervisorState};
pub use transport::{Connection, InProcessNetwork, Transport};
pub use unit::{AtomicSimulationUnit, CoordinatorUnit, Host, HostedUnit, RunManagement};
