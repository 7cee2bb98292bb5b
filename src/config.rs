//! Configuration for the call transport, real-time scheduling and supervisors.
//!
//! Every struct has a `Default` and deserializes with missing fields filled
//! from it, so configuration documents only need to name what they change.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PreconditionError, SimResult};

/// Run parameters propagated down the model tree before a run.
pub type RunParameters = BTreeMap<String, serde_json::Value>;

/// In-process call transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Serialize every request and reply to JSON bytes, as a remote channel would.
    pub encode_messages: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            encode_messages: false,
        }
    }
}

/// Real-time scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealTimeConfig {
    /// Max queued scheduler commands per atomic unit.
    pub command_queue_capacity: usize,
    /// Delay between the request and the wall-clock start of a real-time run.
    pub start_delay_ms: u64,
    /// Extra wall-clock time granted to a run before it is considered late.
    pub scheduling_slack_ms: u64,
}

impl Default for RealTimeConfig {
    fn default() -> Self {
        Self {
            command_queue_capacity: 1024,
            start_delay_ms: 50,
            scheduling_slack_ms: 500,
        }
    }
}

impl RealTimeConfig {
    /// Delay before a real-time run starts.
    #[must_use]
    pub const fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    /// Completion slack of a real-time run.
    #[must_use]
    pub const fn scheduling_slack(&self) -> Duration {
        Duration::from_millis(self.scheduling_slack_ms)
    }
}

/// Supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Max final reports buffered before the supervisor drops new ones.
    pub report_queue_capacity: usize,
    pub real_time: RealTimeConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            report_queue_capacity: 16,
            real_time: RealTimeConfig::default(),
        }
    }
}

/// Parses a configuration document, filling missing fields with defaults.
///
/// # Errors
///
/// Returns `PreconditionError::InvalidArgument` if the document is malformed.
pub fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> SimResult<T> {
    serde_json::from_str(s).map_err(|e| {
        PreconditionError::InvalidArgument {
            reason: format!("invalid configuration: {e}"),
        }
        .into()
    })
}
