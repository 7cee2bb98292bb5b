//! Final simulation reports.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::SimTime;
use crate::uri::ModelUri;

/// Report produced by one model at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub model: ModelUri,
    pub end_time: SimTime,
    pub detail: ReportDetail,
}

/// Role-specific content of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ReportDetail {
    Atomic {
        internal_transitions: u64,
        external_transitions: u64,
        /// Whatever the model logic chose to report.
        summary: serde_json::Value,
    },
    Coupled {
        children: Vec<SimulationReport>,
    },
}

impl SimulationReport {
    /// Report of an atomic model.
    #[must_use]
    pub fn atomic(
        model: ModelUri,
        end_time: SimTime,
        internal_transitions: u64,
        external_transitions: u64,
        summary: serde_json::Value,
    ) -> Self {
        Self {
            model,
            end_time,
            detail: ReportDetail::Atomic {
                internal_transitions,
                external_transitions,
                summary,
            },
        }
    }

    /// Report of a coupled model, made of its children's reports.
    #[must_use]
    pub fn coupled(model: ModelUri, end_time: SimTime, children: Vec<SimulationReport>) -> Self {
        Self {
            model,
            end_time,
            detail: ReportDetail::Coupled { children },
        }
    }

    /// Finds the report of `uri` in this report tree.
    #[must_use]
    pub fn find(&self, uri: &ModelUri) -> Option<&SimulationReport> {
        if &self.model == uri {
            return Some(self);
        }
        match &self.detail {
            ReportDetail::Atomic { .. } => None,
            ReportDetail::Coupled { children } => children.iter().find_map(|c| c.find(uri)),
        }
    }

    /// Total number of transitions performed by every atomic model of the tree.
    #[must_use]
    pub fn total_transitions(&self) -> u64 {
        match &self.detail {
            ReportDetail::Atomic {
                internal_transitions,
                external_transitions,
                ..
            } => internal_transitions + external_transitions,
            ReportDetail::Coupled { children } => children.iter().map(Self::total_transitions).sum(),
        }
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match &self.detail {
            ReportDetail::Atomic {
                internal_transitions,
                external_transitions,
                summary,
            } => {
                write!(
                    f,
                    "{pad}{} @ {}: {internal_transitions} internal, {external_transitions} external",
                    self.model, self.end_time
                )?;
                if !summary.is_null() {
                    write!(f, " {summary}")?;
                }
                writeln!(f)
            }
            ReportDetail::Coupled { children } => {
                writeln!(f, "{pad}{} @ {}", self.model, self.end_time)?;
                for child in children {
                    child.write_indented(f, depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn house() -> SimulationReport {
        SimulationReport::coupled(
            ModelUri::new("house"),
            SimTime::new(24.0),
            vec![
                SimulationReport::atomic(ModelUri::new("ac"), SimTime::new(24.0), 5, 1, serde_json::Value::Null),
                SimulationReport::atomic(
                    ModelUri::new("meter"),
                    SimTime::new(24.0),
                    2,
                    6,
                    serde_json::json!({"energy": 12.5}),
                ),
            ],
        )
    }

    #[test]
    fn find_walks_the_tree() {
        let report = house();
        assert!(report.find(&ModelUri::new("meter")).is_some());
        assert!(report.find(&ModelUri::new("fridge")).is_none());
        assert_eq!(report.total_transitions(), 14);
    }

    #[test]
    fn display_indents_children() {
        let text = house().to_string();
        assert!(text.starts_with("house @ 24"));
        assert!(text.contains("\n  meter @ 24: 2 internal, 6 external {\"energy\":12.5}"));
    }
}
