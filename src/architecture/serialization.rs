//! Architecture serialization helpers.
//!
//! Serde already provides JSON serialization. This module centralizes the
//! helpers used by supervisors that load architectures from documents and
//! keeps formatting stable.

use crate::architecture::ArchitectureDescriptor;
use crate::error::{PreconditionError, SimError, SimResult};

/// Serialize an architecture to pretty JSON.
///
/// # Errors
///
/// Returns `SimError::Internal` if serialization fails.
pub fn to_json_pretty(arch: &ArchitectureDescriptor) -> SimResult<String> {
    serde_json::to_string_pretty(arch).map_err(|e| SimError::internal(format!("serialize architecture: {e}")))
}

/// Deserialize and validate an architecture from JSON.
///
/// # Errors
///
/// Returns `PreconditionError::InvalidArchitecture` if the document is malformed
/// or describes an invalid composition.
pub fn from_json(s: &str) -> SimResult<ArchitectureDescriptor> {
    serde_json::from_str::<ArchitectureDescriptor>(s).map_err(|e| {
        PreconditionError::InvalidArchitecture {
            reason: format!("deserialize architecture: {e}"),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::tests::house;

    #[test]
    fn json_roundtrip_works() {
        let arch = house();
        let json = to_json_pretty(&arch).unwrap();
        let decoded = from_json(&json).unwrap();
        assert_eq!(arch, decoded);
    }

    #[test]
    fn invalid_documents_are_rejected_on_load() {
        let json = r#"{
            "uri": "broken",
            "root": "house",
            "time_unit": "hours",
            "models": [
                {"uri": "house", "role": "coupled", "host": "h0", "submodels": ["ac"]}
            ]
        }"#;
        let err = from_json(json).unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("submodel ac of house is not described"));
    }
}
