//! Local proxies for models and engines held by other hosts.
//!
//! A wrapper owns one `Connection` and implements the same capability set as
//! the object it stands for, forwarding every call and returning the remote
//! result or failure unchanged. The one thing a wrapper never does is give
//! out local step execution: `ModelOps::as_local` fails with
//! `SimError::CrossBoundary`.
//!
//! Wrappers hold an address, never a reference: a unit owns its children's
//! wrappers by value and refers to its parent only through a wrapper on the
//! parent's endpoint.

mod coordinator;
mod coupled;
mod management;
mod model;
mod simulator;

use crate::error::{SimResult, TransportError};
use crate::transport::{Connection, Reply, Request};
use crate::uri::ModelUri;

pub use coordinator::CoordinatorWrapper;
pub use coupled::CoupledModelWrapper;
pub use management::RunManagementPort;
pub use model::ModelWrapper;
pub use simulator::SimulatorWrapper;

/// Checks that the endpoint behind `connection` answers as `expected`.
///
/// `uri_request` is the surface's own URI query.
pub(crate) fn verify_uri(connection: &Connection, uri_request: Request, expected: &ModelUri) -> SimResult<()> {
    let actual = connection.call(uri_request)?.into_model()?;
    if &actual != expected {
        return Err(TransportError::UnexpectedReply {
            expected: format!("model {expected}"),
            actual: format!("model {actual}"),
        }
        .into());
    }
    Ok(())
}

/// Forwards `request` and expects a plain acknowledgement.
pub(crate) fn call_unit(connection: &Connection, request: Request) -> SimResult<()> {
    connection.call(request).and_then(Reply::into_unit)
}
