//! How far a failing probe visibly travels before it is dropped.
//!
//! Only drives partial-failure animation; it has no say in the verdict.

use super::FailureKind;
use crate::topology::{DeviceId, DeviceKind, Topology};

/// Hop index along `path` at which a probe stops.
///
/// `None` (a reachable verdict) travels the whole path. Local configuration
/// failures never leave the source. Routing failures stop at the last
/// switch or hub in front of the first router (or the last one on a
/// router-less path), defaulting to hop 1 when no such relay exists. The
/// result is always a valid index into a non-empty `path`.
pub fn estimate_reachable_hop_index(
    topology: &Topology,
    failure: Option<FailureKind>,
    path: &[DeviceId],
) -> usize {
    let last = path.len().saturating_sub(1);
    let Some(failure) = failure else {
        return last;
    };

    match failure {
        FailureKind::InvalidConfig | FailureKind::InvalidGateway => 0,
        FailureKind::NoRouterOnPath | FailureKind::GatewayNotFound => {
            let first_router = path
                .iter()
                .position(|id| kind_at(topology, *id).is_some_and(DeviceKind::is_router))
                .unwrap_or(path.len());

            path[..first_router]
                .iter()
                .enumerate()
                .skip(1)
                .rev()
                .find(|(_, id)| kind_at(topology, **id).is_some_and(DeviceKind::is_relay))
                .map_or(1, |(index, _)| index)
                .min(last)
        }
    }
}

fn kind_at(topology: &Topology, id: DeviceId) -> Option<DeviceKind> {
    topology.device(id).map(|device| device.kind)
}
