//! DHCP server discovery.
//!
//! A DHCP discover is a broadcast: it floods through switches and hubs but
//! stops at the first router interface it hits. The serving segment is the
//! one owning the router port the broadcast arrived on, so the choice
//! depends only on wiring, never on where devices sit on the canvas.

use log::debug;
use serde::Serialize;

use crate::topology::{bfs_tree, DeviceId, Topology};

/// Router and segment index that answer a client's DHCP requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ServingSegment {
    pub router: DeviceId,
    pub segment: usize,
}

/// Find the DHCP-enabled segment serving `client`.
///
/// The first router in breadth-first discovery order with any DHCP-enabled
/// segment decides. When the broadcast reaches it on a port without a
/// segment, or on a segment with DHCP disabled, nobody answers.
pub fn find_serving_segment(topology: &Topology, client: DeviceId) -> Option<ServingSegment> {
    let tree = bfs_tree(topology, client, |device| !device.kind.is_router());

    for id in tree.order().iter().skip(1) {
        let Some(router) = topology.device(*id).filter(|device| device.kind.is_router()) else {
            continue;
        };
        if !router.config.lan_segments.iter().any(|segment| segment.dhcp_enabled) {
            continue;
        }
        let Some(hop) = tree.hop(*id) else {
            continue;
        };

        let segment = router
            .ports
            .get(hop.entry_port)
            .and_then(|port| port.segment)
            .filter(|index| {
                router
                    .config
                    .lan_segments
                    .get(*index)
                    .is_some_and(|segment| segment.dhcp_enabled)
            });

        match segment {
            Some(segment) => {
                debug!(
                    "'{}' is served by '{}' segment {} (port {})",
                    topology.name_of(client),
                    router.name,
                    segment,
                    router.ports[hop.entry_port].label
                );
                return Some(ServingSegment {
                    router: router.id,
                    segment,
                });
            }
            None => {
                debug!(
                    "'{}' reaches '{}' on a port without an active DHCP segment",
                    topology.name_of(client),
                    router.name
                );
                return None;
            }
        }
    }

    None
}
