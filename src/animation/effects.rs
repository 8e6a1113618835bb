//! Visual packet effects derived from analysis results.
//!
//! Planning is synchronous and pure: it reads the topology and produces the
//! list of effects a renderer should play through the [`AnimationQueue`](super::AnimationQueue).

use serde::Serialize;

use crate::dhcp::{find_serving_segment, DhcpError, DhcpOffer};
use crate::reachability::{check_reachability, estimate_reachable_hop_index, Reachability};
use crate::topology::{bfs_tree, find_path, DeviceId, Topology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    EchoRequest,
    EchoReply,
    DhcpDiscover,
    DhcpOffer,
}

/// A marker moving along `hops`, labelled for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacketEffect {
    pub kind: EffectKind,
    pub label: String,
    pub hops: Vec<DeviceId>,
    /// The marker arrives at the last hop instead of being dropped there
    pub completes: bool,
}

impl PacketEffect {
    fn new(kind: EffectKind, label: impl Into<String>, hops: Vec<DeviceId>, completes: bool) -> Self {
        Self {
            kind,
            label: label.into(),
            hops,
            completes,
        }
    }

    /// Number of wire crossings the marker makes
    pub fn wire_count(&self) -> usize {
        self.hops.len().saturating_sub(1)
    }
}

/// Everything a ping produces: the verdict and what to show for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PingPlan {
    pub reachability: Reachability,
    pub path: Vec<DeviceId>,
    /// Index along `path` of the last device the request visibly reaches
    pub hops_travelled: usize,
    pub delivered: bool,
    pub effects: Vec<PacketEffect>,
}

/// Plan a ping from `source` to `target`.
///
/// A reachable target gets an echo request along the wiring path and a reply
/// back along the reversed path. An unreachable one gets a request that stops
/// at the estimated hop. A verdict that cannot be backed by a wiring path
/// (directly-addressed devices with no cable between them) is not delivered.
pub fn plan_ping(topology: &Topology, source: DeviceId, target: DeviceId) -> PingPlan {
    let reachability = check_reachability(topology, source, target);
    let path = find_path(topology, source, target);

    if path.is_empty() {
        let stranded = topology
            .device(source)
            .map(|_| PacketEffect::new(EffectKind::EchoRequest, "ICMP Echo Request", vec![source], false));
        return PingPlan {
            reachability,
            path,
            hops_travelled: 0,
            delivered: false,
            effects: stranded.into_iter().collect(),
        };
    }

    let stop = estimate_reachable_hop_index(topology, reachability.failure, &path);
    let delivered = reachability.reachable;
    let mut effects = vec![PacketEffect::new(
        EffectKind::EchoRequest,
        "ICMP Echo Request",
        path[..=stop].to_vec(),
        delivered,
    )];
    if delivered {
        let back: Vec<DeviceId> = path.iter().rev().copied().collect();
        effects.push(PacketEffect::new(EffectKind::EchoReply, "ICMP Echo Reply", back, true));
    }

    PingPlan {
        reachability,
        path,
        hops_travelled: stop,
        delivered,
        effects,
    }
}

/// Plan the discover/offer exchange behind a DHCP request outcome.
///
/// The discover travels from the client to the serving router without
/// crossing other routers; an offer comes back only when an address was
/// handed out. A request that found no server shows the discover leaving the
/// client and going nowhere.
pub fn plan_dhcp_exchange(
    topology: &Topology,
    client: DeviceId,
    outcome: &Result<DhcpOffer, DhcpError>,
) -> Vec<PacketEffect> {
    let router = match outcome {
        Ok(offer) => Some(offer.router),
        Err(DhcpError::PoolExhausted { .. }) => find_serving_segment(topology, client).map(|serving| serving.router),
        Err(DhcpError::NoDhcpServerFound(_)) => None,
        Err(DhcpError::UnknownDevice(_) | DhcpError::NotDhcpClient(_)) => return Vec::new(),
    };

    let Some(router) = router else {
        return vec![PacketEffect::new(EffectKind::DhcpDiscover, "DHCP Discover", vec![client], false)];
    };

    let tree = bfs_tree(topology, client, |device| !device.kind.is_router());
    let towards = tree.path_to(router);
    if towards.is_empty() {
        return vec![PacketEffect::new(EffectKind::DhcpDiscover, "DHCP Discover", vec![client], false)];
    }

    let mut effects = vec![PacketEffect::new(
        EffectKind::DhcpDiscover,
        "DHCP Discover",
        towards.clone(),
        true,
    )];
    if let Ok(offer) = outcome {
        let back: Vec<DeviceId> = towards.into_iter().rev().collect();
        effects.push(PacketEffect::new(
            EffectKind::DhcpOffer,
            format!("DHCP Offer {}", offer.ip),
            back,
            true,
        ));
    }
    effects
}
