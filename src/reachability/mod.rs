//! Reachability analysis.
//!
//! Decides whether two devices can exchange traffic given their configured
//! addresses and the physical wiring, and explains the verdict. The checks
//! run in a fixed order:
//!
//! 1. both ends have an assigned, valid address and a valid mask,
//! 2. both ends consider each other on-link (direct delivery),
//! 3. otherwise a router must sit on the wiring path,
//! 4. the source's default gateway must be valid and inside its own subnet,
//! 5. some router on the path must own that gateway address.

pub mod hops;

use log::debug;
use serde::Serialize;

use crate::ip::address::{format_prefix, ip_to_int, is_valid_address, same_subnet, SENTINEL_ADDRESS};
use crate::topology::{find_path, Device, DeviceId, Topology};

pub use hops::estimate_reachable_hop_index;

/// How traffic gets from source to target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingType {
    Direct,
    Routed,
}

/// Structured category of an unreachable verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A local address or mask is unusable; nothing leaves the source
    InvalidConfig,
    /// Different networks and no router on the wiring path
    NoRouterOnPath,
    /// The source's default gateway is malformed or off-subnet
    InvalidGateway,
    /// No router on the path answers on the gateway address
    GatewayNotFound,
}

/// Why two devices cannot communicate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Unreachable {
    #[error("Device {0} does not exist")]
    UnknownDevice(DeviceId),

    #[error("{device} has an invalid {field} '{value}'")]
    InvalidConfig {
        device: String,
        field: &'static str,
        value: String,
    },

    #[error("{from_network} and {to_network} are different networks and no router on the path connects them")]
    NoRouterOnPath {
        from_network: String,
        to_network: String,
    },

    #[error("Asymmetric subnet masks: {on_link} treats its peer as local but {off_link} does not, and no router on the path connects them")]
    AsymmetricMasks { on_link: String, off_link: String },

    #[error("Default gateway '{gateway}' of {device} is not a valid address inside {network}")]
    InvalidGateway {
        device: String,
        gateway: String,
        network: String,
    },

    #[error("Gateway {gateway} not found on any router along the path")]
    GatewayNotFound { gateway: String },
}

impl Unreachable {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnknownDevice(_) | Self::InvalidConfig { .. } => FailureKind::InvalidConfig,
            Self::NoRouterOnPath { .. } | Self::AsymmetricMasks { .. } => FailureKind::NoRouterOnPath,
            Self::InvalidGateway { .. } => FailureKind::InvalidGateway,
            Self::GatewayNotFound { .. } => FailureKind::GatewayNotFound,
        }
    }
}

/// Verdict of [`check_reachability`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reachability {
    pub reachable: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_type: Option<RoutingType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl Reachability {
    fn reachable(routing_type: RoutingType, reason: String) -> Self {
        Self {
            reachable: true,
            reason,
            routing_type: Some(routing_type),
            failure: None,
        }
    }

    fn unreachable(error: &Unreachable) -> Self {
        Self {
            reachable: false,
            reason: error.to_string(),
            routing_type: None,
            failure: Some(error.kind()),
        }
    }
}

/// Decide whether `source` can exchange traffic with `target`
pub fn check_reachability(topology: &Topology, source: DeviceId, target: DeviceId) -> Reachability {
    match evaluate(topology, source, target) {
        Ok((routing_type, reason)) => {
            debug!(
                "{} -> {}: reachable ({:?})",
                topology.name_of(source),
                topology.name_of(target),
                routing_type
            );
            Reachability::reachable(routing_type, reason)
        }
        Err(error) => {
            debug!(
                "{} -> {}: unreachable: {}",
                topology.name_of(source),
                topology.name_of(target),
                error
            );
            Reachability::unreachable(&error)
        }
    }
}

/// Parsed address and mask of one end
struct Interface<'a> {
    device: &'a Device,
    ip: u32,
    mask: u32,
}

impl Interface<'_> {
    fn prefix(&self) -> String {
        format_prefix(&self.device.config.ip_address, &self.device.config.subnet_mask)
            .unwrap_or_else(|_| self.device.config.ip_address.clone())
    }
}

fn interface(topology: &Topology, id: DeviceId) -> Result<Interface<'_>, Unreachable> {
    let device = topology.device(id).ok_or(Unreachable::UnknownDevice(id))?;
    let config = &device.config;
    let invalid = |field: &'static str, value: &str| Unreachable::InvalidConfig {
        device: device.name.clone(),
        field,
        value: value.to_string(),
    };

    if config.ip_address == SENTINEL_ADDRESS {
        return Err(invalid("IP address (unassigned)", &config.ip_address));
    }
    let ip = ip_to_int(&config.ip_address).map_err(|_| invalid("IP address", &config.ip_address))?;
    let mask = ip_to_int(&config.subnet_mask).map_err(|_| invalid("subnet mask", &config.subnet_mask))?;
    Ok(Interface { device, ip, mask })
}

fn evaluate(topology: &Topology, source: DeviceId, target: DeviceId) -> Result<(RoutingType, String), Unreachable> {
    let from = interface(topology, source)?;
    let to = interface(topology, target)?;

    let from_sees_to = same_subnet(from.ip, to.ip, from.mask);
    let to_sees_from = same_subnet(to.ip, from.ip, to.mask);
    if from_sees_to && to_sees_from {
        return Ok((
            RoutingType::Direct,
            format!("{} and {} share network {}", from.device.name, to.device.name, from.prefix()),
        ));
    }

    let path = find_path(topology, source, target);
    let routers: Vec<&Device> = path
        .iter()
        .filter_map(|id| topology.device(*id))
        .filter(|device| device.kind.is_router())
        .collect();
    if routers.is_empty() {
        return Err(match (from_sees_to, to_sees_from) {
            (true, false) => Unreachable::AsymmetricMasks {
                on_link: format!("{} ({})", from.device.name, from.prefix()),
                off_link: format!("{} ({})", to.device.name, to.prefix()),
            },
            (false, true) => Unreachable::AsymmetricMasks {
                on_link: format!("{} ({})", to.device.name, to.prefix()),
                off_link: format!("{} ({})", from.device.name, from.prefix()),
            },
            _ => Unreachable::NoRouterOnPath {
                from_network: from.prefix(),
                to_network: to.prefix(),
            },
        });
    }

    let gateway = from.device.config.default_gateway.as_str();
    let gateway_in_subnet = is_valid_address(gateway)
        && ip_to_int(gateway).is_ok_and(|gw| same_subnet(from.ip, gw, from.mask));
    if !gateway_in_subnet {
        return Err(Unreachable::InvalidGateway {
            device: from.device.name.clone(),
            gateway: gateway.to_string(),
            network: from.prefix(),
        });
    }

    let Some(router) = routers.iter().find(|router| router.owns_address(gateway)) else {
        return Err(Unreachable::GatewayNotFound {
            gateway: gateway.to_string(),
        });
    };

    Ok((
        RoutingType::Routed,
        format!("Routed via {} (gateway {})", router.name, gateway),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dhcp::LanSegment;
    use crate::topology::{DeviceKind, Endpoint};

    /// pc-a (192.168.1.10/24) - r1 [lan1 192.168.1.1, lan2 192.168.2.1] - pc-b (192.168.2.10/24)
    fn routed_pair() -> (Topology, DeviceId, DeviceId, DeviceId) {
        let mut topology = Topology::new();
        let a = topology.add_device("pc-a", DeviceKind::Host).unwrap();
        let r = topology.add_device("r1", DeviceKind::Router).unwrap();
        let b = topology.add_device("pc-b", DeviceKind::Host).unwrap();
        topology.add_segment(r, LanSegment::new("192.168.1.1", "255.255.255.0").unwrap()).unwrap();
        topology.add_segment(r, LanSegment::new("192.168.2.1", "255.255.255.0").unwrap()).unwrap();
        topology.set_address(a, "192.168.1.10", "255.255.255.0", "192.168.1.1").unwrap();
        topology.set_address(b, "192.168.2.10", "255.255.255.0", "192.168.2.1").unwrap();
        topology.connect(Endpoint::new(a, 0), Endpoint::new(r, 1)).unwrap();
        topology.connect(Endpoint::new(r, 2), Endpoint::new(b, 0)).unwrap();
        (topology, a, r, b)
    }

    #[test]
    fn test_routed_through_lan_segments() {
        let (topology, a, r, b) = routed_pair();
        let verdict = check_reachability(&topology, a, b);
        assert!(verdict.reachable, "{}", verdict.reason);
        assert_eq!(verdict.routing_type, Some(RoutingType::Routed));
        assert_eq!(find_path(&topology, a, b), vec![a, r, b]);
    }

    #[test]
    fn test_direct_on_shared_switch() {
        let mut topology = Topology::new();
        let a = topology.add_device("a", DeviceKind::Host).unwrap();
        let sw = topology.add_device("sw", DeviceKind::Switch).unwrap();
        let b = topology.add_device("b", DeviceKind::Host).unwrap();
        topology.set_address(a, "10.0.0.5", "255.255.255.0", "").unwrap();
        topology.set_address(b, "10.0.0.10", "255.255.0.0", "").unwrap();
        topology.connect_any(a, sw).unwrap();
        topology.connect_any(b, sw).unwrap();

        let verdict = check_reachability(&topology, a, b);
        assert!(verdict.reachable);
        assert_eq!(verdict.routing_type, Some(RoutingType::Direct));
        assert_eq!(verdict.failure, None);
    }

    #[test]
    fn test_invalid_config_rejected_first() {
        let (mut topology, a, _, b) = routed_pair();
        topology.set_address(a, "192.168.1.300", "255.255.255.0", "192.168.1.1").unwrap();
        let verdict = check_reachability(&topology, a, b);
        assert!(!verdict.reachable);
        assert_eq!(verdict.failure, Some(FailureKind::InvalidConfig));
        assert!(verdict.reason.contains("192.168.1.300"));

        topology.set_address(a, "192.168.1.10", "255.255.255.0", "192.168.1.1").unwrap();
        topology.set_address(b, "192.168.2.10", "255.255.255", "192.168.2.1").unwrap();
        let verdict = check_reachability(&topology, a, b);
        assert_eq!(verdict.failure, Some(FailureKind::InvalidConfig));
        assert!(verdict.reason.contains("subnet mask"));

        let verdict = check_reachability(&topology, a, DeviceId(42));
        assert_eq!(verdict.failure, Some(FailureKind::InvalidConfig));
    }

    #[test]
    fn test_unassigned_hosts_cannot_talk() {
        let mut topology = Topology::new();
        let a = topology.add_device("a", DeviceKind::Host).unwrap();
        let b = topology.add_device("b", DeviceKind::Host).unwrap();
        topology.connect_any(a, b).unwrap();

        let verdict = check_reachability(&topology, a, b);
        assert!(!verdict.reachable);
        assert_eq!(verdict.routing_type, None);
        assert_eq!(verdict.failure, Some(FailureKind::InvalidConfig));
        assert!(verdict.reason.contains("unassigned"), "{}", verdict.reason);

        // An addressed source still fails on the unassigned target
        topology.set_address(a, "10.0.0.1", "255.255.255.0", "").unwrap();
        let verdict = check_reachability(&topology, a, b);
        assert_eq!(verdict.failure, Some(FailureKind::InvalidConfig));
        assert!(verdict.reason.starts_with("b has"), "{}", verdict.reason);
    }

    #[test]
    fn test_no_router_names_both_networks() {
        let mut topology = Topology::new();
        let a = topology.add_device("a", DeviceKind::Host).unwrap();
        let b = topology.add_device("b", DeviceKind::Host).unwrap();
        topology.set_address(a, "10.0.1.5", "255.255.255.0", "10.0.1.1").unwrap();
        topology.set_address(b, "10.0.2.5", "255.255.255.0", "10.0.2.1").unwrap();
        topology.connect_any(a, b).unwrap();

        let verdict = check_reachability(&topology, a, b);
        assert_eq!(verdict.failure, Some(FailureKind::NoRouterOnPath));
        assert!(verdict.reason.contains("10.0.1.0/24"));
        assert!(verdict.reason.contains("10.0.2.0/24"));
    }

    #[test]
    fn test_asymmetric_masks_on_one_wire() {
        let mut topology = Topology::new();
        let a = topology.add_device("a", DeviceKind::Host).unwrap();
        let b = topology.add_device("b", DeviceKind::Host).unwrap();
        topology.set_address(a, "192.168.1.5", "255.255.255.0", "").unwrap();
        topology.set_address(b, "192.168.1.200", "255.255.255.128", "").unwrap();
        topology.connect_any(a, b).unwrap();

        for (src, dst) in [(a, b), (b, a)] {
            let verdict = check_reachability(&topology, src, dst);
            assert!(!verdict.reachable);
            assert_eq!(verdict.failure, Some(FailureKind::NoRouterOnPath));
            assert!(verdict.reason.starts_with("Asymmetric subnet masks"), "{}", verdict.reason);
            assert!(verdict.reason.contains("a (192.168.1.0/24) treats its peer as local"));
            assert!(verdict.reason.contains("b (192.168.1.128/25) does not"));
        }
    }

    #[test]
    fn test_gateway_outside_subnet() {
        let (mut topology, a, _, b) = routed_pair();
        topology.set_address(a, "192.168.1.10", "255.255.255.0", "192.168.2.1").unwrap();
        let verdict = check_reachability(&topology, a, b);
        assert_eq!(verdict.failure, Some(FailureKind::InvalidGateway));

        topology.set_address(a, "192.168.1.10", "255.255.255.0", "").unwrap();
        let verdict = check_reachability(&topology, a, b);
        assert_eq!(verdict.failure, Some(FailureKind::InvalidGateway));
    }

    #[test]
    fn test_gateway_not_owned_by_router_on_path() {
        let (mut topology, a, _, b) = routed_pair();
        topology.set_address(a, "192.168.1.10", "255.255.255.0", "192.168.1.254").unwrap();
        let verdict = check_reachability(&topology, a, b);
        assert_eq!(verdict.failure, Some(FailureKind::GatewayNotFound));
        assert!(verdict.reason.contains("192.168.1.254"));
    }
}
