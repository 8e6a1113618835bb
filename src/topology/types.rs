//! Topology type definitions.
//!
//! Devices own their ports; a port holds only the id of the connection
//! plugged into it, and connections name their two endpoints by device id and
//! port index. Ids come from monotonically increasing counters, so ordering
//! by id is ordering by creation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dhcp::LanSegment;
use crate::ip::address::{is_valid_address, SENTINEL_ADDRESS};

/// Maximum number of routed LAN segments on a router
pub const MAX_LAN_SEGMENTS: usize = 3;

/// Identity of a device within one topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// Identity of a connection within one topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Kind of simulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Host,
    Server,
    Router,
    Switch,
    Hub,
}

impl DeviceKind {
    /// Layer-2 relays forward frames without owning an address of their own
    pub fn is_relay(self) -> bool {
        matches!(self, Self::Switch | Self::Hub)
    }

    pub fn is_router(self) -> bool {
        matches!(self, Self::Router)
    }

    /// Hosts and servers: the only kinds that act as DHCP clients
    pub fn is_endpoint(self) -> bool {
        matches!(self, Self::Host | Self::Server)
    }

    /// Port layout a freshly placed device starts with
    pub fn default_ports(self) -> Vec<Port> {
        match self {
            Self::Host | Self::Server => vec![Port::new("eth0")],
            Self::Switch => (1..=8).map(|n| Port::new(format!("port{}", n))).collect(),
            Self::Hub => (1..=4).map(|n| Port::new(format!("port{}", n))).collect(),
            Self::Router => {
                let mut ports = vec![Port::new("wan")];
                ports.extend(
                    (0..MAX_LAN_SEGMENTS).map(|segment| Port::lan(format!("lan{}", segment + 1), segment)),
                );
                ports
            }
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Host => "host",
            Self::Server => "server",
            Self::Router => "router",
            Self::Switch => "switch",
            Self::Hub => "hub",
        };
        f.write_str(name)
    }
}

/// A device's wiring point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub label: String,
    /// LAN segment (interface group) this router port belongs to
    pub segment: Option<usize>,
    pub(crate) connection: Option<ConnectionId>,
}

impl Port {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            segment: None,
            connection: None,
        }
    }

    /// Router port bound to a LAN segment
    pub fn lan(label: impl Into<String>, segment: usize) -> Self {
        Self {
            segment: Some(segment),
            ..Self::new(label)
        }
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn is_free(&self) -> bool {
        self.connection.is_none()
    }
}

/// Addressing of a device, kept as the text the user entered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub ip_address: String,
    pub subnet_mask: String,
    pub default_gateway: String,
    pub dhcp_enabled: bool,
    /// Routed LAN segments; only meaningful on routers
    pub lan_segments: Vec<LanSegment>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ip_address: SENTINEL_ADDRESS.to_string(),
            subnet_mask: "255.255.255.0".to_string(),
            default_gateway: String::new(),
            dhcp_enabled: false,
            lan_segments: Vec::new(),
        }
    }
}

impl NetworkConfig {
    /// True when the device holds a real address (valid and not the sentinel)
    pub fn has_address(&self) -> bool {
        self.ip_address != SENTINEL_ADDRESS && is_valid_address(&self.ip_address)
    }

    /// Drop the current address, keeping the mask for the next assignment
    pub fn clear_address(&mut self) {
        self.ip_address = SENTINEL_ADDRESS.to_string();
        self.default_gateway.clear();
    }
}

/// A placed device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
    pub ports: Vec<Port>,
    pub config: NetworkConfig,
}

impl Device {
    pub fn new(id: DeviceId, name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            ports: kind.default_ports(),
            config: NetworkConfig::default(),
        }
    }

    /// Index of the port with the given label
    pub fn port_index(&self, label: &str) -> Option<usize> {
        self.ports.iter().position(|port| port.label == label)
    }

    /// Index of the first unconnected port
    pub fn free_port(&self) -> Option<usize> {
        self.ports.iter().position(Port::is_free)
    }

    /// Every address this device answers on: its primary address plus, for
    /// routers, each LAN segment's gateway address.
    pub fn interface_addresses(&self) -> Vec<String> {
        let mut addresses = Vec::with_capacity(1 + self.config.lan_segments.len());
        if self.config.has_address() {
            addresses.push(self.config.ip_address.clone());
        }
        if self.kind.is_router() {
            addresses.extend(
                self.config
                    .lan_segments
                    .iter()
                    .map(|segment| segment.ip_address().to_string()),
            );
        }
        addresses
    }

    /// Whether one of this device's interfaces carries `ip`
    pub fn owns_address(&self, ip: &str) -> bool {
        self.interface_addresses().iter().any(|address| address == ip)
    }
}

/// One side of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub device: DeviceId,
    pub port: usize,
}

impl Endpoint {
    pub fn new(device: DeviceId, port: usize) -> Self {
        Self { device, port }
    }
}

/// An undirected wire joining two ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub a: Endpoint,
    pub b: Endpoint,
}

impl Connection {
    pub fn touches(&self, device: DeviceId) -> bool {
        self.a.device == device || self.b.device == device
    }

    /// The endpoint on `device`'s side
    pub fn local_end(&self, device: DeviceId) -> Option<Endpoint> {
        if self.a.device == device {
            Some(self.a)
        } else if self.b.device == device {
            Some(self.b)
        } else {
            None
        }
    }

    /// The endpoint opposite `device`
    pub fn other_end(&self, device: DeviceId) -> Option<Endpoint> {
        if self.a.device == device {
            Some(self.b)
        } else if self.b.device == device {
            Some(self.a)
        } else {
            None
        }
    }
}
