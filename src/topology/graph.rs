//! The topology context: every device and connection of one simulated network.
//!
//! All analysis functions take a `&Topology` (or `&mut Topology` when they
//! hand out addresses) instead of reaching for global state.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use super::types::{Connection, ConnectionId, Device, DeviceId, DeviceKind, Endpoint, MAX_LAN_SEGMENTS};
use crate::dhcp::{self, LanSegment};
use crate::ip::address::{is_valid_address, AddressFormatError, SENTINEL_ADDRESS};
use crate::ip::registry::AddressRegistry;

/// Wiring and placement errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("Unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("Device name '{0}' is already in use")]
    DuplicateName(String),

    #[error("{device} has no port {port}")]
    UnknownPort { device: DeviceId, port: usize },

    #[error("Port {port} of {device} is already connected")]
    PortInUse { device: DeviceId, port: usize },

    #[error("{0} has no free port")]
    NoFreePort(DeviceId),

    #[error("Cannot connect {0} to itself")]
    SelfConnection(DeviceId),

    #[error("Address {ip} is already held by {holder}")]
    AddressConflict { ip: String, holder: DeviceId },

    #[error("{0} is not a router")]
    NotARouter(DeviceId),

    #[error("{0} already has the maximum number of LAN segments")]
    TooManySegments(DeviceId),

    #[error(transparent)]
    Address(#[from] AddressFormatError),
}

/// Devices and connections of one simulated network
#[derive(Debug, Clone, Default)]
pub struct Topology {
    devices: BTreeMap<DeviceId, Device>,
    connections: BTreeMap<ConnectionId, Connection>,
    next_device: u32,
    next_connection: u32,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a new device with the default port layout for its kind
    pub fn add_device(&mut self, name: impl Into<String>, kind: DeviceKind) -> Result<DeviceId, TopologyError> {
        let name = name.into();
        if self.device_by_name(&name).is_some() {
            return Err(TopologyError::DuplicateName(name));
        }

        let id = DeviceId(self.next_device);
        self.next_device += 1;
        debug!("Placed {} '{}' as {}", kind, name, id);
        self.devices.insert(id, Device::new(id, name, kind));
        Ok(id)
    }

    /// Delete a device together with its connections and the leases it holds
    pub fn remove_device(&mut self, id: DeviceId) -> Result<Device, TopologyError> {
        if !self.devices.contains_key(&id) {
            return Err(TopologyError::UnknownDevice(id));
        }

        let attached: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|connection| connection.touches(id))
            .map(|connection| connection.id)
            .collect();
        for connection in attached {
            self.disconnect(connection)?;
        }

        let released = dhcp::release(self, id);
        let device = self.devices.remove(&id).ok_or(TopologyError::UnknownDevice(id))?;
        info!(
            "Removed {} '{}' ({} lease(s) released)",
            device.kind, device.name, released
        );
        Ok(device)
    }

    /// Wire two specific ports together
    pub fn connect(&mut self, a: Endpoint, b: Endpoint) -> Result<ConnectionId, TopologyError> {
        if a.device == b.device {
            return Err(TopologyError::SelfConnection(a.device));
        }
        for end in [a, b] {
            let device = self.device(end.device).ok_or(TopologyError::UnknownDevice(end.device))?;
            let port = device.ports.get(end.port).ok_or(TopologyError::UnknownPort {
                device: end.device,
                port: end.port,
            })?;
            if !port.is_free() {
                warn!("Rejected wiring: port {} of '{}' is already connected", port.label, device.name);
                return Err(TopologyError::PortInUse {
                    device: end.device,
                    port: end.port,
                });
            }
        }

        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        for end in [a, b] {
            if let Some(port) = self
                .devices
                .get_mut(&end.device)
                .and_then(|device| device.ports.get_mut(end.port))
            {
                port.connection = Some(id);
            }
        }
        self.connections.insert(id, Connection { id, a, b });
        debug!("Connected {}:{} <-> {}:{} as {}", a.device, a.port, b.device, b.port, id);
        Ok(id)
    }

    /// Wire the first free port of each device
    pub fn connect_any(&mut self, a: DeviceId, b: DeviceId) -> Result<ConnectionId, TopologyError> {
        let port_a = self.free_port_of(a)?;
        let port_b = self.free_port_of(b)?;
        self.connect(Endpoint::new(a, port_a), Endpoint::new(b, port_b))
    }

    fn free_port_of(&self, id: DeviceId) -> Result<usize, TopologyError> {
        self.device(id)
            .ok_or(TopologyError::UnknownDevice(id))?
            .free_port()
            .ok_or(TopologyError::NoFreePort(id))
    }

    /// Remove a wire, freeing both ports
    pub fn disconnect(&mut self, id: ConnectionId) -> Result<Connection, TopologyError> {
        let connection = self
            .connections
            .remove(&id)
            .ok_or(TopologyError::UnknownConnection(id))?;
        for end in [connection.a, connection.b] {
            if let Some(port) = self
                .devices
                .get_mut(&end.device)
                .and_then(|device| device.ports.get_mut(end.port))
            {
                port.connection = None;
            }
        }
        debug!("Disconnected {}", id);
        Ok(connection)
    }

    /// The connection joining two devices, if any (oldest first)
    pub fn connection_between(&self, a: DeviceId, b: DeviceId) -> Option<&Connection> {
        self.connections
            .values()
            .find(|connection| connection.touches(a) && connection.other_end(a).map(|end| end.device) == Some(b))
    }

    /// Assign a static address.
    ///
    /// Text that is not a valid address is stored as typed (reachability
    /// reports it later); a valid address already held by another device is
    /// rejected. Turning a device static releases any DHCP lease it held.
    pub fn set_address(
        &mut self,
        id: DeviceId,
        ip: &str,
        mask: &str,
        gateway: &str,
    ) -> Result<(), TopologyError> {
        if !self.devices.contains_key(&id) {
            return Err(TopologyError::UnknownDevice(id));
        }
        if ip != SENTINEL_ADDRESS && is_valid_address(ip) {
            let registry = AddressRegistry::from_topology(self);
            if let Some(holder) = registry.holder_of(ip)?.filter(|holder| *holder != id) {
                return Err(TopologyError::AddressConflict {
                    ip: ip.to_string(),
                    holder,
                });
            }
        }

        dhcp::release(self, id);
        let device = self.devices.get_mut(&id).ok_or(TopologyError::UnknownDevice(id))?;
        device.config.ip_address = ip.to_string();
        device.config.subnet_mask = mask.to_string();
        device.config.default_gateway = gateway.to_string();
        device.config.dhcp_enabled = false;
        debug!("Set static address {}/{} gw {} on '{}'", ip, mask, gateway, device.name);
        Ok(())
    }

    /// Append a LAN segment to a router, returning its index
    pub fn add_segment(&mut self, router: DeviceId, segment: LanSegment) -> Result<usize, TopologyError> {
        let device = self.device(router).ok_or(TopologyError::UnknownDevice(router))?;
        if !device.kind.is_router() {
            return Err(TopologyError::NotARouter(router));
        }
        if device.config.lan_segments.len() >= MAX_LAN_SEGMENTS {
            return Err(TopologyError::TooManySegments(router));
        }

        let gateway = segment.ip_address().to_string();
        let registry = AddressRegistry::from_topology(self);
        if let Some(holder) = registry.holder_of(&gateway)? {
            return Err(TopologyError::AddressConflict { ip: gateway, holder });
        }

        let device = self
            .devices
            .get_mut(&router)
            .ok_or(TopologyError::UnknownDevice(router))?;
        device.config.lan_segments.push(segment);
        Ok(device.config.lan_segments.len() - 1)
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(&id)
    }

    pub fn device_by_name(&self, name: &str) -> Option<&Device> {
        self.devices.values().find(|device| device.name == name)
    }

    /// Display name of a device, or its id when it no longer exists
    pub fn name_of(&self, id: DeviceId) -> String {
        self.device(id)
            .map_or_else(|| id.to_string(), |device| device.name.clone())
    }

    /// Devices in creation order
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Snapshot of device ids, safe to iterate while mutating the topology
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }

    /// Connections in creation order
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Connections touching `id`, in creation order
    pub fn links_of(&self, id: DeviceId) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(move |connection| connection.touches(id))
    }

    pub fn segment(&self, router: DeviceId, index: usize) -> Option<&LanSegment> {
        self.device(router)?.config.lan_segments.get(index)
    }

    pub fn segment_mut(&mut self, router: DeviceId, index: usize) -> Option<&mut LanSegment> {
        self.devices.get_mut(&router)?.config.lan_segments.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_hosts() -> (Topology, DeviceId, DeviceId) {
        let mut topology = Topology::new();
        let a = topology.add_device("pc-a", DeviceKind::Host).unwrap();
        let b = topology.add_device("pc-b", DeviceKind::Host).unwrap();
        (topology, a, b)
    }

    #[test]
    fn test_ids_follow_creation_order() {
        let (mut topology, a, b) = two_hosts();
        let sw = topology.add_device("sw", DeviceKind::Switch).unwrap();
        assert!(a < b && b < sw);
        let ids: Vec<DeviceId> = topology.devices().map(|device| device.id).collect();
        assert_eq!(ids, [a, b, sw]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let (mut topology, _, _) = two_hosts();
        assert_eq!(
            topology.add_device("pc-a", DeviceKind::Server),
            Err(TopologyError::DuplicateName("pc-a".to_string()))
        );
    }

    #[test]
    fn test_port_holds_one_connection() {
        let (mut topology, a, b) = two_hosts();
        let c = topology.add_device("pc-c", DeviceKind::Host).unwrap();

        let link = topology.connect(Endpoint::new(a, 0), Endpoint::new(b, 0)).unwrap();
        assert_eq!(topology.device(a).unwrap().ports[0].connection(), Some(link));

        assert_eq!(
            topology.connect(Endpoint::new(a, 0), Endpoint::new(c, 0)),
            Err(TopologyError::PortInUse { device: a, port: 0 })
        );
        assert_eq!(topology.connect_any(c, a), Err(TopologyError::NoFreePort(a)));
        assert_eq!(
            topology.connect(Endpoint::new(c, 0), Endpoint::new(c, 0)),
            Err(TopologyError::SelfConnection(c))
        );
        assert_eq!(
            topology.connect(Endpoint::new(c, 5), Endpoint::new(b, 0)),
            Err(TopologyError::UnknownPort { device: c, port: 5 })
        );
    }

    #[test]
    fn test_disconnect_frees_ports() {
        let (mut topology, a, b) = two_hosts();
        let link = topology.connect_any(a, b).unwrap();
        assert!(topology.connection_between(b, a).is_some());

        topology.disconnect(link).unwrap();
        assert!(topology.device(a).unwrap().ports[0].is_free());
        assert!(topology.device(b).unwrap().ports[0].is_free());
        assert!(topology.connection_between(a, b).is_none());
        assert_eq!(topology.disconnect(link), Err(TopologyError::UnknownConnection(link)));
    }

    #[test]
    fn test_remove_device_cascades_connections() {
        let mut topology = Topology::new();
        let sw = topology.add_device("sw", DeviceKind::Switch).unwrap();
        let a = topology.add_device("pc-a", DeviceKind::Host).unwrap();
        let b = topology.add_device("pc-b", DeviceKind::Host).unwrap();
        topology.connect_any(a, sw).unwrap();
        topology.connect_any(b, sw).unwrap();

        topology.remove_device(sw).unwrap();
        assert_eq!(topology.connections().count(), 0);
        assert!(topology.device(a).unwrap().ports[0].is_free());
        assert_eq!(topology.remove_device(sw), Err(TopologyError::UnknownDevice(sw)));
    }

    #[test]
    fn test_static_address_conflicts() {
        let (mut topology, a, b) = two_hosts();
        topology.set_address(a, "10.0.0.1", "255.0.0.0", "").unwrap();
        assert_eq!(
            topology.set_address(b, "10.0.0.1", "255.0.0.0", ""),
            Err(TopologyError::AddressConflict {
                ip: "10.0.0.1".to_string(),
                holder: a
            })
        );
        // Re-applying the same address to its holder is fine
        topology.set_address(a, "10.0.0.1", "255.255.0.0", "10.0.0.254").unwrap();
        // Garbage is stored as typed
        topology.set_address(b, "10.0.0", "255.0.0.0", "").unwrap();
        assert_eq!(topology.device(b).unwrap().config.ip_address, "10.0.0");
    }

    #[test]
    fn test_segments_only_on_routers() {
        let (mut topology, a, _) = two_hosts();
        let r = topology.add_device("r1", DeviceKind::Router).unwrap();
        let segment = LanSegment::new("192.168.1.1", "255.255.255.0").unwrap();

        assert_eq!(topology.add_segment(a, segment.clone()), Err(TopologyError::NotARouter(a)));
        assert_eq!(topology.add_segment(r, segment.clone()), Ok(0));
        assert!(matches!(
            topology.add_segment(r, segment),
            Err(TopologyError::AddressConflict { .. })
        ));
        for (i, gw) in ["192.168.2.1", "192.168.3.1"].iter().enumerate() {
            let segment = LanSegment::new(gw, "255.255.255.0").unwrap();
            assert_eq!(topology.add_segment(r, segment), Ok(i + 1));
        }
        let segment = LanSegment::new("192.168.4.1", "255.255.255.0").unwrap();
        assert_eq!(topology.add_segment(r, segment), Err(TopologyError::TooManySegments(r)));
    }
}
