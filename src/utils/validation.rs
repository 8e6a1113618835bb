//! Topology consistency checks.
//!
//! These verify the invariants the topology and lease manager maintain
//! between operations. A failure means a bug, not bad user input.

use std::collections::HashMap;

use crate::ip::address::int_to_ip;
use crate::ip::registry::AddressRegistry;
use crate::topology::{DeviceId, Topology};

/// Validate that no two devices hold the same literal address
///
/// Router segment gateways count as held addresses.
///
/// # Arguments
/// * `topology` - The topology to validate
///
/// # Returns
/// * `Ok(())` if every held address has a single holder
/// * `Err(String)` naming the first duplicate otherwise
pub fn validate_address_uniqueness(topology: &Topology) -> Result<(), String> {
    let registry = AddressRegistry::from_topology(topology);
    match registry.conflicts().first() {
        Some(conflict) => Err(format!(
            "Duplicate IP address '{}' held by '{}' and '{}'",
            int_to_ip(conflict.ip),
            topology.name_of(conflict.first),
            topology.name_of(conflict.second)
        )),
        None => Ok(()),
    }
}

/// Validate lease bookkeeping across every router segment
///
/// Checks for:
/// - Leases held by devices that no longer exist or cannot be DHCP clients
/// - Clients holding more than one lease
/// - Clients whose configured address differs from the address they lease
///
/// # Arguments
/// * `topology` - The topology to validate
///
/// # Returns
/// * `Ok(())` if validation succeeds
/// * `Err(String)` with an error message if validation fails
pub fn validate_lease_consistency(topology: &Topology) -> Result<(), String> {
    let mut holders: HashMap<DeviceId, String> = HashMap::new();

    for router in topology.devices() {
        for (index, segment) in router.config.lan_segments.iter().enumerate() {
            for (ip, lease) in segment.leases() {
                let ip = int_to_ip(*ip);
                let client = topology.device(lease.client).ok_or_else(|| {
                    format!(
                        "Lease on {} ({} segment {}) belongs to deleted device {}",
                        ip, router.name, index, lease.client
                    )
                })?;
                if !client.kind.is_endpoint() {
                    return Err(format!("Lease on {} is held by {} '{}'", ip, client.kind, client.name));
                }
                if let Some(previous) = holders.insert(client.id, ip.clone()) {
                    return Err(format!(
                        "'{}' holds more than one lease ({} and {})",
                        client.name, previous, ip
                    ));
                }
                if client.config.ip_address != ip {
                    return Err(format!(
                        "'{}' leases {} but is configured with '{}'",
                        client.name, ip, client.config.ip_address
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Validate that ports and connections agree with each other
///
/// Every connection must join two existing ports that point back at it, and
/// every occupied port must name a live connection touching its device.
///
/// # Arguments
/// * `topology` - The topology to validate
///
/// # Returns
/// * `Ok(())` if validation succeeds
/// * `Err(String)` with an error message if validation fails
pub fn validate_wiring(topology: &Topology) -> Result<(), String> {
    for connection in topology.connections() {
        for end in [connection.a, connection.b] {
            let port = topology
                .device(end.device)
                .and_then(|device| device.ports.get(end.port))
                .ok_or_else(|| format!("{} ends at missing port {}:{}", connection.id, end.device, end.port))?;
            if port.connection() != Some(connection.id) {
                return Err(format!(
                    "{} ends at port {} of {} which does not point back at it",
                    connection.id, port.label, end.device
                ));
            }
        }
    }

    for device in topology.devices() {
        for (index, port) in device.ports.iter().enumerate() {
            let Some(id) = port.connection() else {
                continue;
            };
            let attached = topology
                .connection(id)
                .and_then(|connection| connection.local_end(device.id))
                .is_some_and(|end| end.port == index);
            if !attached {
                return Err(format!(
                    "Port {} of '{}' refers to {} which does not end there",
                    port.label, device.name, id
                ));
            }
        }
    }
    Ok(())
}

/// Run every consistency check
pub fn validate_topology(topology: &Topology) -> Result<(), String> {
    validate_wiring(topology)?;
    validate_address_uniqueness(topology)?;
    validate_lease_consistency(topology)
}
