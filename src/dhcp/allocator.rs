//! Address allocation from segment pools.
//!
//! `allocate` is the per-segment algorithm; `request_dhcp_address` wires it to
//! a topology (discovery, cross-segment cleanup, client configuration) and
//! `redistribute` re-runs it for every client of a router after its segments
//! were edited.

use std::net::Ipv4Addr;

use log::{debug, info, warn};
use serde::Serialize;

use super::lease::{LanSegment, Lease, SegmentError, SegmentSettings};
use super::segment::{find_serving_segment, ServingSegment};
use crate::ip::registry::AddressRegistry;
use crate::topology::{DeviceId, Topology};

/// An address handed to a client from one segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub ip: Ipv4Addr,
    pub lease: Lease,
    /// The client already held this lease and only its expiry moved
    pub renewed: bool,
}

/// Outcome of a successful DHCP request, already applied to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DhcpOffer {
    pub client: DeviceId,
    pub router: DeviceId,
    pub segment: usize,
    pub ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub lease: Lease,
    pub renewed: bool,
}

/// Why a DHCP request failed; the client is left at the sentinel address
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DhcpError {
    #[error("Device {0} does not exist")]
    UnknownDevice(DeviceId),

    #[error("'{0}' cannot act as a DHCP client")]
    NotDhcpClient(String),

    #[error("No DHCP server reachable from '{0}'")]
    NoDhcpServerFound(String),

    #[error("Address pool of '{router}' segment {segment} is exhausted")]
    PoolExhausted { router: String, segment: usize },
}

/// Hand `client` an address from `segment`.
///
/// Purges expired and out-of-pool leases, renews the client's existing lease
/// if it still has one, and otherwise takes the lowest pool address that is
/// neither leased nor held by another device. Returns `None` when the pool is
/// exhausted.
pub fn allocate(
    segment: &mut LanSegment,
    client: DeviceId,
    now: u64,
    registry: &AddressRegistry,
) -> Option<Allocation> {
    let purged = segment.purge(now);
    if purged > 0 {
        debug!("Purged {} stale lease(s) from segment {}", purged, segment.ip_address());
    }

    if let Some((ip, _)) = segment.lease_of(client) {
        let lease = segment.renew(ip, now)?.clone();
        return Some(Allocation {
            ip: Ipv4Addr::from(ip),
            lease,
            renewed: true,
        });
    }

    let mut used: Vec<u32> = segment.leases().keys().copied().collect();
    used.extend(registry.held_in(segment.pool_range(), client));
    used.sort_unstable();
    used.dedup();

    let ip = segment
        .pool_range()
        .find(|ip| used.binary_search(ip).is_err() && !registry.is_held_by_other(*ip, client))?;
    let lease = segment.grant(ip, client, now);
    Some(Allocation {
        ip: Ipv4Addr::from(ip),
        lease,
        renewed: false,
    })
}

/// Obtain (or renew) an address for `client` and write it into its config.
///
/// On success the client's address, mask and gateway come from the serving
/// segment and `dhcp_enabled` is set. On failure the client is left at
/// `0.0.0.0` with no lease anywhere.
pub fn request_dhcp_address(topology: &mut Topology, client: DeviceId, now: u64) -> Result<DhcpOffer, DhcpError> {
    let device = topology.device(client).ok_or(DhcpError::UnknownDevice(client))?;
    if !device.kind.is_endpoint() {
        return Err(DhcpError::NotDhcpClient(device.name.clone()));
    }
    let client_name = device.name.clone();

    let Some(serving) = find_serving_segment(topology, client) else {
        release(topology, client);
        reset_client(topology, client);
        warn!("DHCP request from '{}' found no server", client_name);
        return Err(DhcpError::NoDhcpServerFound(client_name));
    };

    release_elsewhere(topology, client, serving);
    let registry = AddressRegistry::from_topology(topology);
    let router_name = topology.name_of(serving.router);
    let segment = topology
        .segment_mut(serving.router, serving.segment)
        .ok_or_else(|| DhcpError::NoDhcpServerFound(client_name.clone()))?;

    let Some(allocation) = allocate(segment, client, now, &registry) else {
        reset_client(topology, client);
        warn!(
            "DHCP pool of '{}' segment {} exhausted; '{}' left without an address",
            router_name, serving.segment, client_name
        );
        return Err(DhcpError::PoolExhausted {
            router: router_name,
            segment: serving.segment,
        });
    };

    let subnet_mask = segment.subnet_mask();
    let gateway = segment.ip_address();
    if let Some(device) = topology.device_mut(client) {
        device.config.ip_address = allocation.ip.to_string();
        device.config.subnet_mask = subnet_mask.to_string();
        device.config.default_gateway = gateway.to_string();
        device.config.dhcp_enabled = true;
    }

    info!(
        "{} {} to '{}' from '{}' segment {} (expires at {} ms)",
        if allocation.renewed { "Renewed" } else { "Leased" },
        allocation.ip,
        client_name,
        router_name,
        serving.segment,
        allocation.lease.expires_at
    );

    Ok(DhcpOffer {
        client,
        router: serving.router,
        segment: serving.segment,
        ip: allocation.ip,
        subnet_mask,
        gateway,
        lease: allocation.lease,
        renewed: allocation.renewed,
    })
}

/// Leave the client at the sentinel address, still marked as a DHCP client
fn reset_client(topology: &mut Topology, client: DeviceId) {
    if let Some(device) = topology.device_mut(client) {
        device.config.clear_address();
        device.config.dhcp_enabled = true;
    }
}

/// Remove every lease `client` holds on any router; returns how many went
pub fn release(topology: &mut Topology, client: DeviceId) -> usize {
    let mut released = 0;
    for router in topology.device_ids() {
        if let Some(device) = topology.device_mut(router) {
            for segment in &mut device.config.lan_segments {
                released += segment.revoke_client(client).len();
            }
        }
    }
    released
}

/// Remove the client's leases everywhere except the segment about to serve it
fn release_elsewhere(topology: &mut Topology, client: DeviceId, keep: ServingSegment) {
    for router in topology.device_ids() {
        let Some(device) = topology.device_mut(router) else {
            continue;
        };
        for (index, segment) in device.config.lan_segments.iter_mut().enumerate() {
            if router == keep.router && index == keep.segment {
                continue;
            }
            for ip in segment.revoke_client(client) {
                debug!("Released {} held by {} on {} segment {}", Ipv4Addr::from(ip), client, router, index);
            }
        }
    }
}

/// Revoke the client's leases on `router` and reset it to the sentinel
/// pending reallocation
pub fn revoke(topology: &mut Topology, client: DeviceId, router: DeviceId) -> usize {
    let revoked = topology.device_mut(router).map_or(0, |device| {
        device
            .config
            .lan_segments
            .iter_mut()
            .map(|segment| segment.revoke_client(client).len())
            .sum()
    });
    if let Some(device) = topology.device_mut(client) {
        device.config.clear_address();
    }
    revoked
}

/// Whether `client` currently holds a lease on any segment of `router`
fn holds_lease_on(topology: &Topology, client: DeviceId, router: DeviceId) -> bool {
    topology.device(router).is_some_and(|device| {
        device
            .config
            .lan_segments
            .iter()
            .any(|segment| segment.lease_of(client).is_some())
    })
}

/// Re-run allocation for every DHCP client of `router`.
///
/// Clients served by the router, and clients still holding a lease on it,
/// lose their lease and ask again, so nobody keeps an address from a range
/// that was just edited away. Iterates over a snapshot of device ids.
pub fn redistribute(
    topology: &mut Topology,
    router: DeviceId,
    now: u64,
) -> Vec<(DeviceId, Result<DhcpOffer, DhcpError>)> {
    let clients: Vec<DeviceId> = topology
        .devices()
        .filter(|device| device.kind.is_endpoint() && device.config.dhcp_enabled)
        .map(|device| device.id)
        .collect();

    let mut results = Vec::new();
    for client in clients {
        let served = find_serving_segment(topology, client).map(|serving| serving.router) == Some(router);
        if !served && !holds_lease_on(topology, client, router) {
            continue;
        }
        revoke(topology, client, router);
        results.push((client, request_dhcp_address(topology, client, now)));
    }

    info!(
        "Redistributed {} DHCP client(s) of '{}'",
        results.len(),
        topology.name_of(router)
    );
    results
}

/// Apply a segment edit and move the router's clients accordingly
pub fn configure_segment(
    topology: &mut Topology,
    router: DeviceId,
    index: usize,
    settings: &SegmentSettings,
    now: u64,
) -> Result<Vec<(DeviceId, Result<DhcpOffer, DhcpError>)>, SegmentError> {
    let router_name = topology.name_of(router);
    let segment = topology
        .segment_mut(router, index)
        .ok_or(SegmentError::UnknownSegment {
            router: router_name,
            index,
        })?;
    settings.apply(segment)?;
    Ok(redistribute(topology, router, now))
}

/// Drop expired leases on every router; clients still configured with an
/// expired address fall back to the sentinel. Returns how many leases went.
pub fn sweep_expired(topology: &mut Topology, now: u64) -> usize {
    let mut expired: Vec<(DeviceId, String)> = Vec::new();
    for router in topology.device_ids() {
        let Some(device) = topology.device_mut(router) else {
            continue;
        };
        for segment in &mut device.config.lan_segments {
            let stale: Vec<(u32, DeviceId)> = segment
                .leases()
                .iter()
                .filter(|(_, lease)| lease.is_expired(now))
                .map(|(ip, lease)| (*ip, lease.client))
                .collect();
            for (ip, client) in stale {
                segment.revoke_client(client);
                expired.push((client, Ipv4Addr::from(ip).to_string()));
            }
        }
    }

    for (client, ip) in &expired {
        if let Some(device) = topology.device_mut(*client) {
            if device.config.ip_address == *ip {
                info!("Lease on {} held by '{}' expired", ip, device.name);
                device.config.clear_address();
            }
        }
    }
    expired.len()
}
