//! LAN segments and their address leases.
//!
//! A segment is one routed interface group on a router: a gateway address,
//! a subnet, an optional DHCP pool and the leases handed out from it. Pool
//! bounds only change through validating setters, so `pool_start <= pool_end`
//! always holds. Leases that fall outside the pool after an edit are purged by
//! the next allocation cycle, never kept.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

use serde::Serialize;

use crate::ip::address::{broadcast_of, ip_to_int, network_of, AddressFormatError};
use crate::topology::DeviceId;

/// Default lease duration: one day
pub const DEFAULT_LEASE_SECONDS: u64 = 86_400;

/// Host offset of the first pool address in a freshly created segment
const DEFAULT_POOL_OFFSET: u32 = 100;

/// Number of addresses in a freshly created segment's pool
const DEFAULT_POOL_SIZE: u32 = 100;

/// A temporary client-to-address binding, timestamps in simulation milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    pub client: DeviceId,
    pub assigned_at: u64,
    pub expires_at: u64,
}

impl Lease {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }

    /// Milliseconds left before expiry
    pub fn remaining(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}

/// Invalid segment configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    #[error(transparent)]
    Address(#[from] AddressFormatError),

    #[error("Pool start {start} is above pool end {end}")]
    InvertedPool { start: Ipv4Addr, end: Ipv4Addr },

    #[error("Pool address {address} is not a usable host of segment network {network}")]
    PoolOutsideNetwork { address: Ipv4Addr, network: Ipv4Addr },

    #[error("Lease time must be at least one second")]
    ZeroLeaseTime,

    #[error("{router} has no LAN segment {index}")]
    UnknownSegment { router: String, index: usize },
}

/// First and last usable host of the subnet holding `ip`. The network and
/// broadcast addresses are excluded unless the subnet is too small to spare them.
fn host_bounds(ip: u32, mask: u32) -> (u32, u32) {
    let network = network_of(ip, mask);
    let broadcast = broadcast_of(ip, mask);
    let first_host = network.saturating_add(1).min(broadcast);
    let last_host = broadcast.saturating_sub(1).max(first_host);
    (first_host, last_host)
}

/// One routed interface group on a router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanSegment {
    ip_address: Ipv4Addr,
    subnet_mask: Ipv4Addr,
    pub dhcp_enabled: bool,
    pool_start: u32,
    pool_end: u32,
    lease_seconds: u64,
    leases: BTreeMap<u32, Lease>,
}

impl LanSegment {
    /// Segment with gateway `ip_address`, DHCP disabled, and a default pool of
    /// up to a hundred addresses starting at host `.100` of the subnet.
    pub fn new(ip_address: &str, subnet_mask: &str) -> Result<Self, SegmentError> {
        let ip = ip_to_int(ip_address)?;
        let mask = ip_to_int(subnet_mask)?;

        let network = network_of(ip, mask);
        let (first_host, last_host) = host_bounds(ip, mask);
        let pool_start = network
            .saturating_add(DEFAULT_POOL_OFFSET)
            .clamp(first_host, last_host);
        let pool_end = pool_start
            .saturating_add(DEFAULT_POOL_SIZE - 1)
            .min(last_host);

        Ok(Self {
            ip_address: Ipv4Addr::from(ip),
            subnet_mask: Ipv4Addr::from(mask),
            dhcp_enabled: false,
            pool_start,
            pool_end,
            lease_seconds: DEFAULT_LEASE_SECONDS,
            leases: BTreeMap::new(),
        })
    }

    /// Builder form of [`set_pool`](Self::set_pool)
    pub fn with_pool(mut self, start: &str, end: &str) -> Result<Self, SegmentError> {
        self.set_pool(start, end)?;
        Ok(self)
    }

    /// Builder form of enabling DHCP
    pub fn with_dhcp(mut self, enabled: bool) -> Self {
        self.dhcp_enabled = enabled;
        self
    }

    /// Builder form of [`set_lease_seconds`](Self::set_lease_seconds)
    pub fn with_lease_seconds(mut self, seconds: u64) -> Result<Self, SegmentError> {
        self.set_lease_seconds(seconds)?;
        Ok(self)
    }

    /// Change the pool bounds. Existing leases are left alone until the next
    /// allocation cycle purges the ones that no longer fit.
    pub fn set_pool(&mut self, start: &str, end: &str) -> Result<(), SegmentError> {
        let start = ip_to_int(start)?;
        let end = ip_to_int(end)?;
        if start > end {
            return Err(SegmentError::InvertedPool {
                start: Ipv4Addr::from(start),
                end: Ipv4Addr::from(end),
            });
        }

        let gateway = u32::from(self.ip_address);
        let mask = u32::from(self.subnet_mask);
        let (first_host, last_host) = host_bounds(gateway, mask);
        for address in [start, end] {
            if !(first_host..=last_host).contains(&address) {
                return Err(SegmentError::PoolOutsideNetwork {
                    address: Ipv4Addr::from(address),
                    network: Ipv4Addr::from(network_of(gateway, mask)),
                });
            }
        }

        self.pool_start = start;
        self.pool_end = end;
        Ok(())
    }

    pub fn set_lease_seconds(&mut self, seconds: u64) -> Result<(), SegmentError> {
        if seconds == 0 {
            return Err(SegmentError::ZeroLeaseTime);
        }
        self.lease_seconds = seconds;
        Ok(())
    }

    /// Gateway address of the segment
    pub fn ip_address(&self) -> Ipv4Addr {
        self.ip_address
    }

    pub fn subnet_mask(&self) -> Ipv4Addr {
        self.subnet_mask
    }

    pub fn pool_start(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.pool_start)
    }

    pub fn pool_end(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.pool_end)
    }

    /// Integer pool bounds, inclusive
    pub fn pool_range(&self) -> RangeInclusive<u32> {
        self.pool_start..=self.pool_end
    }

    pub fn in_pool(&self, ip: u32) -> bool {
        self.pool_range().contains(&ip)
    }

    pub fn lease_seconds(&self) -> u64 {
        self.lease_seconds
    }

    /// Leases keyed by integer address, ascending
    pub fn leases(&self) -> &BTreeMap<u32, Lease> {
        &self.leases
    }

    /// The lease `client` holds here, if any
    pub fn lease_of(&self, client: DeviceId) -> Option<(u32, &Lease)> {
        self.leases
            .iter()
            .find(|(_, lease)| lease.client == client)
            .map(|(ip, lease)| (*ip, lease))
    }

    /// Drop expired leases and leases outside the pool; returns how many went
    pub(crate) fn purge(&mut self, now: u64) -> usize {
        let before = self.leases.len();
        let range = self.pool_range();
        self.leases
            .retain(|ip, lease| !lease.is_expired(now) && range.contains(ip));
        before - self.leases.len()
    }

    /// Extend the lease on `ip` to a full lease period from `now`
    pub(crate) fn renew(&mut self, ip: u32, now: u64) -> Option<&Lease> {
        let period = self.lease_seconds.saturating_mul(1000);
        let lease = self.leases.get_mut(&ip)?;
        lease.expires_at = now.saturating_add(period);
        Some(lease)
    }

    /// Record a fresh lease on `ip` for `client`
    pub(crate) fn grant(&mut self, ip: u32, client: DeviceId, now: u64) -> Lease {
        let lease = Lease {
            client,
            assigned_at: now,
            expires_at: now.saturating_add(self.lease_seconds.saturating_mul(1000)),
        };
        self.leases.insert(ip, lease.clone());
        lease
    }

    /// Remove every lease held by `client`, returning the freed addresses
    pub fn revoke_client(&mut self, client: DeviceId) -> Vec<u32> {
        let freed: Vec<u32> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.client == client)
            .map(|(ip, _)| *ip)
            .collect();
        for ip in &freed {
            self.leases.remove(ip);
        }
        freed
    }
}

/// A partial edit of a segment, as made from the router settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentSettings {
    pub dhcp_enabled: Option<bool>,
    pub pool_start: Option<String>,
    pub pool_end: Option<String>,
    pub lease_seconds: Option<u64>,
}

impl SegmentSettings {
    /// Apply the edit; nothing changes when any part is invalid
    pub fn apply(&self, segment: &mut LanSegment) -> Result<(), SegmentError> {
        let mut edited = segment.clone();
        if self.pool_start.is_some() || self.pool_end.is_some() {
            let start = self
                .pool_start
                .clone()
                .unwrap_or_else(|| edited.pool_start().to_string());
            let end = self
                .pool_end
                .clone()
                .unwrap_or_else(|| edited.pool_end().to_string());
            edited.set_pool(&start, &end)?;
        }
        if let Some(seconds) = self.lease_seconds {
            edited.set_lease_seconds(seconds)?;
        }
        if let Some(enabled) = self.dhcp_enabled {
            edited.dhcp_enabled = enabled;
        }
        *segment = edited;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> u32 {
        ip_to_int(s).unwrap()
    }

    #[test]
    fn test_default_pool() {
        let segment = LanSegment::new("192.168.1.1", "255.255.255.0").unwrap();
        assert_eq!(segment.pool_start(), Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(segment.pool_end(), Ipv4Addr::new(192, 168, 1, 199));
        assert!(!segment.dhcp_enabled);
        assert_eq!(segment.lease_seconds(), DEFAULT_LEASE_SECONDS);

        // Small subnets clamp the pool into the usable host range
        let small = LanSegment::new("10.0.0.1", "255.255.255.192").unwrap();
        assert_eq!(small.pool_start(), Ipv4Addr::new(10, 0, 0, 62));
        assert_eq!(small.pool_end(), Ipv4Addr::new(10, 0, 0, 62));
    }

    #[test]
    fn test_pool_validation() {
        let mut segment = LanSegment::new("192.168.1.1", "255.255.255.0").unwrap();
        assert_eq!(
            segment.set_pool("192.168.1.50", "192.168.1.40"),
            Err(SegmentError::InvertedPool {
                start: Ipv4Addr::new(192, 168, 1, 50),
                end: Ipv4Addr::new(192, 168, 1, 40)
            })
        );
        assert!(matches!(
            segment.set_pool("192.168.1.10", "192.168.2.10"),
            Err(SegmentError::PoolOutsideNetwork { .. })
        ));
        // Network and broadcast addresses are never handed out
        assert_eq!(
            segment.set_pool("192.168.1.250", "192.168.1.255"),
            Err(SegmentError::PoolOutsideNetwork {
                address: Ipv4Addr::new(192, 168, 1, 255),
                network: Ipv4Addr::new(192, 168, 1, 0)
            })
        );
        assert_eq!(
            segment.set_pool("192.168.1.0", "192.168.1.20"),
            Err(SegmentError::PoolOutsideNetwork {
                address: Ipv4Addr::new(192, 168, 1, 0),
                network: Ipv4Addr::new(192, 168, 1, 0)
            })
        );
        segment.set_pool("192.168.1.1", "192.168.1.254").unwrap();
        assert!(matches!(segment.set_pool("x", "192.168.1.10"), Err(SegmentError::Address(_))));
        segment.set_pool("192.168.1.10", "192.168.1.10").unwrap();
        assert_eq!(segment.pool_range(), ip("192.168.1.10")..=ip("192.168.1.10"));
        assert_eq!(segment.set_lease_seconds(0), Err(SegmentError::ZeroLeaseTime));
    }

    #[test]
    fn test_purge_drops_expired_and_out_of_range() {
        let mut segment = LanSegment::new("192.168.1.1", "255.255.255.0").unwrap();
        segment.set_lease_seconds(10).unwrap();
        segment.grant(ip("192.168.1.100"), DeviceId(1), 0);
        segment.grant(ip("192.168.1.150"), DeviceId(2), 5_000);
        segment.grant(ip("192.168.1.199"), DeviceId(3), 5_000);

        // First lease expires exactly at 10s
        assert_eq!(segment.purge(10_000), 1);
        assert!(segment.lease_of(DeviceId(1)).is_none());

        segment.set_pool("192.168.1.100", "192.168.1.160").unwrap();
        assert_eq!(segment.leases().len(), 2);
        assert_eq!(segment.purge(10_000), 1);
        assert_eq!(segment.lease_of(DeviceId(2)).map(|(ip, _)| ip), Some(ip("192.168.1.150")));
    }

    #[test]
    fn test_renew_and_revoke() {
        let mut segment = LanSegment::new("192.168.1.1", "255.255.255.0").unwrap();
        segment.set_lease_seconds(60).unwrap();
        let lease = segment.grant(ip("192.168.1.100"), DeviceId(7), 1_000);
        assert_eq!(lease.expires_at, 61_000);
        assert_eq!(lease.remaining(31_000), 30_000);

        let renewed = segment.renew(ip("192.168.1.100"), 30_000).unwrap();
        assert_eq!(renewed.expires_at, 90_000);
        assert_eq!(renewed.assigned_at, 1_000);

        assert_eq!(segment.revoke_client(DeviceId(7)), vec![ip("192.168.1.100")]);
        assert!(segment.leases().is_empty());
        assert!(segment.renew(ip("192.168.1.100"), 30_000).is_none());
    }

    #[test]
    fn test_settings_apply_atomically() {
        let mut segment = LanSegment::new("192.168.1.1", "255.255.255.0").unwrap();
        let bad = SegmentSettings {
            dhcp_enabled: Some(true),
            pool_end: Some("192.168.1.20".to_string()),
            ..SegmentSettings::default()
        };
        assert!(bad.apply(&mut segment).is_err());
        assert!(!segment.dhcp_enabled);

        let good = SegmentSettings {
            dhcp_enabled: Some(true),
            pool_start: Some("192.168.1.10".to_string()),
            pool_end: Some("192.168.1.20".to_string()),
            lease_seconds: Some(120),
        };
        good.apply(&mut segment).unwrap();
        assert!(segment.dhcp_enabled);
        assert_eq!(segment.pool_end(), Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(segment.lease_seconds(), 120);
    }
}
