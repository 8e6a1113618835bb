//! Address registry.
//!
//! Snapshot of every literal address held anywhere in a topology, used to
//! keep addresses unique across static assignment and DHCP allocation.
//! Router interface addresses (WAN and every LAN segment gateway) count as
//! held addresses.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use super::address::{ip_to_int, AddressFormatError};
use crate::topology::{DeviceId, Topology};

/// Two devices found holding the same address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressConflict {
    pub ip: u32,
    pub first: DeviceId,
    pub second: DeviceId,
}

/// Registry of held addresses for one topology snapshot
#[derive(Debug, Default, Clone)]
pub struct AddressRegistry {
    /// Integer address -> holding device
    holders: HashMap<u32, DeviceId>,
    /// Duplicates seen while building the snapshot
    conflicts: Vec<AddressConflict>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the valid interface addresses of every device, in creation order
    pub fn from_topology(topology: &Topology) -> Self {
        let mut registry = Self::new();
        for device in topology.devices() {
            for address in device.interface_addresses() {
                if let Ok(ip) = ip_to_int(&address) {
                    // Conflicts are recorded, not fatal
                    let _ = registry.register(ip, device.id);
                }
            }
        }
        registry
    }

    /// Record that `device` holds `ip`.
    ///
    /// Returns the existing holder when another device already owns it; the
    /// conflict is remembered for [`conflicts`](Self::conflicts).
    pub fn register(&mut self, ip: u32, device: DeviceId) -> Result<(), DeviceId> {
        match self.holders.get(&ip) {
            Some(existing) if *existing == device => Ok(()),
            Some(existing) => {
                let existing = *existing;
                self.conflicts.push(AddressConflict {
                    ip,
                    first: existing,
                    second: device,
                });
                Err(existing)
            }
            None => {
                self.holders.insert(ip, device);
                Ok(())
            }
        }
    }

    /// Device holding a dotted-quad address
    pub fn holder_of(&self, ip: &str) -> Result<Option<DeviceId>, AddressFormatError> {
        Ok(self.holder(ip_to_int(ip)?))
    }

    /// Device holding an integer address
    pub fn holder(&self, ip: u32) -> Option<DeviceId> {
        self.holders.get(&ip).copied()
    }

    /// Whether a device other than `device` holds `ip`
    pub fn is_held_by_other(&self, ip: u32, device: DeviceId) -> bool {
        self.holder(ip).is_some_and(|holder| holder != device)
    }

    /// Held addresses inside `range` that belong to devices other than `device`
    pub fn held_in(&self, range: RangeInclusive<u32>, device: DeviceId) -> Vec<u32> {
        let mut held: Vec<u32> = self
            .holders
            .iter()
            .filter(|(ip, holder)| range.contains(ip) && **holder != device)
            .map(|(ip, _)| *ip)
            .collect();
        held.sort_unstable();
        held
    }

    pub fn conflicts(&self) -> &[AddressConflict] {
        &self.conflicts
    }
}
