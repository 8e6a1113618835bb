//! Breadth-first traversal and shortest paths over the wiring graph.
//!
//! Neighbours are expanded in the order their connections were created,
//! which makes every traversal, and therefore every path and every DHCP
//! server discovery, deterministic.

use std::collections::{HashMap, HashSet, VecDeque};

use super::graph::Topology;
use super::types::{ConnectionId, Device, DeviceId};

/// How the traversal reached a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub parent: DeviceId,
    pub via: ConnectionId,
    /// Port index on the reached device where the wire plugs in
    pub entry_port: usize,
}

/// Result of a breadth-first traversal from one root
#[derive(Debug, Clone, Default)]
pub struct BfsTree {
    order: Vec<DeviceId>,
    hops: HashMap<DeviceId, Hop>,
}

impl BfsTree {
    /// Devices in discovery order, root first
    pub fn order(&self) -> &[DeviceId] {
        &self.order
    }

    pub fn hop(&self, id: DeviceId) -> Option<&Hop> {
        self.hops.get(&id)
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.order.contains(&id)
    }

    /// Root-to-target device sequence, empty when the target was not reached
    pub fn path_to(&self, target: DeviceId) -> Vec<DeviceId> {
        let Some(root) = self.order.first().copied() else {
            return Vec::new();
        };
        if target == root {
            return vec![root];
        }
        if !self.hops.contains_key(&target) {
            return Vec::new();
        }

        let mut path = vec![target];
        let mut current = target;
        while let Some(hop) = self.hops.get(&current) {
            path.push(hop.parent);
            current = hop.parent;
        }
        path.reverse();
        path
    }
}

/// Breadth-first traversal from `root`.
///
/// The root is always expanded; any other device is expanded only when
/// `expand` returns true for it (it is still recorded as reached). An unknown
/// root yields an empty tree.
pub fn bfs_tree<F>(topology: &Topology, root: DeviceId, expand: F) -> BfsTree
where
    F: Fn(&Device) -> bool,
{
    let mut tree = BfsTree::default();
    if topology.device(root).is_none() {
        return tree;
    }

    let mut visited = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    tree.order.push(root);

    while let Some(current) = queue.pop_front() {
        if current != root {
            match topology.device(current) {
                Some(device) if expand(device) => {}
                _ => continue,
            }
        }

        for connection in topology.links_of(current) {
            let Some(remote) = connection.other_end(current) else {
                continue;
            };
            if !visited.insert(remote.device) {
                continue;
            }
            tree.hops.insert(
                remote.device,
                Hop {
                    parent: current,
                    via: connection.id,
                    entry_port: remote.port,
                },
            );
            tree.order.push(remote.device);
            queue.push_back(remote.device);
        }
    }

    tree
}

/// Shortest device sequence from `source` to `target`.
///
/// Returns `[source]` when both are the same device and an empty sequence
/// when no wiring joins them or either device does not exist.
pub fn find_path(topology: &Topology, source: DeviceId, target: DeviceId) -> Vec<DeviceId> {
    if topology.device(target).is_none() {
        return Vec::new();
    }
    bfs_tree(topology, source, |_| true).path_to(target)
}
