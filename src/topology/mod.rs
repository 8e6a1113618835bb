//! Network topology module.
//!
//! This module contains the device/port/connection model, the `Topology`
//! context that owns it, and the breadth-first path finder built on top.

pub mod types;
pub mod graph;
pub mod path;

// Re-export key types and functions for easier access
pub use types::{Connection, ConnectionId, Device, DeviceId, DeviceKind, Endpoint, NetworkConfig, Port, MAX_LAN_SEGMENTS};
pub use graph::{Topology, TopologyError};
pub use path::{bfs_tree, find_path, BfsTree, Hop};
