//! # netbuilder - simulation core of an educational network builder
//!
//! This library models hosts, servers, switches, hubs and routers wired into
//! an arbitrary graph, and answers the questions a network lab asks of it.
//!
//! ## Overview
//!
//! - Can two endpoints talk, directly or through a router, and if not, why?
//! - Which address does a DHCP client get from a multi-segment router?
//! - Which physical path does a probe packet travel?
//! - In what order are visual packet events played without overlapping?
//!
//! ## Architecture
//!
//! - `ip`: dotted-quad arithmetic and the global address registry
//! - `topology`: devices, ports, connections and breadth-first path finding
//! - `reachability`: the direct/routed decision procedure and hop estimation
//! - `dhcp`: LAN segments, server discovery, lease allocation and redistribution
//! - `animation`: the FIFO animation sequencer and packet effect planning
//! - `config` / `config_loader`: YAML lab scenarios
//! - `orchestrator`: runs a scenario and produces a report
//! - `utils`: topology consistency checks
//!
//! ## Example Usage
//!
//! ```rust
//! use netbuilder::dhcp::{request_dhcp_address, LanSegment};
//! use netbuilder::reachability::check_reachability;
//! use netbuilder::topology::{DeviceKind, Endpoint, Topology};
//!
//! let mut topology = Topology::new();
//! let router = topology.add_device("r1", DeviceKind::Router)?;
//! let lan = LanSegment::new("192.168.1.1", "255.255.255.0")?.with_dhcp(true);
//! topology.add_segment(router, lan)?;
//! topology.add_segment(router, LanSegment::new("192.168.2.1", "255.255.255.0")?)?;
//!
//! let laptop = topology.add_device("laptop", DeviceKind::Host)?;
//! let server = topology.add_device("web", DeviceKind::Server)?;
//! topology.connect(Endpoint::new(laptop, 0), Endpoint::new(router, 1))?;
//! topology.connect(Endpoint::new(server, 0), Endpoint::new(router, 2))?;
//! topology.set_address(server, "192.168.2.10", "255.255.255.0", "192.168.2.1")?;
//!
//! let offer = request_dhcp_address(&mut topology, laptop, 0)?;
//! assert_eq!(offer.ip.to_string(), "192.168.1.100");
//!
//! let verdict = check_reachability(&topology, laptop, server);
//! assert!(verdict.reachable, "{}", verdict.reason);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Error Handling
//!
//! Expected outcomes such as an unreachable target or an exhausted pool are
//! values (`Reachability`, `DhcpError`). Scenario loading and orchestration
//! return `color_eyre::Result` with context attached.

pub mod animation;
pub mod config;
pub mod config_loader;
pub mod dhcp;
pub mod ip;
pub mod orchestrator;
pub mod reachability;
pub mod topology;
pub mod utils;
