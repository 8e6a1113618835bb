//! DHCP lease management: segments, server discovery and allocation

pub mod allocator;
pub mod lease;
pub mod segment;

pub use allocator::{
    allocate, configure_segment, redistribute, release, request_dhcp_address, revoke, sweep_expired, Allocation,
    DhcpError, DhcpOffer,
};
pub use lease::{LanSegment, Lease, SegmentError, SegmentSettings, DEFAULT_LEASE_SECONDS};
pub use segment::{find_serving_segment, ServingSegment};
