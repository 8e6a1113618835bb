//! IP address arithmetic and address bookkeeping.
//!
//! `address` holds the pure dotted-quad arithmetic the rest of the crate is
//! built on; `registry` tracks which device holds which literal address so
//! that no address is ever held twice.

pub mod address;
pub mod registry;

// Re-export commonly used types
pub use address::{
    can_communicate_directly, is_same_subnet, is_valid_address, AddressFormatError, SENTINEL_ADDRESS,
};
pub use registry::{AddressConflict, AddressRegistry};
