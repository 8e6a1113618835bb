//! Shared utilities: topology consistency checks.

pub mod validation;

pub use validation::{validate_address_uniqueness, validate_lease_consistency, validate_topology, validate_wiring};
