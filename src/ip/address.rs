//! IPv4 address arithmetic over dotted-quad strings.
//!
//! Addresses in a device's network configuration are stored exactly as the
//! user typed them, so every text-level function validates its input and
//! reports an [`AddressFormatError`] rather than guessing. Callers that already
//! hold parsed values can use the integer helpers ([`network_of`],
//! [`same_subnet`]) directly.

use std::net::Ipv4Addr;

/// Address meaning "no address currently assigned".
pub const SENTINEL_ADDRESS: &str = "0.0.0.0";

/// Invalid dotted-quad input to a validity or arithmetic function
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid IPv4 address '{input}'")]
pub struct AddressFormatError {
    pub input: String,
}

fn parse(ip: &str) -> Result<Ipv4Addr, AddressFormatError> {
    ip.parse::<Ipv4Addr>().map_err(|_| AddressFormatError {
        input: ip.to_string(),
    })
}

/// Check that a string is exactly four dot-separated decimal octets in [0,255]
///
/// # Examples
/// ```
/// use netbuilder::ip::address::is_valid_address;
///
/// assert!(is_valid_address("192.168.1.10"));
/// assert!(!is_valid_address("192.168.1"));
/// assert!(!is_valid_address("192.168.1.256"));
/// assert!(!is_valid_address(" 10.0.0.1"));
/// ```
pub fn is_valid_address(s: &str) -> bool {
    s.parse::<Ipv4Addr>().is_ok()
}

/// Convert a dotted quad to its 32-bit big-endian value
pub fn ip_to_int(ip: &str) -> Result<u32, AddressFormatError> {
    parse(ip).map(u32::from)
}

/// Convert a 32-bit value back to a dotted quad
pub fn int_to_ip(value: u32) -> String {
    Ipv4Addr::from(value).to_string()
}

/// Network part of an integer address under an integer mask
pub fn network_of(ip: u32, mask: u32) -> u32 {
    ip & mask
}

/// Broadcast address of an integer address under an integer mask
pub fn broadcast_of(ip: u32, mask: u32) -> u32 {
    ip | !mask
}

/// Integer form of [`is_same_subnet`]
pub fn same_subnet(a: u32, b: u32, mask: u32) -> bool {
    network_of(a, mask) == network_of(b, mask)
}

/// Network address (`ip AND mask`)
pub fn network_address(ip: &str, mask: &str) -> Result<String, AddressFormatError> {
    Ok(int_to_ip(network_of(ip_to_int(ip)?, ip_to_int(mask)?)))
}

/// Broadcast address (`ip OR NOT mask`)
pub fn broadcast_address(ip: &str, mask: &str) -> Result<String, AddressFormatError> {
    Ok(int_to_ip(broadcast_of(ip_to_int(ip)?, ip_to_int(mask)?)))
}

/// Number of set bits in the mask
pub fn mask_to_prefix_length(mask: &str) -> Result<u32, AddressFormatError> {
    Ok(ip_to_int(mask)?.count_ones())
}

/// Whether two addresses share a network under a single mask
pub fn is_same_subnet(ip_a: &str, ip_b: &str, mask: &str) -> Result<bool, AddressFormatError> {
    Ok(same_subnet(ip_to_int(ip_a)?, ip_to_int(ip_b)?, ip_to_int(mask)?))
}

/// Whether two hosts can talk without a router.
///
/// Each end judges locality with its own mask, so both views must agree:
/// a host configured with a wider mask may consider its peer on-link while
/// the peer, using a narrower mask, sends its replies to the gateway instead.
pub fn can_communicate_directly(
    ip_a: &str,
    mask_a: &str,
    ip_b: &str,
    mask_b: &str,
) -> Result<bool, AddressFormatError> {
    Ok(is_same_subnet(ip_a, ip_b, mask_a)? && is_same_subnet(ip_b, ip_a, mask_b)?)
}

/// Render `network/prefix`, e.g. `192.168.1.0/24`
pub fn format_prefix(ip: &str, mask: &str) -> Result<String, AddressFormatError> {
    Ok(format!(
        "{}/{}",
        network_address(ip, mask)?,
        mask_to_prefix_length(mask)?
    ))
}
