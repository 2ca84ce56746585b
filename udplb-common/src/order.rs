//! Network byte order is big-endian regardless of the host.

use core::net::Ipv4Addr;

/// Converts an IPv4 address into its 4-byte network order representation.
#[inline]
pub fn hton_ip(addr: Ipv4Addr) -> [u8; 4] {
    addr.octets()
}

/// Converts a `u16` into a 2-byte network order array.
#[inline]
pub fn htons(val: u16) -> [u8; 2] {
    val.to_be_bytes()
}

/// Reads a host order `u16` from the first two bytes of `buf`.
///
/// # Panics
///
/// Panics if `buf` is shorter than 2 bytes.
#[inline]
pub fn ntohs(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

/// Reads a host order `u32` from the first four bytes of `buf`.
///
/// # Panics
///
/// Panics if `buf` is shorter than 4 bytes.
#[inline]
pub fn ntohl(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Reads an IPv4 address from the first four bytes of `buf`.
///
/// # Panics
///
/// Panics if `buf` is shorter than 4 bytes.
#[inline]
pub fn ntoh_ip(buf: &[u8]) -> Ipv4Addr {
    Ipv4Addr::from(ntohl(buf))
}
