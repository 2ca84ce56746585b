use std::io;
use std::net::Ipv4Addr;

use log::warn;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::if_nametoindex;

use crate::mac::MacAddr;

/// Addresses of the interface the classifier is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub index: u32,
    pub mac: MacAddr,
    /// Source address of ARP requests. `0.0.0.0` when the interface has none.
    pub ipv4: Ipv4Addr,
}

impl Interface {
    pub fn lookup(name: &str) -> io::Result<Self> {
        let index = if_nametoindex(name)?;

        let mut mac = None;
        let mut ipv4 = None;
        for ifaddr in getifaddrs()? {
            if ifaddr.interface_name != name {
                continue;
            }
            let Some(address) = ifaddr.address else {
                continue;
            };
            if let Some(link) = address.as_link_addr() {
                mac = mac.or(link.addr().map(MacAddr::new));
            }
            if let Some(sin) = address.as_sockaddr_in() {
                ipv4 = ipv4.or(Some(sin.ip()));
            }
        }

        let ipv4 = ipv4.unwrap_or_else(|| {
            warn!("{name} has no IPv4 address, probing from 0.0.0.0");
            Ipv4Addr::UNSPECIFIED
        });
        Ok(Self {
            name: name.to_string(),
            index,
            mac: mac.unwrap_or(MacAddr::ZERO),
            ipv4,
        })
    }
}
