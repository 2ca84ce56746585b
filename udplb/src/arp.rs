//! Hardware address resolution by ARP.

use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use async_trait::async_trait;
use log::trace;
use tokio::io::unix::AsyncFd;
use udplb_common::order::{hton_ip, htons, ntoh_ip, ntohs};

use crate::error::ResolveError;
use crate::iface::Interface;
use crate::mac::MacAddr;

pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

const ETH_P_ARP: u16 = 0x0806;
const ETH_P_IP: u16 = 0x0800;
const ARPHRD_ETHER: u16 = 1;
const ARPOP_REQUEST: u16 = 1;
const ARPOP_REPLY: u16 = 2;
const ARP_LEN: usize = 28;

#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, target: Ipv4Addr) -> Result<MacAddr, ResolveError>;
}

pub struct ArpResolver {
    ifindex: u32,
    source_mac: MacAddr,
    source_ip: Ipv4Addr,
    timeout: Duration,
}

impl ArpResolver {
    pub fn new(iface: &Interface) -> Self {
        Self {
            ifindex: iface.index,
            source_mac: iface.mac,
            source_ip: iface.ipv4,
            timeout: PROBE_TIMEOUT,
        }
    }

    fn open_socket(&self) -> io::Result<OwnedFd> {
        let protocol = ETH_P_ARP.to_be();
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                protocol as libc::c_int,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let addr = link_addr(self.ifindex, None);
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(fd)
    }

    fn send_request(&self, fd: RawFd, target: Ipv4Addr) -> io::Result<()> {
        let packet = arp_request(self.source_mac, self.source_ip, target);
        let addr = link_addr(self.ifindex, Some(MacAddr::BROADCAST));
        let rc = unsafe {
            libc::sendto(
                fd,
                packet.as_ptr() as *const libc::c_void,
                packet.len(),
                0,
                &addr as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[async_trait]
impl AddressResolver for ArpResolver {
    async fn resolve(&self, target: Ipv4Addr) -> Result<MacAddr, ResolveError> {
        let fd = AsyncFd::new(self.open_socket()?)?;
        self.send_request(fd.as_raw_fd(), target)?;
        trace!("ARP request for {target} sent on ifindex {}", self.ifindex);

        tokio::time::timeout(self.timeout, wait_for_reply(&fd, target))
            .await
            .map_err(|_| ResolveError::Timeout {
                target,
                timeout: self.timeout,
            })?
    }
}

async fn wait_for_reply(fd: &AsyncFd<OwnedFd>, target: Ipv4Addr) -> Result<MacAddr, ResolveError> {
    let mut buf = [0u8; 64];
    loop {
        let mut guard = fd.readable().await?;
        match guard.try_io(|inner| recv(inner.as_raw_fd(), &mut buf)) {
            Ok(Ok(len)) => {
                if let Some(mac) = parse_reply(&buf[..len], target) {
                    return Ok(mac);
                }
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_would_block) => continue,
        }
    }
}

fn recv(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let rc = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc as usize)
}

fn link_addr(ifindex: u32, dest: Option<MacAddr>) -> libc::sockaddr_ll {
    let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as libc::c_ushort;
    addr.sll_protocol = ETH_P_ARP.to_be();
    addr.sll_ifindex = ifindex as libc::c_int;
    if let Some(mac) = dest {
        addr.sll_halen = 6;
        addr.sll_addr[..6].copy_from_slice(mac.as_bytes());
    }
    addr
}

/// An Ethernet/IPv4 ARP request, without the link-layer header.
fn arp_request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target: Ipv4Addr) -> [u8; ARP_LEN] {
    let mut pkt = [0u8; ARP_LEN];
    pkt[0..2].copy_from_slice(&htons(ARPHRD_ETHER));
    pkt[2..4].copy_from_slice(&htons(ETH_P_IP));
    pkt[4] = 6;
    pkt[5] = 4;
    pkt[6..8].copy_from_slice(&htons(ARPOP_REQUEST));
    pkt[8..14].copy_from_slice(sender_mac.as_bytes());
    pkt[14..18].copy_from_slice(&hton_ip(sender_ip));
    // target hardware address stays zero
    pkt[24..28].copy_from_slice(&hton_ip(target));
    pkt
}

/// The sender hardware address of an ARP reply from `target`.
fn parse_reply(pkt: &[u8], target: Ipv4Addr) -> Option<MacAddr> {
    if pkt.len() < ARP_LEN {
        return None;
    }
    let is_ether_ipv4 = ntohs(&pkt[0..2]) == ARPHRD_ETHER
        && ntohs(&pkt[2..4]) == ETH_P_IP
        && pkt[4] == 6
        && pkt[5] == 4;
    if !is_ether_ipv4 || ntohs(&pkt[6..8]) != ARPOP_REPLY || ntoh_ip(&pkt[14..18]) != target {
        return None;
    }
    MacAddr::try_from(&pkt[8..14]).ok()
}
