use std::collections::{HashMap, HashSet};
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use udplb::{AddressResolver, MacAddr, Neighbor, NetlinkError, NeighborTable, ResolveError};

pub const IFINDEX: u32 = 7;

pub fn mac(last: u8) -> MacAddr {
    MacAddr::new([0x02, 0x42, 0xac, 0x11, 0x00, last])
}

/// Neighbor table that records every mutation.
#[derive(Debug, Default)]
pub struct FakeNeighbors {
    pub entries: Vec<Neighbor>,
    pub adds: usize,
    pub updates: usize,
    pub lists: usize,
    pub fail_list: bool,
    /// Writes for these addresses are rejected.
    pub rejected: HashSet<Ipv4Addr>,
}

impl FakeNeighbors {
    pub fn with_entries(entries: Vec<Neighbor>) -> Self {
        Self {
            entries,
            ..Default::default()
        }
    }

    pub fn mutations(&self) -> usize {
        self.adds + self.updates
    }

    pub fn mac_of(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries
            .iter()
            .find(|n| n.ifindex == IFINDEX && n.ip == ip)
            .map(|n| n.mac)
    }

    fn check(&self, neighbor: &Neighbor) -> Result<(), NetlinkError> {
        if self.rejected.contains(&neighbor.ip) {
            return Err(NetlinkError::Kernel(io::Error::from_raw_os_error(
                libc::EPERM,
            )));
        }
        Ok(())
    }
}

impl NeighborTable for FakeNeighbors {
    fn list(&mut self, ifindex: u32) -> Result<Vec<Neighbor>, NetlinkError> {
        self.lists += 1;
        if self.fail_list {
            return Err(NetlinkError::Socket(io::Error::from_raw_os_error(
                libc::ENOBUFS,
            )));
        }
        Ok(self
            .entries
            .iter()
            .filter(|n| n.ifindex == ifindex)
            .copied()
            .collect())
    }

    fn add(&mut self, neighbor: &Neighbor) -> Result<(), NetlinkError> {
        self.check(neighbor)?;
        if self
            .entries
            .iter()
            .any(|n| n.ifindex == neighbor.ifindex && n.ip == neighbor.ip)
        {
            return Err(NetlinkError::Kernel(io::Error::from_raw_os_error(
                libc::EEXIST,
            )));
        }
        self.adds += 1;
        self.entries.push(*neighbor);
        Ok(())
    }

    fn update(&mut self, neighbor: &Neighbor) -> Result<(), NetlinkError> {
        self.check(neighbor)?;
        self.updates += 1;
        match self
            .entries
            .iter_mut()
            .find(|n| n.ifindex == neighbor.ifindex && n.ip == neighbor.ip)
        {
            Some(entry) => *entry = *neighbor,
            None => self.entries.push(*neighbor),
        }
        Ok(())
    }
}

/// Answers probes from a fixed table; unknown addresses time out.
#[derive(Debug, Default)]
pub struct FakeResolver {
    pub answers: HashMap<Ipv4Addr, MacAddr>,
}

impl FakeResolver {
    pub fn new(answers: impl IntoIterator<Item = (Ipv4Addr, MacAddr)>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
        }
    }
}

#[async_trait]
impl AddressResolver for FakeResolver {
    async fn resolve(&self, target: Ipv4Addr) -> Result<MacAddr, ResolveError> {
        self.answers
            .get(&target)
            .copied()
            .ok_or(ResolveError::Timeout {
                target,
                timeout: Duration::from_millis(500),
            })
    }
}

/// Never answers: every probe waits out `timeout` and fails.
#[derive(Debug)]
pub struct SilentResolver {
    pub timeout: Duration,
    pub probes: Arc<AtomicUsize>,
}

#[async_trait]
impl AddressResolver for SilentResolver {
    async fn resolve(&self, target: Ipv4Addr) -> Result<MacAddr, ResolveError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.timeout).await;
        Err(ResolveError::Timeout {
            target,
            timeout: self.timeout,
        })
    }
}
