// `bpf_fib_lookup` in the TC program only succeeds once the kernel has a
// neighbor entry for the backend. Nothing in here is fatal.

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::arp::AddressResolver;
use crate::config::Config;
use crate::error::NetlinkError;
use crate::mac::MacAddr;
use crate::neighbor::{Neighbor, NeighborTable};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// What one backend's reconciliation did to the neighbor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Updated,
    Added,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub unchanged: usize,
    pub updated: usize,
    pub added: usize,
    /// Backends whose probe failed.
    pub unresolved: usize,
    /// Backends whose neighbor write failed.
    pub failed: usize,
}

impl fmt::Display for TickSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} unchanged, {} updated, {} added, {} unresolved, {} failed",
            self.unchanged, self.updated, self.added, self.unresolved, self.failed
        )
    }
}

pub struct Reconciler<N, R> {
    config: Arc<Config>,
    ifindex: u32,
    interval: Duration,
    neighbors: N,
    resolver: R,
}

impl<N, R> Reconciler<N, R>
where
    N: NeighborTable + Send,
    R: AddressResolver,
{
    pub fn new(config: Arc<Config>, ifindex: u32, neighbors: N, resolver: R) -> Self {
        Self {
            config,
            ifindex,
            interval: DEFAULT_INTERVAL,
            neighbors,
            resolver,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn neighbors(&self) -> &N {
        &self.neighbors
    }

    /// Ticks until `cancel` fires and returns the number of ticks run.
    ///
    /// Cancellation is seen before every probe and while sleeping. A probe
    /// in flight runs to completion or timeout first.
    pub async fn run(&mut self, cancel: CancellationToken) -> u64 {
        info!(
            "reconciling neighbors of {} backend address(es) on ifindex {} every {:?}",
            self.targets().len(),
            self.ifindex,
            self.interval
        );

        let mut ticks = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let summary = self.tick(&cancel).await;
            ticks += 1;
            debug!("neighbor reconciliation: {summary}");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("neighbor reconciliation stopped after {ticks} tick(s)");
        ticks
    }

    /// One pass over all backends. Stops before the next probe once `cancel`
    /// fires.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> TickSummary {
        let mut summary = TickSummary::default();

        let mut current = match self.neighbors.list(self.ifindex) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("failed to list neighbors of ifindex {}: {err}", self.ifindex);
                Vec::new()
            }
        };

        for ip in self.targets() {
            if cancel.is_cancelled() {
                debug!("neighbor reconciliation cancelled before probing {ip}");
                break;
            }
            debug!("fetching hardware address of {ip}");
            let mac = match self.resolver.resolve(ip).await {
                Ok(mac) => mac,
                Err(err) => {
                    warn!("failed to resolve {ip}: {err}");
                    summary.unresolved += 1;
                    continue;
                }
            };
            debug!("{ip} is at {mac}");

            match self.reconcile(ip, mac, &mut current) {
                Ok(Outcome::Unchanged) => summary.unchanged += 1,
                Ok(Outcome::Updated) => summary.updated += 1,
                Ok(Outcome::Added) => summary.added += 1,
                Err(err) => {
                    warn!("failed to set neighbor {ip} -> {mac}: {err}");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Distinct backend addresses; a backend shared by services is probed once.
    fn targets(&self) -> BTreeSet<Ipv4Addr> {
        self.config.backends().map(|b| b.address).collect()
    }

    fn reconcile(
        &mut self,
        ip: Ipv4Addr,
        mac: MacAddr,
        current: &mut Vec<Neighbor>,
    ) -> Result<Outcome, NetlinkError> {
        match current.iter_mut().find(|n| n.ip == ip) {
            Some(entry) if entry.mac == mac => {
                debug!("neighbor {ip} is up to date");
                Ok(Outcome::Unchanged)
            }
            Some(entry) => {
                let updated = Neighbor { mac, ..*entry };
                self.neighbors.update(&updated)?;
                debug!("neighbor {ip} updated from {} to {mac}", entry.mac);
                *entry = updated;
                Ok(Outcome::Updated)
            }
            None => {
                let added = Neighbor {
                    ifindex: self.ifindex,
                    ip,
                    mac,
                };
                self.neighbors.add(&added)?;
                debug!("neighbor {ip} added at {mac}");
                current.push(added);
                Ok(Outcome::Added)
            }
        }
    }
}
