use std::net::Ipv4Addr;

use netlink_packet_core::{
    NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REPLACE, NLM_F_REQUEST,
};
use netlink_packet_route::neighbour::{
    NeighbourAddress, NeighbourAttribute, NeighbourMessage, NeighbourState,
};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};

use crate::error::NetlinkError;
use crate::mac::MacAddr;
use crate::netlink::RouteSocket;

/// One IPv4 neighbor entry on an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub ifindex: u32,
    pub ip: Ipv4Addr,
    /// `MacAddr::ZERO` for entries without a link-layer address yet.
    pub mac: MacAddr,
}

/// The operations the reconciliation loop needs. Entries are never deleted.
pub trait NeighborTable {
    /// IPv4 entries of the interface `ifindex`.
    fn list(&mut self, ifindex: u32) -> Result<Vec<Neighbor>, NetlinkError>;

    /// Creates an entry. Fails if one already exists.
    fn add(&mut self, neighbor: &Neighbor) -> Result<(), NetlinkError>;

    /// Replaces the link-layer address of an existing entry.
    fn update(&mut self, neighbor: &Neighbor) -> Result<(), NetlinkError>;
}

/// `NeighborTable` over an `NETLINK_ROUTE` socket.
///
/// Every call blocks on the kernel. On a multi-thread runtime the worker is
/// handed back to the scheduler for the duration.
pub struct NetlinkNeighbors {
    socket: RouteSocket,
}

impl NetlinkNeighbors {
    pub fn new() -> Result<Self, NetlinkError> {
        Ok(Self {
            socket: RouteSocket::new()?,
        })
    }
}

impl NeighborTable for NetlinkNeighbors {
    fn list(&mut self, ifindex: u32) -> Result<Vec<Neighbor>, NetlinkError> {
        let mut query = NeighbourMessage::default();
        query.header.family = AddressFamily::Inet;
        let replies = self.socket.request(
            NLM_F_REQUEST | NLM_F_DUMP,
            RouteNetlinkMessage::GetNeighbour(query),
        )?;

        Ok(replies
            .iter()
            .filter_map(|reply| match reply {
                RouteNetlinkMessage::NewNeighbour(msg) => parse_neighbour(msg),
                _ => None,
            })
            .filter(|neighbor| neighbor.ifindex == ifindex)
            .collect())
    }

    fn add(&mut self, neighbor: &Neighbor) -> Result<(), NetlinkError> {
        self.socket.request(
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
            RouteNetlinkMessage::NewNeighbour(neighbour_message(neighbor)),
        )?;
        Ok(())
    }

    fn update(&mut self, neighbor: &Neighbor) -> Result<(), NetlinkError> {
        self.socket.request(
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE,
            RouteNetlinkMessage::NewNeighbour(neighbour_message(neighbor)),
        )?;
        Ok(())
    }
}

fn neighbour_message(neighbor: &Neighbor) -> NeighbourMessage {
    let mut msg = NeighbourMessage::default();
    msg.header.family = AddressFamily::Inet;
    msg.header.ifindex = neighbor.ifindex;
    msg.header.state = NeighbourState::Reachable;
    msg.attributes.push(NeighbourAttribute::Destination(
        NeighbourAddress::Inet(neighbor.ip),
    ));
    msg.attributes.push(NeighbourAttribute::LinkLocalAddress(
        neighbor.mac.as_bytes().to_vec(),
    ));
    msg
}

fn parse_neighbour(msg: &NeighbourMessage) -> Option<Neighbor> {
    if msg.header.family != AddressFamily::Inet {
        return None;
    }

    let mut ip = None;
    let mut mac = MacAddr::ZERO;
    for attr in &msg.attributes {
        match attr {
            NeighbourAttribute::Destination(NeighbourAddress::Inet(addr)) => ip = Some(*addr),
            NeighbourAttribute::LinkLocalAddress(bytes) => {
                mac = MacAddr::try_from(bytes.as_slice()).unwrap_or(MacAddr::ZERO);
            }
            _ => {}
        }
    }

    Some(Neighbor {
        ifindex: msg.header.ifindex,
        ip: ip?,
        mac,
    })
}
