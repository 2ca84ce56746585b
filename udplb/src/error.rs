use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;
use udplb_common::{LayoutError, LbKey, LbUpstream};

use crate::config::Endpoint;

/// The configuration could not be turned into a `Config`.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] io::Error),

    #[error("malformed configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("cannot resolve {address:?} to an IPv4 address")]
    Unresolvable { address: String },

    #[error("{address} is not a unicast host address")]
    NotHostAddress { address: Ipv4Addr },

    #[error("service {service}: unknown tc_action {value:?}, expected \"pass\" or \"block\"")]
    TcAction { service: String, value: String },

    #[error("service {service}: unknown strategy {value:?}, expected \"src-port\" or \"src-ip\"")]
    Strategy { service: String, value: String },

    #[error("service {service}: strategy \"payload\" is not implemented")]
    UnsupportedStrategy { service: String },

    #[error("service {service}: {count} backends declared, at most {max} are supported", max = u8::MAX)]
    TooManyBackends { service: String, count: usize },

    #[error("service {service} is declared more than once")]
    DuplicateService { service: Endpoint },
}

/// Failure of the upstream map itself.
#[derive(Debug, Error)]
pub enum TableError {
    #[error(transparent)]
    Map(#[from] aya::maps::MapError),

    #[error("table is full ({capacity} entries)")]
    Full { capacity: usize },
}

/// The synchronization pass failed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Records written before the failure stay in the table.
    #[error("failed to write {key} after {written} record(s)")]
    TableWrite {
        key: LbKey,
        written: usize,
        #[source]
        source: TableError,
    },

    #[error("failed to enumerate the upstream table")]
    TableRead(#[source] TableError),

    #[error("table row {row:02x?} violates the fixed-width layout")]
    EncodingInvariant {
        row: Vec<u8>,
        #[source]
        source: LayoutError,
    },

    #[error("{key} is missing from the table")]
    Missing { key: LbKey },

    #[error("{key} reads back as `{found}`, wrote `{expected}`")]
    Mismatch {
        key: LbKey,
        expected: LbUpstream,
        found: LbUpstream,
    },
}

/// An ARP probe did not produce a hardware address.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no ARP reply from {target} within {timeout:?}")]
    Timeout { target: Ipv4Addr, timeout: Duration },

    #[error("ARP socket error: {0}")]
    Io(#[from] io::Error),
}

/// An rtnetlink request failed.
#[derive(Debug, Error)]
pub enum NetlinkError {
    #[error("netlink socket error: {0}")]
    Socket(#[from] io::Error),

    #[error("malformed netlink message: {0}")]
    Decode(String),

    #[error("kernel rejected the request: {0}")]
    Kernel(io::Error),
}
