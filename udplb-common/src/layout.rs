//! ```text
//! key   (7 bytes): | address (4) | port (2) | slave (1) |
//! value (9 bytes): | address (4) | port (2) | count (1) | tc_action (1) | strategy (1) |
//! ```
//!
//! `slave == 0` is the master record of a service. Backends follow at
//! `1..=count`, all fields in network byte order.

use core::fmt;
use core::net::Ipv4Addr;

use crate::order::{hton_ip, htons, ntoh_ip, ntohs};

/// Bumped whenever the byte layout changes.
pub const LAYOUT_VERSION: u32 = 1;

pub const KEY_LEN: usize = 7;
pub const VALUE_LEN: usize = 9;

const ADDR: core::ops::Range<usize> = 0..4;
const PORT: core::ops::Range<usize> = 4..6;
const SLAVE: usize = 6;
const COUNT: usize = 6;
const TC_ACTION: usize = 7;
const STRATEGY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("key is {0} bytes, expected {expected}", expected = KEY_LEN)]
    KeyLength(usize),
    #[error("value is {0} bytes, expected {expected}", expected = VALUE_LEN)]
    ValueLength(usize),
    #[error("unknown tc action code {0}")]
    UnknownTcAction(u8),
    #[error("unknown strategy code {0}")]
    UnknownStrategy(u8),
    #[error("master record carries a backend address")]
    MasterCarriesEndpoint,
    #[error("backend record carries master fields")]
    BackendCarriesPolicy,
}

/// Key of the `upstreams` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LbKey {
    pub address: Ipv4Addr,
    pub port: u16,
    pub slave: u8,
}

impl LbKey {
    pub const fn master(address: Ipv4Addr, port: u16) -> Self {
        Self {
            address,
            port,
            slave: 0,
        }
    }

    pub const fn backend(address: Ipv4Addr, port: u16, slave: u8) -> Self {
        Self {
            address,
            port,
            slave,
        }
    }

    pub const fn is_master(&self) -> bool {
        self.slave == 0
    }

    pub fn encode(&self) -> [u8; KEY_LEN] {
        let mut buf = [0u8; KEY_LEN];
        buf[ADDR].copy_from_slice(&hton_ip(self.address));
        buf[PORT].copy_from_slice(&htons(self.port));
        buf[SLAVE] = self.slave;
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        if buf.len() != KEY_LEN {
            return Err(LayoutError::KeyLength(buf.len()));
        }
        Ok(Self {
            address: ntoh_ip(&buf[ADDR]),
            port: ntohs(&buf[PORT]),
            slave: buf[SLAVE],
        })
    }
}

impl fmt::Display for LbKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.address, self.port, self.slave)
    }
}

/// What the TC program returns for traffic of a service.
///
/// Values are the kernel's `TC_ACT_*` codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TcAction {
    /// `TC_ACT_OK`: the original packet continues through the stack.
    #[default]
    Pass = 0,
    /// `TC_ACT_SHOT`: the original packet is dropped after redirection.
    Drop = 2,
}

impl TcAction {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Pass),
            2 => Some(Self::Drop),
            _ => None,
        }
    }
}

impl fmt::Display for TcAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::Drop => "block",
        })
    }
}

/// Backend selection algorithm of a service.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Strategy {
    #[default]
    SrcPort = 0,
    SrcIp = 1,
}

impl Strategy {
    /// Reserved for payload based selection. No program implements it, so it
    /// never decodes.
    pub const PAYLOAD_CODE: u8 = 2;

    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::SrcPort),
            1 => Some(Self::SrcIp),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SrcPort => "src-port",
            Self::SrcIp => "src-ip",
        })
    }
}

/// Value of the `upstreams` map.
///
/// Which variant a value holds follows from its key: slave 0 is always a
/// `Master`, everything else a `Backend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LbUpstream {
    Master {
        count: u8,
        tc_action: TcAction,
        strategy: Strategy,
    },
    Backend {
        address: Ipv4Addr,
        port: u16,
    },
}

impl LbUpstream {
    pub fn encode(&self) -> [u8; VALUE_LEN] {
        let mut buf = [0u8; VALUE_LEN];
        match *self {
            Self::Master {
                count,
                tc_action,
                strategy,
            } => {
                buf[COUNT] = count;
                buf[TC_ACTION] = tc_action.code();
                buf[STRATEGY] = strategy.code();
            }
            Self::Backend { address, port } => {
                buf[ADDR].copy_from_slice(&hton_ip(address));
                buf[PORT].copy_from_slice(&htons(port));
            }
        }
        buf
    }

    /// Decodes the value stored under `key`.
    pub fn decode(key: &LbKey, buf: &[u8]) -> Result<Self, LayoutError> {
        if buf.len() != VALUE_LEN {
            return Err(LayoutError::ValueLength(buf.len()));
        }
        if key.is_master() {
            if buf[ADDR.start..PORT.end].iter().any(|b| *b != 0) {
                return Err(LayoutError::MasterCarriesEndpoint);
            }
            let tc_action = TcAction::from_code(buf[TC_ACTION])
                .ok_or(LayoutError::UnknownTcAction(buf[TC_ACTION]))?;
            let strategy = Strategy::from_code(buf[STRATEGY])
                .ok_or(LayoutError::UnknownStrategy(buf[STRATEGY]))?;
            Ok(Self::Master {
                count: buf[COUNT],
                tc_action,
                strategy,
            })
        } else {
            if buf[COUNT..].iter().any(|b| *b != 0) {
                return Err(LayoutError::BackendCarriesPolicy);
            }
            Ok(Self::Backend {
                address: ntoh_ip(&buf[ADDR]),
                port: ntohs(&buf[PORT]),
            })
        }
    }
}

impl fmt::Display for LbUpstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master {
                count,
                tc_action,
                strategy,
            } => write!(f, "count={count} tc_action={tc_action} strategy={strategy}"),
            Self::Backend { address, port } => write!(f, "{address}:{port}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    const VIP: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

    #[test]
    fn key_bytes() {
        assert_eq!(
            LbKey::master(VIP, 8125).encode(),
            [0x7f, 0x00, 0x00, 0x01, 0x1f, 0xbd, 0x00]
        );
        assert_eq!(
            LbKey::backend(VIP, 8125, 2).encode(),
            [0x7f, 0x00, 0x00, 0x01, 0x1f, 0xbd, 0x02]
        );
    }

    #[test]
    fn key_decodes_from_literal_bytes() {
        let key = LbKey::decode(&[172, 17, 0, 2, 0x00, 0x35, 7]).unwrap();
        assert_eq!(key, LbKey::backend(Ipv4Addr::new(172, 17, 0, 2), 53, 7));
        assert!(!key.is_master());
    }

    #[test]
    fn key_rejects_wrong_width() {
        assert_eq!(LbKey::decode(&[0; 6]), Err(LayoutError::KeyLength(6)));
        assert_eq!(LbKey::decode(&[0; 8]), Err(LayoutError::KeyLength(8)));
    }

    #[test]
    fn master_value_bytes() {
        let master = LbUpstream::Master {
            count: 2,
            tc_action: TcAction::Drop,
            strategy: Strategy::SrcIp,
        };
        assert_eq!(master.encode(), [0, 0, 0, 0, 0, 0, 2, 2, 1]);
        assert_eq!(
            LbUpstream::decode(&LbKey::master(VIP, 8125), &master.encode()),
            Ok(master)
        );
    }

    #[test]
    fn backend_value_bytes() {
        let backend = LbUpstream::Backend {
            address: Ipv4Addr::new(172, 17, 0, 3),
            port: 8125,
        };
        assert_eq!(backend.encode(), [172, 17, 0, 3, 0x1f, 0xbd, 0, 0, 0]);
        assert_eq!(
            LbUpstream::decode(&LbKey::backend(VIP, 8125, 1), &backend.encode()),
            Ok(backend)
        );
    }

    #[test]
    fn value_variant_follows_the_key() {
        let bytes = [0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            LbUpstream::decode(&LbKey::master(VIP, 1), &bytes),
            Ok(LbUpstream::Master { count: 0, .. })
        ));
        assert_eq!(
            LbUpstream::decode(&LbKey::backend(VIP, 1, 1), &bytes),
            Ok(LbUpstream::Backend {
                address: Ipv4Addr::UNSPECIFIED,
                port: 0
            })
        );
    }

    #[test]
    fn value_rejects_inconsistent_rows() {
        let master = LbKey::master(VIP, 8125);
        let backend = LbKey::backend(VIP, 8125, 1);

        assert_eq!(
            LbUpstream::decode(&master, &[0; 8]),
            Err(LayoutError::ValueLength(8))
        );
        assert_eq!(
            LbUpstream::decode(&master, &[10, 0, 0, 1, 0, 0, 1, 0, 0]),
            Err(LayoutError::MasterCarriesEndpoint)
        );
        assert_eq!(
            LbUpstream::decode(&master, &[0, 0, 0, 0, 0, 0, 1, 1, 0]),
            Err(LayoutError::UnknownTcAction(1))
        );
        assert_eq!(
            LbUpstream::decode(&master, &[0, 0, 0, 0, 0, 0, 1, 0, Strategy::PAYLOAD_CODE]),
            Err(LayoutError::UnknownStrategy(2))
        );
        assert_eq!(
            LbUpstream::decode(&backend, &[10, 0, 0, 1, 0, 80, 3, 0, 0]),
            Err(LayoutError::BackendCarriesPolicy)
        );
    }

    #[test]
    fn display() {
        assert_eq!(LbKey::backend(VIP, 8125, 1).to_string(), "127.0.0.1:8125/1");
        let master = LbUpstream::Master {
            count: 3,
            tc_action: TcAction::Pass,
            strategy: Strategy::SrcPort,
        };
        assert_eq!(
            master.to_string(),
            "count=3 tc_action=pass strategy=src-port"
        );
    }
}
