pub mod arp;
pub mod config;
pub mod error;
pub mod iface;
pub mod loader;
pub mod mac;
pub mod neighbor;
pub mod netlink;
pub mod reconcile;
pub mod sync;
pub mod table;

pub use arp::{AddressResolver, ArpResolver};
pub use config::{BackendResolution, Config, DecodeOptions, Endpoint, Service, ServiceOptions};
pub use error::{DecodeError, NetlinkError, ResolveError, SyncError, TableError};
pub use mac::MacAddr;
pub use neighbor::{Neighbor, NeighborTable, NetlinkNeighbors};
pub use reconcile::{Outcome, Reconciler, TickSummary};
pub use table::{MemoryTable, UpstreamTable};
