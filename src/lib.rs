//! Library crate for craft-scan-rs: discovery of game servers speaking the
//! VarInt/JSON server-list protocol across IPv4 ranges.
pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod packets;
pub mod ports;
pub mod probe;
pub mod ranges;
pub mod reader;
pub mod scanner;
pub mod server;
pub mod store;
pub mod types;
pub mod varint;

pub use config::{ProbeConfig, ScanConfig};
pub use error::{ConfigError, EncodingError, ProtocolError, ScanError};
pub use events::{CallbackRegistry, EventKind, ScanEvent};
pub use geo::{IpApiLocator, Locator, LocationDefaults, NoopLocator};
pub use probe::{assess_access, parse_status, AccessVerdict, Prober};
pub use scanner::{RangeOutcome, Reservation, Scanner, StopHandle};
pub use store::ResultStore;
pub use types::{Endpoint, Location, ScanProgress, ScanSummary, ServerRecord};
