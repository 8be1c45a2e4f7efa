//! Burrow core library.
//!
//! Turns a single host into a multi-tenant LAN database server: a registry of
//! independently-named SQLite databases, a per-database serialized query
//! engine, a rotating pairing-code authority, mDNS advertisement and a live
//! status snapshot. The HTTP surface lives in the `burrow-server` crate.

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod pairing;
pub mod registry;
pub mod status;

pub use config::{default_data_dir, EngineConfig, ServerConfig};
pub use discovery::DiscoveryBroadcaster;
pub use engine::{ExecutionEngine, QueryResult, SqlValue};
pub use error::{BurrowError, Result};
pub use pairing::{PairingAuthority, Session};
pub use registry::{DatabaseHandle, DatabaseRecord, DatabaseStatus, Registry};
pub use status::{StatusAggregator, StatusSnapshot};
