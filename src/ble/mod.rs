//! BLE communication module.
//!
//! This module provides device discovery and the connection state machine
//! that drives `gatttool`, along with the address and UUID types they use.

pub mod address;
pub mod characteristics;
pub mod connection;
pub mod scanner;
pub mod uuids;

pub use address::{normalize_address, DeviceAddress};
pub use characteristics::HandleMap;
pub use connection::{ConnectionState, SessionEvent};
pub use scanner::{ContinuousDiscovery, Discovery, Scanner};
pub use uuids::*;
