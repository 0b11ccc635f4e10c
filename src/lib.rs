// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # gatttool-client
//!
//! A Rust library for discovering Bluetooth Low Energy devices and reading or
//! writing their GATT characteristics through the BlueZ `hcitool` and
//! `gatttool` command line tools.
//!
//! Every connection runs one interactive `gatttool` process. Its output is
//! classified line by line and fed into a state machine running on a
//! background task, while the public API exposes plain request/response
//! operations with timeouts.
//!
//! ## Features
//!
//! - **Discovery**: Bounded `lescan` runs with filtering, de-duplication and
//!   early exit, plus continuous discovery with debouncing
//! - **Sessions**: Connect, enumerate characteristics, read and write values
//! - **Liveness**: Heartbeats detect link loss and report it once
//! - **Typed values**: Fixed-width little-endian integers, booleans and strings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gatttool_client::{AdapterConfig, DataFormat, DiscoveryOptions, Result, Scanner, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AdapterConfig::from_env();
//!
//!     // Find the only device nearby
//!     let scanner = Scanner::new(config.clone());
//!     let address = scanner.find_device(&DiscoveryOptions::default()).await?;
//!
//!     let session = Session::new(address, config);
//!     session.connect(Session::DEFAULT_TIMEOUT).await?;
//!
//!     // Read the heart rate measurement
//!     let value = session
//!         .get("2a37", DataFormat::UInt16, Session::DEFAULT_TIMEOUT)
//!         .await?;
//!     println!("Heart rate: {}", value);
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! Requires Linux with BlueZ and its deprecated `hcitool`/`gatttool`
//! utilities installed. Scanning usually needs root or `CAP_NET_ADMIN`; wrap
//! the tools with [`ToolCommand::with_leading_args`] to run them through
//! `sudo`.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod error;
pub mod process;
pub mod protocol;
pub mod session;
pub mod utils;

// Re-exports for convenience
pub use config::{AdapterConfig, ContinuousOptions, DiscoveryOptions, Timing, ToolCommand};
pub use error::{Error, Result};
pub use session::{CallbackHandle, Session};
pub use utils::{decode_hex, encode_hex};

// Re-export commonly used types from submodules
pub use ble::address::{normalize_address, DeviceAddress};
pub use ble::connection::{ConnectionState, SessionEvent};
pub use ble::scanner::{ContinuousDiscovery, Discovery, Scanner};
pub use ble::uuids::{standardize_uuid, CharacteristicUuid, ToCharacteristicUuid};
pub use protocol::codec::{DataFormat, Value};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<Scanner>();
        let _ = std::any::TypeId::of::<Session>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<DeviceAddress>();
        let _ = std::any::TypeId::of::<CharacteristicUuid>();
        let _ = std::any::TypeId::of::<DataFormat>();
        let _ = std::any::TypeId::of::<Discovery>();
    }

    #[test]
    fn test_normalizers() {
        assert_eq!(
            normalize_address("c4:7c:8d:6a:1f:0e").unwrap(),
            "C4:7C:8D:6A:1F:0E"
        );
        assert_eq!(
            standardize_uuid("2A37").unwrap(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }
}
