//! Bluetooth hardware addresses.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A 6-byte Bluetooth device address.
///
/// The canonical text form is `XX:XX:XX:XX:XX:XX` in uppercase hex. Parsing
/// accepts either case, so two spellings of the same address compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    /// Create an address from its bytes, most significant first.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Get the address bytes, most significant first.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidAddress {
            value: s.to_string(),
        };

        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split(':');

        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self(bytes))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

/// Normalize an address to its canonical uppercase text form.
///
/// # Example
///
/// ```
/// use gatttool_client::normalize_address;
///
/// assert_eq!(normalize_address("aa:bb:cc:dd:ee:0f").unwrap(), "AA:BB:CC:DD:EE:0F");
/// ```
pub fn normalize_address(address: &str) -> Result<String> {
    Ok(address.parse::<DeviceAddress>()?.to_string())
}
