//! Characteristic UUIDs and their normalization.
//!
//! `gatttool` prints full 128-bit UUIDs while callers usually think in terms
//! of 16-bit assigned numbers. Everything is normalized to the lowercase
//! 128-bit form before it is used as a lookup key.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{Error, Result};

const BLUETOOTH_BASE: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Bluetooth Base UUID that 16-bit assigned numbers are expanded against.
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(BLUETOOTH_BASE);

// Heart Rate Service (Standard BLE)
/// Standard BLE Heart Rate Service UUID.
pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180d_0000_1000_8000_00805f9b34fb);
/// Heart Rate Measurement characteristic UUID.
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_00805f9b34fb);

// Device Information Service (Standard BLE)
/// Standard BLE Device Information Service UUID.
pub const DEVICE_INFO_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180a_0000_1000_8000_00805f9b34fb);
/// Manufacturer Name characteristic UUID.
pub const MANUFACTURER_NAME_UUID: Uuid = Uuid::from_u128(0x0000_2a29_0000_1000_8000_00805f9b34fb);
/// Battery Level characteristic UUID.
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_00805f9b34fb);

/// A GATT characteristic UUID in normalized 128-bit form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicUuid(Uuid);

impl CharacteristicUuid {
    /// Expand a 16-bit assigned number against the Bluetooth base UUID.
    pub const fn from_short(short: u16) -> Self {
        Self(Uuid::from_u128(BLUETOOTH_BASE | ((short as u128) << 96)))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Get the 16-bit short form if this UUID lies on the Bluetooth base.
    pub fn short(&self) -> Option<u16> {
        let value = self.0.as_u128();
        let short = (value >> 96) as u16;
        (Self::from_short(short).0.as_u128() == value).then_some(short)
    }
}

impl From<u16> for CharacteristicUuid {
    fn from(short: u16) -> Self {
        Self::from_short(short)
    }
}

impl From<Uuid> for CharacteristicUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for CharacteristicUuid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let invalid = || Error::InvalidUuid {
            value: s.to_string(),
        };

        if trimmed.len() == 4 {
            if !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            let short = u16::from_str_radix(trimmed, 16).map_err(|_| invalid())?;
            return Ok(Self::from_short(short));
        }

        Uuid::parse_str(trimmed).map(Self).map_err(|_| invalid())
    }
}

impl fmt::Display for CharacteristicUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Conversion into a [`CharacteristicUuid`].
///
/// Lets session operations accept `"2a37"`, `0x2a37`, a full UUID string or a
/// [`Uuid`] interchangeably.
pub trait ToCharacteristicUuid {
    /// Convert, normalizing to the 128-bit form.
    fn to_characteristic_uuid(&self) -> Result<CharacteristicUuid>;
}

impl ToCharacteristicUuid for CharacteristicUuid {
    fn to_characteristic_uuid(&self) -> Result<CharacteristicUuid> {
        Ok(*self)
    }
}

impl ToCharacteristicUuid for Uuid {
    fn to_characteristic_uuid(&self) -> Result<CharacteristicUuid> {
        Ok(CharacteristicUuid(*self))
    }
}

impl ToCharacteristicUuid for u16 {
    fn to_characteristic_uuid(&self) -> Result<CharacteristicUuid> {
        Ok(CharacteristicUuid::from_short(*self))
    }
}

impl ToCharacteristicUuid for str {
    fn to_characteristic_uuid(&self) -> Result<CharacteristicUuid> {
        self.parse()
    }
}

impl ToCharacteristicUuid for String {
    fn to_characteristic_uuid(&self) -> Result<CharacteristicUuid> {
        self.parse()
    }
}

impl<T: ToCharacteristicUuid + ?Sized> ToCharacteristicUuid for &T {
    fn to_characteristic_uuid(&self) -> Result<CharacteristicUuid> {
        (**self).to_characteristic_uuid()
    }
}

/// Normalize a UUID string to the lowercase 128-bit form.
///
/// # Example
///
/// ```
/// use gatttool_client::standardize_uuid;
///
/// assert_eq!(
///     standardize_uuid("2A37").unwrap(),
///     "00002a37-0000-1000-8000-00805f9b34fb"
/// );
/// ```
pub fn standardize_uuid(uuid: &str) -> Result<String> {
    Ok(uuid.parse::<CharacteristicUuid>()?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_constants_on_base() {
        assert_eq!(
            CharacteristicUuid::from(HEART_RATE_MEASUREMENT_UUID).short(),
            Some(0x2a37)
        );
        assert_eq!(
            HEART_RATE_SERVICE_UUID.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_short_and_long_forms_match() {
        let short: CharacteristicUuid = "2a37".parse().unwrap();
        let long: CharacteristicUuid = "00002A37-0000-1000-8000-00805F9B34FB".parse().unwrap();
        assert_eq!(short, long);
        assert_eq!(short, CharacteristicUuid::from(0x2a37u16));
        assert_eq!(short.to_string(), "00002a37-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_custom_uuid_has_no_short_form() {
        let custom: CharacteristicUuid = "6e400002-b5a3-f393-e0a9-e50e24dcca9e".parse().unwrap();
        assert_eq!(custom.short(), None);
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "2a3", "2a3g", "+2a3", "not-a-uuid", "00002a37-0000-1000-8000"] {
            assert!(standardize_uuid(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_to_characteristic_uuid() {
        let expected = CharacteristicUuid::from_short(0x180d);
        assert_eq!("180d".to_characteristic_uuid().unwrap(), expected);
        assert_eq!(0x180du16.to_characteristic_uuid().unwrap(), expected);
        assert_eq!(
            HEART_RATE_SERVICE_UUID.to_characteristic_uuid().unwrap(),
            expected
        );
        assert_eq!(
            String::from("0000180D-0000-1000-8000-00805F9B34FB")
                .to_characteristic_uuid()
                .unwrap(),
            expected
        );
    }

    proptest! {
        #[test]
        fn standardize_is_idempotent(short in any::<u16>(), upper in any::<bool>()) {
            let text = format!("{:04x}", short);
            let text = if upper { text.to_uppercase() } else { text };

            let once = standardize_uuid(&text).unwrap();
            prop_assert_eq!(standardize_uuid(&once).unwrap(), once.clone());
            prop_assert_eq!(
                standardize_uuid(&format!("0000{}-0000-1000-8000-00805f9b34fb", text)).unwrap(),
                once
            );
        }

        #[test]
        fn standardize_never_panics(text in "\\PC*") {
            let _ = standardize_uuid(&text);
        }
    }
}
