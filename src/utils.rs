//! Utility functions for the gatttool-client crate.

use crate::error::{Error, Result};

/// Encode bytes as a lowercase hex string without separators.
///
/// This is the form `char-write-req` expects for its value argument.
///
/// # Example
///
/// ```
/// use gatttool_client::encode_hex;
///
/// assert_eq!(encode_hex(&[0x2c, 0x00, 0xff]), "2c00ff");
/// ```
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decode a hex string, ignoring any whitespace between digits.
///
/// # Errors
///
/// Returns [`Error::InvalidData`] for non-hex characters or an odd number of
/// digits.
///
/// # Example
///
/// ```
/// use gatttool_client::decode_hex;
///
/// assert_eq!(decode_hex("2c 00 ").unwrap(), vec![0x2c, 0x00]);
/// ```
pub fn decode_hex(text: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .map(|b| match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            b'A'..=b'F' => Ok(b - b'A' + 10),
            _ => Err(Error::InvalidData {
                context: format!("non-hex character {:?} in {:?}", b as char, text),
            }),
        })
        .collect::<Result<_>>()?;

    if digits.len() % 2 != 0 {
        return Err(Error::InvalidData {
            context: format!("odd number of hex digits in {:?}", text),
        });
    }

    Ok(digits.chunks(2).map(|pair| pair[0] << 4 | pair[1]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_hex() {
        assert_eq!(encode_hex(&[]), "");
        assert_eq!(encode_hex(&[0x00, 0x0a, 0xff]), "000aff");
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("").unwrap(), Vec::<u8>::new());
        assert_eq!(decode_hex("2c00").unwrap(), vec![0x2c, 0x00]);
        assert_eq!(decode_hex(" 2C 0a\t").unwrap(), vec![0x2c, 0x0a]);
    }

    #[test]
    fn test_decode_hex_rejects_garbage() {
        assert!(decode_hex("2g").is_err());
        assert!(decode_hex("abc").is_err());
    }

    #[test]
    fn test_hex_roundtrip() {
        let original = vec![0xde, 0xad, 0xbe, 0xef, 0x00];
        assert_eq!(decode_hex(&encode_hex(&original)).unwrap(), original);
    }
}
