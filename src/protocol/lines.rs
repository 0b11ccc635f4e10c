//! Classification of `gatttool` interactive output.
//!
//! Each line the control process prints is matched against an ordered table
//! of classifiers; the first one that recognizes the line decides its
//! [`LineEvent`]. Lines nobody recognizes are dropped by the caller.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use crate::ble::address::DeviceAddress;
use crate::ble::uuids::CharacteristicUuid;
use crate::utils::decode_hex;

/// Marker written as the heartbeat command and echoed back by the prompt.
pub const HEARTBEAT_MARKER: &str = "**";

/// Keywords of status lines and command echoes that carry no information.
const IN_PROGRESS_KEYWORDS: &[&str] = &[
    "Attempting to connect",
    "char-read-uuid",
    "char-write-req",
    "quit",
    "connect",
    "characteristics",
];

static PROMPT_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(?P<address>(?:[0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2})\]").unwrap()
});

static CHARACTERISTIC_DESCRIPTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^.*?handle: 0x[0-9a-f]+, char properties: 0x[0-9a-f]+, char value handle: (?P<handle>0x[0-9a-f]+), uuid: (?P<uuid>[0-9a-f-]+)\s*$",
    )
    .unwrap()
});

static CHARACTERISTIC_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i).*?handle: 0x[0-9a-f]+\s+value: (?P<value>(?:[0-9a-f]{2}\s?)+)\s*$").unwrap()
});

/// A classified line of control-process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Echo of a heartbeat while the link is up.
    Heartbeat,
    /// Echo of a heartbeat printed with the plain prompt, meaning the link to
    /// `address` went down.
    DisconnectNotice {
        /// The address shown in the prompt.
        address: DeviceAddress,
    },
    /// The control process reported an error.
    Error {
        /// The raw line, trimmed.
        message: String,
    },
    /// The connection was established.
    ConnectAck,
    /// Benign status text or a command echo.
    InProgress,
    /// One line of the `characteristics` listing.
    CharacteristicDescriptor {
        /// The value handle token, e.g. `0x000f`.
        handle: String,
        /// The characteristic UUID.
        uuid: CharacteristicUuid,
    },
    /// A `char-read-uuid` response.
    CharacteristicValue {
        /// The raw value bytes.
        value: Vec<u8>,
    },
    /// A `char-write-req` was acknowledged.
    WriteAck,
}

type Classifier = fn(&str) -> Option<LineEvent>;

/// Classifiers in priority order. The first match wins.
const CLASSIFIERS: &[(&str, Classifier)] = &[
    ("heartbeat", classify_heartbeat),
    ("error", classify_error),
    ("connect-ack", classify_connect_ack),
    ("in-progress", classify_in_progress),
    ("descriptor", classify_descriptor),
    ("value", classify_value),
    ("write-ack", classify_write_ack),
];

impl LineEvent {
    /// Classify one line of output.
    ///
    /// Returns `None` for lines that match no known pattern.
    pub fn parse(line: &str) -> Option<Self> {
        CLASSIFIERS.iter().find_map(|(name, classify)| {
            let event = classify(line)?;
            trace!("Line classified as {}: {:?}", name, line);
            Some(event)
        })
    }
}

fn classify_heartbeat(line: &str) -> Option<LineEvent> {
    if !line.contains(HEARTBEAT_MARKER) {
        return None;
    }

    let address = PROMPT_ADDRESS
        .captures(line)
        .and_then(|caps| caps.name("address")?.as_str().parse().ok());

    Some(match address {
        Some(address) => LineEvent::DisconnectNotice { address },
        None => LineEvent::Heartbeat,
    })
}

fn classify_error(line: &str) -> Option<LineEvent> {
    line.contains("Error").then(|| LineEvent::Error {
        message: line.trim().to_string(),
    })
}

fn classify_connect_ack(line: &str) -> Option<LineEvent> {
    line.to_lowercase()
        .contains("connection successful")
        .then_some(LineEvent::ConnectAck)
}

fn classify_in_progress(line: &str) -> Option<LineEvent> {
    IN_PROGRESS_KEYWORDS
        .iter()
        .any(|keyword| line.contains(keyword))
        .then_some(LineEvent::InProgress)
}

fn classify_descriptor(line: &str) -> Option<LineEvent> {
    let caps = CHARACTERISTIC_DESCRIPTOR.captures(line)?;
    let handle = caps.name("handle")?.as_str().to_lowercase();
    let uuid = caps.name("uuid")?.as_str().parse().ok()?;
    Some(LineEvent::CharacteristicDescriptor { handle, uuid })
}

fn classify_value(line: &str) -> Option<LineEvent> {
    let caps = CHARACTERISTIC_VALUE.captures(line)?;
    let value = decode_hex(caps.name("value")?.as_str()).ok()?;
    Some(LineEvent::CharacteristicValue { value })
}

fn classify_write_ack(line: &str) -> Option<LineEvent> {
    line.contains("written successfully")
        .then_some(LineEvent::WriteAck)
}
