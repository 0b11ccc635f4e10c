//! Protocol module for parsing tool output and encoding values.
//!
//! This module contains the implementations for:
//! - Classification of interactive `gatttool` output lines
//! - Fixed-width characteristic value encoding and decoding

pub mod codec;
pub mod lines;

pub use codec::{DataFormat, Value};
pub use lines::{LineEvent, HEARTBEAT_MARKER};
