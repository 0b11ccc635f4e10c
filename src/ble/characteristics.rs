//! Characteristic handle bookkeeping.
//!
//! `gatttool` addresses writes by handle, and handles are only valid for the
//! connection that reported them. The map is filled while the
//! `characteristics` listing comes in and frozen once the session is
//! connected.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::ble::uuids::CharacteristicUuid;

/// Mapping from characteristic UUID to the value handle token of the current
/// connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleMap {
    handles: HashMap<CharacteristicUuid, String>,
    frozen: bool,
}

impl HandleMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the handle of a characteristic.
    ///
    /// Returns `false` and leaves the map unchanged once it is frozen.
    pub fn insert(&mut self, uuid: CharacteristicUuid, handle: String) -> bool {
        if self.frozen {
            debug!("Ignoring characteristic {} after enumeration completed", uuid);
            return false;
        }

        trace!("Characteristic {} has value handle {}", uuid, handle);
        self.handles.insert(uuid, handle);
        true
    }

    /// Stop accepting new entries.
    pub fn freeze(&mut self) {
        self.frozen = true;
        debug!("Enumerated {} characteristics", self.handles.len());
    }

    /// Whether enumeration has completed.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Get the handle of a characteristic.
    pub fn get(&self, uuid: &CharacteristicUuid) -> Option<&str> {
        self.handles.get(uuid).map(String::as_str)
    }

    /// Check if a characteristic is known.
    pub fn contains(&self, uuid: &CharacteristicUuid) -> bool {
        self.handles.contains_key(uuid)
    }

    /// Number of known characteristics.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no characteristic is known.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Known characteristic UUIDs, sorted.
    pub fn uuids(&self) -> Vec<CharacteristicUuid> {
        let mut uuids: Vec<_> = self.handles.keys().copied().collect();
        uuids.sort();
        uuids
    }

    /// Forget all handles and accept new ones again.
    pub fn clear(&mut self) {
        self.handles.clear();
        self.frozen = false;
    }
}
