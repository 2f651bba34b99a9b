// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared telemetry cache.
//!
//! The cache maps a device serial number to its latest [`TelemetryRecord`].
//! The message poller is the only writer; the controller reads snapshots.
//!
//! Each record is stored behind an `Arc` and replaced as a whole: a merge
//! builds the next record from the current one and swaps it in while holding
//! the write lock. Readers clone the `Arc`, so they observe either the record
//! before or after a message, never a mix of both. No await point exists
//! while the lock is held, which is what makes task cancellation safe.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Attributes, TelemetryRecord};

/// Thread-safe map from device serial to latest telemetry record.
///
/// Cloning the cache is cheap and yields a handle to the same storage.
#[derive(Debug, Clone, Default)]
pub struct TelemetryCache {
    records: Arc<RwLock<HashMap<String, Arc<TelemetryRecord>>>>,
}

impl TelemetryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a decoded attribute update into the record of `serial`.
    ///
    /// Creates the record if this is the first message for the device.
    /// Returns the record now stored.
    pub fn merge(
        &self,
        serial: &str,
        topic: &str,
        attributes: Attributes,
    ) -> Arc<TelemetryRecord> {
        let mut records = self.records.write();

        let next = match records.get(serial) {
            Some(current) => current.merged(topic, attributes),
            None => TelemetryRecord::new(topic, attributes),
        };
        let next = Arc::new(next);
        records.insert(serial.to_string(), Arc::clone(&next));
        next
    }

    /// Returns a snapshot of the record for `serial`, if any.
    #[must_use]
    pub fn get(&self, serial: &str) -> Option<Arc<TelemetryRecord>> {
        self.records.read().get(serial).cloned()
    }

    /// Returns `true` if a record exists for `serial`.
    #[must_use]
    pub fn contains(&self, serial: &str) -> bool {
        self.records.read().contains_key(serial)
    }

    /// Returns the serial numbers with a record.
    #[must_use]
    pub fn serials(&self) -> Vec<String> {
        let mut serials: Vec<String> = self.records.read().keys().cloned().collect();
        serials.sort();
        serials
    }

    /// Returns the number of devices with a record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if no device has reported yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
