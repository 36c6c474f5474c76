// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;

use super::{Store as StoreTrait, StoreError};

/// A store that only lives as long as the process. Useful for tests and for running without
/// a writable state directory.
#[derive(Default)]
pub struct Store {
    values: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: Mutex<Vec<(String, String)>>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Store {
        Store::default()
    }

    /// Creates a store pre-populated with the given entry.
    #[cfg(test)]
    pub fn with(key: &str, value: &str) -> Store {
        let store = Store::default();
        store
            .values
            .lock()
            .insert(key.to_string(), value.to_string());
        store
    }

    /// Makes subsequent reads fail.
    #[cfg(test)]
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Makes subsequent writes fail.
    #[cfg(test)]
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Every successful write, in the order it was applied.
    #[cfg(test)]
    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().clone()
    }

    /// The current value under the key, bypassing failure injection.
    #[cfg(test)]
    pub fn peek(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }
}

impl StoreTrait for Store {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("reads disabled".to_string()));
        }
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        self.values
            .lock()
            .insert(key.to_string(), value.to_string());
        self.writes
            .lock()
            .push((key.to_string(), value.to_string()));
        Ok(())
    }
}
