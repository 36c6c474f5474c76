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
use std::{io, path::PathBuf};

pub mod file;
pub mod memory;

/// Errors from reading or writing persisted values.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to parse state file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },

    #[error("Unable to serialize state: {0}")]
    Serialize(#[from] serde_yml::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Simple string keyed persistent storage. There are no transactions and no schema.
pub trait Store: Send + Sync + 'static {
    /// Returns the value stored under the key, if any.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores the value under the key, replacing anything already there.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}
