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
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tracing::debug;

use super::{Store as StoreTrait, StoreError};

/// A store backed by a YAML mapping of strings on disk.
pub struct Store {
    path: PathBuf,
    /// Serializes read-modify-write cycles so concurrent sets don't lose each other.
    lock: Mutex<()>,
}

impl Store {
    /// Creates a store persisted at the given path. The file is created on first write.
    pub fn new(path: PathBuf) -> Store {
        Store {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Returns the path of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_yml::from_str(&contents).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        // Write next to the target and rename so readers never see a partial file.
        let tmp_path = self.path.with_extension("yaml.tmp");
        fs::write(&tmp_path, serde_yml::to_string(values)?).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StoreTrait for Store {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock();

        // A corrupt file is replaced rather than blocking every future write.
        let mut values = match self.read_all() {
            Ok(values) => values,
            Err(StoreError::Parse { .. }) => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)?;

        debug!(
            path = self.path.display().to_string(),
            key, value, "Persisted value."
        );
        Ok(())
    }
}

/// Returns the default state file location: gwr-radio/state.yaml under the platform state
/// directory, or the local data directory on platforms without one. Falls back to the working
/// directory when neither is known.
pub fn default_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gwr-radio")
        .join("state.yaml")
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs, path::PathBuf};

    use serial_test::serial;

    use crate::store::{Store as _, StoreError};

    use super::{default_path, Store};

    #[test]
    fn test_missing_file_is_empty() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = Store::new(dir.path().join("state.yaml"));
        assert_eq!(None, store.get("radio_volume")?);
        Ok(())
    }

    #[test]
    fn test_round_trip_creates_directories() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("state.yaml");
        let store = Store::new(path.clone());

        store.set("radio_volume", "0.7")?;
        store.set("other", "value")?;
        store.set("radio_volume", "0.3")?;

        assert!(path.exists());
        assert!(!path.with_extension("yaml.tmp").exists());

        // A fresh store over the same file sees what was written, like a restart would.
        let reopened = Store::new(path);
        assert_eq!(Some("0.3".to_string()), reopened.get("radio_volume")?);
        assert_eq!(Some("value".to_string()), reopened.get("other")?);
        Ok(())
    }

    #[test]
    fn test_corrupt_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("state.yaml");
        fs::write(&path, "- not\n- a\n- mapping\n")?;
        let store = Store::new(path);

        assert!(matches!(
            store.get("radio_volume"),
            Err(StoreError::Parse { .. })
        ));

        // Writing replaces the corrupt contents.
        store.set("radio_volume", "0.4")?;
        assert_eq!(Some("0.4".to_string()), store.get("radio_volume")?);
        Ok(())
    }

    #[test]
    fn test_empty_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("state.yaml");
        fs::write(&path, "\n")?;
        assert_eq!(None, Store::new(path).get("radio_volume")?);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_default_path() {
        let path = default_path();
        assert!(path.ends_with("gwr-radio/state.yaml"));
        if let Some(base) = dirs::state_dir().or_else(dirs::data_local_dir) {
            assert!(path.is_absolute());
            assert_eq!(base.join("gwr-radio").join("state.yaml"), path);
        }
    }

    #[test]
    #[serial]
    #[cfg(target_os = "linux")]
    fn test_default_path_follows_xdg_state_home() {
        let old_state = std::env::var_os("XDG_STATE_HOME");

        std::env::set_var("XDG_STATE_HOME", "/tmp/state");
        assert_eq!(
            PathBuf::from("/tmp/state/gwr-radio/state.yaml"),
            default_path()
        );

        match old_state {
            Some(value) => std::env::set_var("XDG_STATE_HOME", value),
            None => std::env::remove_var("XDG_STATE_HOME"),
        }
    }
}
