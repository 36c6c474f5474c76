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
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_DEVICE: &str = "default";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 15;

/// A YAML representation of the audio configuration.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Audio {
    /// The audio device. "default" picks the host's default output and names starting
    /// with "mock" pick the mock engine.
    #[serde(default = "default_device")]
    device: String,

    /// Seconds to wait for the stream server to accept the connection.
    connect_timeout_secs: Option<u64>,

    /// Seconds a single read from the stream may stall before playback fails.
    read_timeout_secs: Option<u64>,
}

fn default_device() -> String {
    DEFAULT_DEVICE.to_string()
}

impl Default for Audio {
    fn default() -> Self {
        Audio::new(DEFAULT_DEVICE)
    }
}

impl Audio {
    /// New will create a new Audio configuration.
    pub fn new(device: &str) -> Audio {
        Audio {
            device: device.to_string(),
            connect_timeout_secs: None,
            read_timeout_secs: None,
        }
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Returns the connect timeout (default: 10 seconds).
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }

    /// Returns the read timeout (default: 15 seconds).
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.unwrap_or(DEFAULT_READ_TIMEOUT_SECS))
    }
}
