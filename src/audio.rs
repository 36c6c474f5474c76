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
use std::{error::Error, fmt, sync::Arc};

use crate::{config, volume::Volume};

pub mod cpal;
pub mod decoder;
pub mod error;
pub mod mock;
pub mod session;

pub use error::AudioError;
pub use session::Session;

/// Playback status reported by a loaded sound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SoundStatus {
    /// Waiting on the network for more data.
    Buffering,
    /// Audio is flowing to the output.
    Playing,
    /// The sound was stopped.
    Stopped,
    /// The remote end closed the stream.
    Finished,
    /// The stream broke while playing.
    Failed,
}

/// Receives status updates from a sound. Called from audio worker threads, so it must be cheap.
pub type StatusCallback = Box<dyn Fn(SoundStatus) + Send + Sync>;

/// A loaded stream. Owned by whoever loaded it and released with stop followed by unload.
pub trait Sound: Send + Sync {
    /// Changes the volume without interrupting playback.
    fn set_volume(&self, volume: Volume) -> Result<(), AudioError>;

    /// Stops playback. The sound still holds its resources until it is unloaded.
    fn stop(&self) -> Result<(), AudioError>;

    /// Releases every resource held by the sound. Calling it again does nothing.
    fn unload(&self) -> Result<(), AudioError>;

    /// Registers a listener for status updates, replacing any previous one.
    fn on_status(&self, callback: StatusCallback);
}

/// Something that can turn a stream URI into audible sound.
pub trait Engine: fmt::Display + Send + Sync {
    /// Applies the audio session configuration used by subsequent loads.
    fn configure(&self, session: &Session) -> Result<(), AudioError>;

    /// Connects to the given URI and starts playing it at the given volume.
    fn load(&self, uri: &str, volume: Volume) -> Result<Arc<dyn Sound>, AudioError>;
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<String>, Box<dyn Error>> {
    cpal::Engine::list()
}

/// Gets the engine for the configured device.
pub fn get_engine(config: &config::Audio) -> Result<Arc<dyn Engine>, Box<dyn Error>> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Engine::get(device)));
    };

    Ok(Arc::new(cpal::Engine::get(config)?))
}
