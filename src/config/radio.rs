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
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::Audio;
use crate::{audio::Session, store};

pub const DEFAULT_STREAM_URL: &str = "http://gwr.no-ip.biz:8000/listen.plr";
pub const DEFAULT_VOLUME_KEY: &str = "radio_volume";
const DEFAULT_TITLE: &str = "📻 GWR Radio";
const DEFAULT_NOW_PLAYING: &str = "🎶 Now Playing: GWR Live Stream";

/// The configuration for the radio player. Every field is optional.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Radio {
    /// The stream to play.
    pub stream_url: String,
    /// The title shown at the top of the screen.
    pub title: String,
    /// The label describing what is playing.
    pub now_playing: String,
    /// The key the volume is persisted under.
    pub volume_key: String,
    /// Where persisted state lives. Defaults to the user's state directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
    /// The audio output configuration.
    pub audio: Audio,
    /// The audio session applied before each load.
    pub session: Session,
}

impl Default for Radio {
    fn default() -> Self {
        Radio {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            title: DEFAULT_TITLE.to_string(),
            now_playing: DEFAULT_NOW_PLAYING.to_string(),
            volume_key: DEFAULT_VOLUME_KEY.to_string(),
            state_file: None,
            audio: Audio::default(),
            session: Session::default(),
        }
    }
}

impl Radio {
    /// Returns the state file, falling back to the user's state directory.
    pub fn state_file(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(store::file::default_path)
    }
}
