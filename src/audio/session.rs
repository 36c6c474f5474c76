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
use serde::{Deserialize, Serialize};

/// How a sound interacts with audio from other applications.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Interruption {
    /// Only one sound may be live at a time.
    #[default]
    DoNotMix,
    /// Other audio is lowered while this plays.
    DuckOthers,
    /// Plays alongside anything else.
    MixWithOthers,
}

/// Audio session configuration applied before a stream is loaded.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Session {
    /// Keep playing when the player is not in the foreground.
    pub stays_active_in_background: bool,
    /// How to treat other audio.
    pub interruption: Interruption,
    /// Keep playing when the system is muted by a hardware switch.
    pub plays_in_silent_mode: bool,
    /// Lower other audio instead of taking it over completely.
    pub duck_others: bool,
    /// Route audio to the earpiece rather than the speaker.
    pub play_through_earpiece: bool,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            stays_active_in_background: true,
            interruption: Interruption::DoNotMix,
            plays_in_silent_mode: true,
            duck_others: true,
            play_through_earpiece: false,
        }
    }
}

impl Session {
    /// Returns true if only one sound may be live at a time.
    pub fn is_exclusive(&self) -> bool {
        self.interruption == Interruption::DoNotMix
    }
}
