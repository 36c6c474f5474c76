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
use std::{fmt, str::FromStr};

/// The volume the player starts with when nothing has been persisted.
pub const DEFAULT_VOLUME: Volume = Volume(1.0);

/// A playback volume in the range [0.0, 1.0].
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Volume(f32);

/// Errors produced when turning raw input into a volume.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VolumeError {
    #[error("volume is not a number")]
    NotANumber,

    #[error("unable to parse volume '{0}'")]
    Parse(String),
}

impl Volume {
    /// Creates a volume, clamping the value into [0.0, 1.0]. NaN is rejected.
    pub fn new(value: f32) -> Result<Volume, VolumeError> {
        if value.is_nan() {
            return Err(VolumeError::NotANumber);
        }
        Ok(Volume(value.clamp(0.0, 1.0)))
    }

    /// Creates a volume from a percentage, clamping into [0, 100].
    pub fn from_percent(percent: f32) -> Result<Volume, VolumeError> {
        Volume::new(percent / 100.0)
    }

    /// Parses listener input, either a gain ("0.7") or a percentage ("70%").
    pub fn from_input(input: &str) -> Result<Volume, VolumeError> {
        let input = input.trim();
        match input.strip_suffix('%') {
            Some(percent) => {
                let percent = percent
                    .trim()
                    .parse::<f32>()
                    .map_err(|_| VolumeError::Parse(input.to_string()))?;
                Volume::from_percent(percent)
            }
            None => input.parse(),
        }
    }

    /// The raw gain value.
    pub fn value(&self) -> f32 {
        self.0
    }

    /// The display percentage, always round(volume * 100).
    pub fn percent(&self) -> u8 {
        (self.0 * 100.0).round() as u8
    }

    /// Returns a new volume moved by the given number of percentage points.
    pub fn step(&self, percent: i16) -> Volume {
        let stepped = (i16::from(self.percent()) + percent).clamp(0, 100);
        Volume(f32::from(stepped) / 100.0)
    }
}

impl Default for Volume {
    fn default() -> Self {
        DEFAULT_VOLUME
    }
}

/// The persisted representation: the decimal string of the float.
impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Volume {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<f32>()
            .map_err(|_| VolumeError::Parse(s.to_string()))?;
        Volume::new(value)
    }
}
