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
/// Error types for the audio engine. The player collapses all of these into a single
/// stream error for the listener, so the detail here is for the logs.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stream returned HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("Stream decode error: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("Stream format error: {0}")]
    Format(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Output stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Output stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Output stream error: {0}")]
    PauseStream(#[from] cpal::PauseStreamError),

    #[error("Another sound is already active and the session does not allow mixing")]
    Busy,

    #[error("Sound has been unloaded")]
    Unloaded,

    #[error("Audio worker thread failed: {0}")]
    Worker(String),
}
