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
use std::io::{self, Write};

use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, warn};

use crate::{
    config,
    player::{PlaybackState, Status},
};

/// Width of the volume slider in cells.
const SLIDER_CELLS: usize = 20;

/// A user-visible alert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alert {
    pub title: &'static str,
    pub message: &'static str,
}

impl Alert {
    /// The one alert the player raises: the stream could not be started.
    pub fn stream_error() -> Alert {
        Alert {
            title: "Stream Error",
            message: "Unable to play the stream. Please check the internet or stream URL.",
        }
    }
}

/// Surfaces alerts to the listener.
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &Alert);
}

/// Prints alerts to the terminal.
pub struct Terminal;

impl Notifier for Terminal {
    fn notify(&self, alert: &Alert) {
        warn!(title = alert.title, "Showing alert.");
        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "\n⚠️  {}: {}", alert.title, alert.message) {
            error!(err = e.to_string(), "Unable to show alert");
        }
    }
}

/// The single screen of the player.
pub struct Screen {
    title: String,
    now_playing: String,
}

impl Screen {
    pub fn new(config: &config::Radio) -> Screen {
        Screen {
            title: config.title.clone(),
            now_playing: config.now_playing.clone(),
        }
    }

    /// Draws the screen for the given status.
    pub fn render<W: Write>(&self, out: &mut W, status: &Status) -> io::Result<()> {
        let button = match status.state {
            PlaybackState::Idle => "[ ▶ Play ]",
            PlaybackState::Loading => "[ Loading... ]",
            PlaybackState::Playing => "[ ❚❚ Pause ]",
        };
        let filled = (usize::from(status.volume_percent) * SLIDER_CELLS + 50) / 100;

        writeln!(out)?;
        writeln!(out, "{}", self.title)?;
        writeln!(out, "{}", self.now_playing)?;
        writeln!(out)?;
        writeln!(out, "{}", button)?;
        writeln!(out, "Volume: {}%", status.volume_percent)?;
        writeln!(
            out,
            "[{}{}]",
            "#".repeat(filled),
            "-".repeat(SLIDER_CELLS - filled)
        )?;
        out.flush()
    }

    fn draw(&self, status: &Status) {
        let mut stdout = io::stdout().lock();
        if let Err(e) = self.render(&mut stdout, status) {
            error!(err = e.to_string(), "Unable to draw screen");
        }
    }

    /// Redraws the screen on stdout every time the status changes. Ends when the player goes away.
    pub fn watch(self, mut status_rx: watch::Receiver<Status>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let status = *status_rx.borrow_and_update();
                self.draw(&status);
                if status_rx.changed().await.is_err() {
                    return;
                }
            }
        })
    }
}

/// Records alerts instead of showing them.
#[cfg(test)]
#[derive(Default)]
pub struct Recorder {
    alerts: parking_lot::Mutex<Vec<Alert>>,
}

#[cfg(test)]
impl Recorder {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

#[cfg(test)]
impl Notifier for Recorder {
    fn notify(&self, alert: &Alert) {
        self.alerts.lock().push(alert.clone());
    }
}
