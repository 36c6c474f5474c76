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
use std::io;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::Event;
use crate::volume::Volume;

const TOGGLE: &str = "toggle";
const PLAY: &str = "play";
const PLAY_SHORT: &str = "p";
const VOLUME: &str = "vol";
const LOUDER: &str = "+";
const QUIETER: &str = "-";
const QUIT: &str = "quit";
const QUIT_SHORT: &str = "q";

/// Percentage points moved by a single +/- press.
const VOLUME_STEP: i16 = 5;

/// A driver that reads commands typed on stdin.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Reads a single command. Returns false once input is exhausted or the listener quits.
    fn monitor_io<R, W>(events_tx: &Sender<Event>, mut reader: R, mut writer: W) -> io::Result<bool>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(
            writer,
            "Command ({}/{}, {} <0-1 or n%>, {}, {}, {}): ",
            PLAY, TOGGLE, VOLUME, LOUDER, QUIETER, QUIT,
        )?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            info!("Input closed.");
            Driver::send(events_tx, Event::Quit)?;
            return Ok(false);
        }

        match parse(&input) {
            Some(event) => {
                let quit = event == Event::Quit;
                Driver::send(events_tx, event)?;
                Ok(!quit)
            }
            None => {
                warn!(input = input.trim(), "Unrecognized input");
                Ok(true)
            }
        }
    }

    fn send(events_tx: &Sender<Event>, event: Event) -> io::Result<()> {
        events_tx.blocking_send(event).map_err(io::Error::other)
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

/// Turns a typed line into an event.
fn parse(input: &str) -> Option<Event> {
    let input = input.trim().to_lowercase();
    let mut parts = input.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let argument = parts.next();
    if parts.next().is_some() {
        return None;
    }

    match (command, argument) {
        ("" | PLAY | PLAY_SHORT | TOGGLE, None) => Some(Event::TogglePlayback),
        (VOLUME, Some(value)) => parse_volume(value).map(Event::SetVolume),
        (LOUDER, None) => Some(Event::VolumeStep(VOLUME_STEP)),
        (QUIETER, None) => Some(Event::VolumeStep(-VOLUME_STEP)),
        (QUIT | QUIT_SHORT, None) => Some(Event::Quit),
        _ => None,
    }
}

/// Accepts either a gain ("0.7") or a percentage ("70%"), clamped into range.
fn parse_volume(value: &str) -> Option<f32> {
    Volume::from_input(value).ok().map(|volume| volume.value())
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}
            Ok(())
        })
    }
}
