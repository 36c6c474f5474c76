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
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{error, info, span, Level};

use crate::player::Player;

pub mod keyboard;

/// Controller events that will trigger behavior in the player.
#[derive(Debug, PartialEq)]
pub enum Event {
    /// Starts the stream when idle, stops it when playing.
    TogglePlayback,

    /// Sets the volume to the given gain.
    SetVolume(f32),

    /// Moves the volume by the given number of percentage points.
    VolumeStep(i16),

    /// Shuts the player down and stops the controller.
    Quit,
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Drives the player from a driver's events.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver.
    pub fn new(player: Arc<Player>, driver: Arc<dyn Driver>) -> Controller {
        Controller {
            handle: tokio::spawn(async move { Controller::trigger_events(player, driver).await }),
        }
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Triggers player events by watching the driver and getting events from it.
    async fn trigger_events(player: Arc<Player>, driver: Arc<dyn Driver>) {
        let span = span!(Level::INFO, "controller");
        let _enter = span.enter();

        let (events_tx, mut events_rx) = mpsc::channel(1);
        let join_handle = driver.monitor_events(events_tx);

        let state = player.state();
        let volume = player.volume().await.value();
        info!(state = %state, volume = volume, "Controller started.");

        while let Some(event) = events_rx.recv().await {
            info!(event = format!("{:?}", event), "Received event.");

            match event {
                // Loads can take a while, so the slider keeps working while one is in flight.
                Event::TogglePlayback => {
                    let player = player.clone();
                    tokio::spawn(async move { player.toggle_playback().await });
                }
                Event::SetVolume(value) => player.set_volume(value).await,
                Event::VolumeStep(percent) => player.step_volume(percent).await,
                Event::Quit => break,
            }
        }

        info!("Controller closing.");
        player.shutdown().await;
        drop(events_rx);
        match join_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(err = e.to_string(), "Event monitor failed"),
            Err(e) => error!("Error waiting for event monitor to stop: {}", e),
        }
    }
}
