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
mod audio;
mod config;
mod controller;
mod player;
mod store;
#[cfg(test)]
mod testutil;
mod ui;
mod volume;

use clap::{crate_version, Parser, Subcommand};
use player::Player;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use store::Store;
use tracing::info;
use tracing_subscriber::EnvFilter;
use volume::Volume;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A single station internet radio player."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start will start the radio player.
    Start {
        /// The path to the player config.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Keep the volume in memory instead of the state file.
        #[arg(long)]
        no_persist: bool,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Prints the saved volume, or saves a new one (0-1 or n%).
    Volume {
        /// The path to the player config.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// The volume to save.
        value: Option<String>,
    },
    /// Prints the effective configuration.
    Config {
        /// The path to the player config.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Logs go to stderr so they don't trample the screen.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            config: config_path,
            no_persist,
        } => {
            let radio = config::load(config_path.as_deref())?;
            let engine = audio::get_engine(&radio.audio)?;
            let store: Arc<dyn Store> = if no_persist {
                info!("Volume will not be saved.");
                Arc::new(store::memory::Store::new())
            } else {
                let store = store::file::Store::new(radio.state_file());
                info!(path = %store.path().display(), "Using state file.");
                Arc::new(store)
            };
            info!(device = %engine, uri = radio.stream_url, "Starting radio.");

            let player = Arc::new(Player::new(engine, store, Arc::new(ui::Terminal), &radio));
            player.initialize().await;

            let screen = ui::Screen::new(&radio).watch(player.status());
            let mut controller = controller::Controller::new(
                player.clone(),
                Arc::new(controller::keyboard::Driver::new()),
            );
            controller.join().await?;
            screen.abort();
        }
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Volume {
            config: config_path,
            value,
        } => {
            let radio = config::load(config_path.as_deref())?;
            let store = store::file::Store::new(radio.state_file());

            match value {
                Some(value) => {
                    let volume = Volume::from_input(&value)?;
                    store.set(&radio.volume_key, &volume.to_string())?;
                    println!("Volume saved: {}%", volume.percent());
                }
                None => match store.get(&radio.volume_key)? {
                    Some(value) => {
                        let volume: Volume = value.parse()?;
                        println!("Volume: {}%", volume.percent());
                    }
                    None => println!(
                        "No saved volume, {}% will be used.",
                        volume::DEFAULT_VOLUME.percent()
                    ),
                },
            }
        }
        Commands::Config {
            config: config_path,
        } => {
            let radio = config::load(config_path.as_deref())?;
            print!("{}", config::to_yaml(&radio)?);
        }
    }

    Ok(())
}
