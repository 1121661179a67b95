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
mod dispatch;
mod midi;
mod pcm;
mod player;
mod playsync;
mod samples;
mod sequencer;
#[cfg(test)]
mod testutil;
mod util;

use std::{error::Error, path::PathBuf};

use clap::{crate_version, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::player::Player;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A MIDI pad triggered sample player."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the sampler with the given player config.
    Start {
        /// The path to the player config.
        config_path: PathBuf,
        /// Plays every sample through a single shared output stream.
        #[arg(short, long)]
        shared_stream: bool,
        /// Enables debug logging.
        #[arg(short, long)]
        verbose: bool,
    },
    /// Plays a single sample file and exits.
    Play {
        /// The path to the sample file.
        path: PathBuf,
        /// Plays through a shared output stream.
        #[arg(short, long)]
        shared_stream: bool,
        /// The audio device to play through.
        #[arg(short, long, default_value = "default")]
        device: String,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the available MIDI input/output devices.
    MidiDevices {},
}

/// Sets up logging. RUST_LOG takes precedence over the verbose flag.
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            config_path,
            shared_stream,
            verbose,
        } => {
            let mut config = config::Player::deserialize(&config_path)?;
            if shared_stream {
                config.force_shared_stream();
            }
            init_tracing(verbose || config.verbose());
            info!(config = %config_path.display(), "Starting sampler.");

            Player::from_config(config)?.run().await?;
        }
        Commands::Play {
            path,
            shared_stream,
            device,
        } => {
            init_tracing(false);
            let outcome = player::play_file(&path, &device, shared_stream).await?;
            info!(%outcome, "Finished playing.");
        }
        Commands::Devices {} => {
            init_tracing(false);
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
        Commands::MidiDevices {} => {
            init_tracing(false);
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
    }

    Ok(())
}
