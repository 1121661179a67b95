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
use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, span, Level};

use crate::{
    dispatch::{Dispatcher, PadEvent},
    midi::{self, MidiError},
    samples::PlayOutcome,
};

/// How many raw MIDI events may queue up before the device callback starts dropping them.
const EVENT_BUFFER: usize = 64;

/// Feeds pad events from a MIDI device into the dispatcher.
pub struct Controller {
    device: Arc<dyn midi::Device>,
    handle: JoinHandle<()>,
}

impl Controller {
    /// Starts watching the device. Must be called from within a tokio runtime.
    pub fn start(
        dispatcher: Arc<Dispatcher>,
        device: Arc<dyn midi::Device>,
    ) -> Result<Controller, MidiError> {
        let (events_tx, events_rx) = mpsc::channel::<Vec<u8>>(EVENT_BUFFER);
        device.watch_events(events_tx)?;
        info!(device = device.name(), "Controller started.");

        Ok(Controller {
            device,
            handle: tokio::spawn(Controller::dispatch_events(dispatcher, events_rx)),
        })
    }

    /// Stops watching the device and waits for queued events to be dispatched.
    pub async fn stop(self) {
        self.device.stop_watch_events();
        if let Err(e) = self.handle.await {
            error!(err = %e, "Error waiting for the controller to stop.");
        }
        info!(device = self.device.name(), "Controller stopped.");
    }

    async fn dispatch_events(dispatcher: Arc<Dispatcher>, mut events_rx: mpsc::Receiver<Vec<u8>>) {
        let span = span!(Level::INFO, "controller");
        let _enter = span.enter();

        while let Some(raw_event) = events_rx.recv().await {
            let Some(event) = PadEvent::parse(&raw_event) else {
                debug!(raw = ?raw_event, "Ignoring MIDI event.");
                continue;
            };

            for handle in dispatcher.dispatch(&event) {
                tokio::spawn(async move {
                    let sample = handle.sample().to_string();
                    match handle.join().await {
                        Ok(PlayOutcome::Completed) => {}
                        Ok(outcome) => debug!(sample, %outcome, "Play ended early."),
                        Err(e) => error!(sample, err = %e, "Play failed."),
                    }
                });
            }
        }
        info!("MIDI watcher closed.");
    }
}
