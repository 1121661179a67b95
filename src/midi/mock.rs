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
use std::{fmt, sync::Arc};

use midly::live::LiveEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc::Sender;
use tracing::info;

use super::MidiError;

/// A mock device. Events are injected by tests and emitted events are recorded.
#[derive(Clone)]
pub struct Device {
    name: String,
    sender: Arc<Mutex<Option<Sender<Vec<u8>>>>>,
    emitted: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            sender: Arc::new(Mutex::new(None)),
            emitted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sends the mock event through to the watcher. Returns false if nobody is watching.
    #[cfg(test)]
    pub fn mock_event(&self, event: &[u8]) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.try_send(event.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Returns true if events are being watched.
    #[cfg(test)]
    pub fn is_watching(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Every event emitted so far.
    #[cfg(test)]
    pub fn emitted_events(&self) -> Vec<Vec<u8>> {
        self.emitted.lock().clone()
    }
}

impl super::Device for Device {
    fn name(&self) -> &str {
        &self.name
    }

    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), MidiError> {
        let mut current = self.sender.lock();
        if current.is_some() {
            return Err(MidiError::AlreadyWatching(self.name.clone()));
        }
        *current = Some(sender);
        info!(device = self.name, "Watching MIDI events (mock).");
        Ok(())
    }

    fn stop_watch_events(&self) {
        self.sender.lock().take();
    }

    fn emit(&self, event: LiveEvent<'static>) -> Result<(), MidiError> {
        let mut buf: Vec<u8> = Vec::with_capacity(8);
        event
            .write(&mut buf)
            .map_err(|e| MidiError::Encode(format!("{:?}", e)))?;
        self.emitted.lock().push(buf);
        Ok(())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
