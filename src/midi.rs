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
use tokio::sync::mpsc::Sender;

pub mod error;
mod midir;
pub mod mock;

pub use error::MidiError;

/// A MIDI device that can listen for pad events and send notes back.
pub trait Device: fmt::Display + Send + Sync {
    /// Returns the name of the device.
    fn name(&self) -> &str;

    /// Watches MIDI input for events and sends the raw bytes to the given sender.
    /// The sender is never awaited from the device callback.
    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), MidiError>;

    /// Stops watching events.
    fn stop_watch_events(&self);

    /// Emits an event.
    fn emit(&self, event: LiveEvent<'static>) -> Result<(), MidiError>;
}

/// Lists devices known to midir.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, MidiError> {
    midir::list()
}

/// Gets a device with the given name. Names starting with "mock" produce a mock device.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, MidiError> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    };

    Ok(Arc::new(midir::get(name)?))
}

/// Picks the entry whose name equals `name`, or failing that the only entry whose name
/// contains it.
fn select_by_name<T>(
    name: &str,
    mut candidates: Vec<T>,
    name_of: impl Fn(&T) -> &str,
) -> Result<T, MidiError> {
    if let Some(position) = candidates
        .iter()
        .position(|candidate| name_of(candidate) == name)
    {
        return Ok(candidates.swap_remove(position));
    }

    let mut matches: Vec<T> = candidates
        .into_iter()
        .filter(|candidate| name_of(candidate).contains(name))
        .collect();
    match matches.len() {
        0 => Err(MidiError::NotFound(name.to_string())),
        1 => Ok(matches.swap_remove(0)),
        _ => Err(MidiError::Ambiguous {
            name: name.to_string(),
            matches: matches
                .iter()
                .map(|candidate| name_of(candidate).to_string())
                .collect::<Vec<String>>()
                .join(", "),
        }),
    }
}
