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
use std::{collections::BTreeMap, fmt, mem};

use midir::{
    Ignore, MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection,
    MidiOutputPort,
};
use midly::live::LiveEvent;
use parking_lot::Mutex;
use tokio::sync::{mpsc::error::TrySendError, mpsc::Sender};
use tracing::{debug, info, span, warn, Level};

use super::MidiError;

pub struct Device {
    name: String,
    input_port: Option<MidiInputPort>,
    output_port: Option<MidiOutputPort>,
    event_connection: Mutex<Option<MidiInputConnection<()>>>,
    output_connection: Mutex<Option<MidiOutputConnection>>,
}

impl Device {
    fn new(name: String) -> Device {
        Device {
            name,
            input_port: None,
            output_port: None,
            event_connection: Mutex::new(None),
            output_connection: Mutex::new(None),
        }
    }
}

impl super::Device for Device {
    fn name(&self) -> &str {
        &self.name
    }

    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), MidiError> {
        let span = span!(Level::INFO, "watch events (midir)");
        let _enter = span.enter();

        let mut event_connection = self.event_connection.lock();
        if event_connection.is_some() {
            return Err(MidiError::AlreadyWatching(self.name.clone()));
        }

        let input_port = self
            .input_port
            .as_ref()
            .ok_or_else(|| MidiError::NoInput(self.name.clone()))?;

        let mut input = MidiInput::new("padsampler input")?;
        // Sysex messages are dropped unless asked for.
        input.ignore(Ignore::None);

        let device_name = self.name.clone();
        *event_connection = Some(
            input
                .connect(
                    input_port,
                    "padsampler pad watcher",
                    move |_, raw_event, _| match sender.try_send(raw_event.to_vec()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(device = device_name, "MIDI event queue is full, dropping event.")
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!(device = device_name, "MIDI event receiver is gone.")
                        }
                    },
                    (),
                )
                .map_err(|e| MidiError::Connect {
                    port: self.name.clone(),
                    reason: e.to_string(),
                })?,
        );

        info!(device = self.name, "Watching MIDI events.");
        Ok(())
    }

    fn stop_watch_events(&self) {
        // Explicitly drop the connection.
        let event_connection = self.event_connection.lock().take();
        if let Some(connection) = event_connection {
            mem::drop(connection.close());
            info!(device = self.name, "Stopped watching MIDI events.");
        }
    }

    fn emit(&self, event: LiveEvent<'static>) -> Result<(), MidiError> {
        let output_port = self
            .output_port
            .as_ref()
            .ok_or_else(|| MidiError::NoOutput(self.name.clone()))?;

        // Choosing 8 here because that's the largest channel message plus room to spare.
        let mut buf: Vec<u8> = Vec::with_capacity(8);
        event
            .write(&mut buf)
            .map_err(|e| MidiError::Encode(format!("{:?}", e)))?;

        let mut output_connection = self.output_connection.lock();
        if output_connection.is_none() {
            let output = MidiOutput::new("padsampler output")?;
            *output_connection = Some(output.connect(output_port, "padsampler notes").map_err(
                |e| MidiError::Connect {
                    port: self.name.clone(),
                    reason: e.to_string(),
                },
            )?);
        }

        debug!(device = self.name, event = ?event, "Emitting event.");
        if let Some(connection) = output_connection.as_mut() {
            connection.send(&buf)?;
        }
        Ok(())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut capabilities: Vec<&str> = Vec::new();
        if self.input_port.is_some() {
            capabilities.push("Input");
        }
        if self.output_port.is_some() {
            capabilities.push("Output");
        }

        write!(f, "{} ({})", self.name, capabilities.join("/"))
    }
}

/// Lists midir devices and produces the Device trait.
pub fn list() -> Result<Vec<Box<dyn super::Device>>, MidiError> {
    Ok(list_midir_devices()?
        .into_iter()
        .map(|device| {
            let device: Box<dyn super::Device> = Box::new(device);
            device
        })
        .collect())
}

/// Lists midir devices, pairing input and output ports that share a name.
fn list_midir_devices() -> Result<Vec<Device>, MidiError> {
    let input = MidiInput::new("padsampler input listing")?;
    let output = MidiOutput::new("padsampler output listing")?;

    let mut devices: BTreeMap<String, Device> = BTreeMap::new();
    for port in input.ports() {
        let name = input.port_name(&port)?;
        devices
            .entry(name.clone())
            .or_insert_with(|| Device::new(name))
            .input_port
            .get_or_insert(port);
    }
    for port in output.ports() {
        let name = output.port_name(&port)?;
        devices
            .entry(name.clone())
            .or_insert_with(|| Device::new(name))
            .output_port
            .get_or_insert(port);
    }

    Ok(devices.into_values().collect())
}

/// Gets the given midir device.
pub fn get(name: &str) -> Result<Device, MidiError> {
    super::select_by_name(name, list_midir_devices()?, |device| device.name.as_str())
}
