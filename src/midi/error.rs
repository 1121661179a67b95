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
/// Error types for the MIDI transport
#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("no MIDI device found with name {0}")]
    NotFound(String),

    #[error("found too many MIDI devices that match {name} ({matches}), use a less ambiguous device name")]
    Ambiguous { name: String, matches: String },

    #[error("already watching events on {0}")]
    AlreadyWatching(String),

    #[error("MIDI device {0} has no input port")]
    NoInput(String),

    #[error("MIDI device {0} has no output port")]
    NoOutput(String),

    #[error("failed to initialize MIDI: {0}")]
    Init(#[from] midir::InitError),

    #[error("failed to read MIDI port information: {0}")]
    PortInfo(#[from] midir::PortInfoError),

    #[error("failed to connect to MIDI port {port}: {reason}")]
    Connect { port: String, reason: String },

    #[error("failed to send MIDI message: {0}")]
    Send(#[from] midir::SendError),

    #[error("failed to encode MIDI message: {0}")]
    Encode(String),
}
