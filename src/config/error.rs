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
/// Typed error for config load/parse failures so callers can distinguish
/// file problems from invalid values without string matching.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config load/parse error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid duration {value:?} for {field}: {reason}")]
    Duration {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("sample {0} is defined more than once")]
    DuplicateSample(String),

    #[error("unknown sample {sample} referenced by {by}")]
    UnknownSample { sample: String, by: String },

    #[error("probability {probability} for ambient sample {sample} must be between 0 and 1")]
    Probability { sample: String, probability: f64 },

    #[error("MIDI key {0} must be between 0 and 127")]
    Key(u8),

    #[error("MIDI key {0} is mapped more than once")]
    DuplicatePad(u8),

    #[error("diagnostic key range {first}..={last} is reversed")]
    KeyRange { first: u8, last: u8 },

    #[error("MIDI channel {0} must be between 1 and 16")]
    Channel(u8),

    #[error("MIDI velocity {0} must be between 0 and 127")]
    Velocity(u8),

    #[error("{field} must be at least 1")]
    Zero { field: &'static str },

    #[error("{0} is required")]
    Missing(&'static str),
}
