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
use std::time::Duration;

use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use crate::sequencer::Sequencer;

const DEFAULT_FIRST_KEY: u8 = 44;
const DEFAULT_LAST_KEY: u8 = 59;
const DEFAULT_CHANNEL: u8 = 1;
const DEFAULT_VELOCITY: u8 = 127;
const DEFAULT_DWELL: Duration = Duration::from_millis(40);

/// The diagnostic note pattern sent to the controller at startup.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Diagnostic {
    /// Whether the pattern is sent at all.
    enabled: Option<bool>,
    /// The first key of the pad grid.
    first_key: Option<u8>,
    /// The last key of the pad grid, inclusive.
    last_key: Option<u8>,
    /// The MIDI channel, 1 to 16.
    channel: Option<u8>,
    velocity: Option<u8>,
    /// How long each note is held, e.g. "40ms".
    dwell: Option<String>,
}

impl Diagnostic {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn first_key(&self) -> u8 {
        self.first_key.unwrap_or(DEFAULT_FIRST_KEY)
    }

    pub fn last_key(&self) -> u8 {
        self.last_key.unwrap_or(DEFAULT_LAST_KEY)
    }

    /// The one based MIDI channel.
    pub fn channel(&self) -> u8 {
        self.channel.unwrap_or(DEFAULT_CHANNEL)
    }

    pub fn velocity(&self) -> u8 {
        self.velocity.unwrap_or(DEFAULT_VELOCITY)
    }

    /// Returns the dwell time from the configuration.
    pub fn dwell(&self) -> Result<Duration, ConfigError> {
        match &self.dwell {
            Some(dwell) => parse_duration("diagnostic.dwell", dwell),
            None => Ok(DEFAULT_DWELL),
        }
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        let (first, last) = (self.first_key(), self.last_key());
        for key in [first, last] {
            if key > 127 {
                return Err(ConfigError::Key(key));
            }
        }
        if first > last {
            return Err(ConfigError::KeyRange { first, last });
        }
        if !(1..=16).contains(&self.channel()) {
            return Err(ConfigError::Channel(self.channel()));
        }
        if self.velocity() > 127 {
            return Err(ConfigError::Velocity(self.velocity()));
        }
        self.dwell()?;
        Ok(())
    }

    /// Builds the sequencer described by this configuration.
    pub fn sequencer(&self) -> Result<Sequencer, ConfigError> {
        self.validate()?;
        Ok(Sequencer::new(
            self.first_key()..=self.last_key(),
            self.channel() - 1,
            self.velocity(),
            self.dwell()?,
        ))
    }
}

/// Parses a duration string such as "1s" or "40ms".
pub(super) fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    DurationString::from_string(value.to_string())
        .map(Duration::from)
        .map_err(|e| ConfigError::Duration {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
}
