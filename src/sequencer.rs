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
use std::{ops::RangeInclusive, sync::Arc, thread, time::Duration};

use midly::{live::LiveEvent, num::u4, num::u7, MidiMessage};
use tracing::{error, info, span, Level};

use crate::{
    midi::{self, MidiError},
    playsync::CancelHandle,
};

/// Lights up the controller's pads one after the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequencer {
    keys: RangeInclusive<u8>,
    channel: u4,
    velocity: u7,
    dwell: Duration,
}

impl Sequencer {
    /// Creates a new sequencer. The channel is zero based.
    pub fn new(keys: RangeInclusive<u8>, channel: u8, velocity: u8, dwell: Duration) -> Sequencer {
        Sequencer {
            keys,
            channel: u4::from(channel.min(15)),
            velocity: u7::from(velocity.min(127)),
            dwell,
        }
    }

    /// The note-on and note-off pair for every key, in order.
    pub fn events(&self) -> Vec<(LiveEvent<'static>, LiveEvent<'static>)> {
        self.keys
            .clone()
            .map(|key| {
                let key = u7::from(key.min(127));
                (
                    LiveEvent::Midi {
                        channel: self.channel,
                        message: MidiMessage::NoteOn {
                            key,
                            vel: self.velocity,
                        },
                    },
                    LiveEvent::Midi {
                        channel: self.channel,
                        message: MidiMessage::NoteOff {
                            key,
                            vel: u7::from(0),
                        },
                    },
                )
            })
            .collect()
    }

    /// Sends the pattern, holding each note for the dwell time. Returns the number of keys
    /// that were played. Stops early once the cancel handle is cancelled.
    pub fn run(
        &self,
        device: &dyn midi::Device,
        cancel_handle: &CancelHandle,
    ) -> Result<usize, MidiError> {
        let span = span!(Level::INFO, "diagnostic sequence");
        let _enter = span.enter();

        let mut played = 0;
        for (note_on, note_off) in self.events() {
            if cancel_handle.is_cancelled() {
                break;
            }
            device.emit(note_on)?;
            let cancelled = cancel_handle.wait_timeout(self.dwell);
            device.emit(note_off)?;
            played += 1;
            if cancelled {
                break;
            }
        }

        info!(device = device.name(), played, "Diagnostic sequence finished.");
        Ok(played)
    }

    /// Runs the pattern on its own thread. Failures are logged.
    pub fn spawn(
        self,
        device: Arc<dyn midi::Device>,
        cancel_handle: CancelHandle,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            if let Err(e) = self.run(device.as_ref(), &cancel_handle) {
                error!(device = device.name(), err = %e, "Diagnostic sequence failed.");
            }
        })
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::midi::mock;

    #[test]
    fn test_full_pattern() {
        let device = mock::Device::get("mock");
        let sequencer = Sequencer::new(44..=59, 0, 127, Duration::from_millis(1));

        let played = sequencer
            .run(&device, &CancelHandle::new())
            .expect("run");
        assert_eq!(played, 16);

        let emitted = device.emitted_events();
        assert_eq!(emitted.len(), 32);
        assert_eq!(emitted[0], vec![0x90, 44, 127]);
        assert_eq!(emitted[1], vec![0x80, 44, 0]);
        assert_eq!(emitted[31], vec![0x80, 59, 0]);
    }

    #[test]
    fn test_channel_and_velocity() {
        let sequencer = Sequencer::new(60..=60, 9, 64, Duration::ZERO);
        let events = sequencer.events();
        assert_eq!(events.len(), 1);

        let mut buf = Vec::new();
        events[0].0.write(&mut buf).expect("write");
        assert_eq!(buf, vec![0x99, 60, 64]);
    }

    #[test]
    fn test_cancel_stops_early() {
        let device = mock::Device::get("mock");
        let cancel_handle = CancelHandle::new();
        let join = Sequencer::new(44..=59, 0, 127, Duration::from_secs(5)).spawn(
            Arc::new(device.clone()),
            cancel_handle.clone(),
        );

        crate::testutil::eventually(
            || !device.emitted_events().is_empty(),
            "sequence never started",
        );
        let started = Instant::now();
        cancel_handle.cancel();
        join.join().expect("join");

        assert!(started.elapsed() < Duration::from_secs(1));
        // The held note is released before stopping.
        assert_eq!(device.emitted_events().len(), 2);
    }
}
