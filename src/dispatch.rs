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
//! Turns pad events into sample plays.

use std::{collections::HashMap, fmt, sync::Arc};

use midly::{
    live::{LiveEvent, SystemCommon},
    MidiMessage,
};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, Level};

use crate::{
    playsync::CancelHandle,
    samples::{PlayError, PlayOutcome, Sample},
};

/// The system exclusive payload that asks the sampler to shut down.
pub const STOP_COMMAND: [u8; 4] = [0x7F, 0x7F, 0x06, 0x01];

/// An event from the pad controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PadEvent {
    /// A pad was hit. Channels are zero based.
    NoteStart { channel: u8, key: u8, velocity: u8 },
    /// A pad was released.
    NoteEnd { channel: u8, key: u8 },
    /// A system exclusive message, without the framing bytes.
    SysEx(Vec<u8>),
}

impl PadEvent {
    /// Parses raw MIDI bytes. Returns None for anything that isn't a pad event.
    pub fn parse(raw: &[u8]) -> Option<PadEvent> {
        match LiveEvent::parse(raw) {
            Ok(LiveEvent::Midi { channel, message }) => {
                let channel = channel.as_int();
                match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        Some(PadEvent::NoteStart {
                            channel,
                            key: key.as_int(),
                            velocity: vel.as_int(),
                        })
                    }
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        Some(PadEvent::NoteEnd {
                            channel,
                            key: key.as_int(),
                        })
                    }
                    _ => None,
                }
            }
            Ok(LiveEvent::Common(SystemCommon::SysEx(data))) => Some(PadEvent::SysEx(
                data.iter().map(|byte| byte.as_int()).collect(),
            )),
            Ok(_) => None,
            Err(e) => {
                debug!(err = %e, raw = ?raw, "Unable to parse MIDI event.");
                None
            }
        }
    }
}

/// What the dispatcher decided to do with an event.
#[derive(Debug)]
pub enum Action {
    Trigger(Vec<Arc<Sample>>),
    Shutdown,
    Ignore,
}

/// A sample that may be played when an unmapped pad is hit.
#[derive(Debug, Clone)]
pub struct AmbientEntry {
    sample: Arc<Sample>,
    probability: f64,
}

impl AmbientEntry {
    /// Creates an ambient entry. The probability is clamped to [0, 1].
    pub fn new(sample: Arc<Sample>, probability: f64) -> AmbientEntry {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        AmbientEntry {
            sample,
            probability,
        }
    }
}

/// A running play. Awaiting it yields the play's terminal state.
pub struct PlayHandle {
    sample: String,
    join: JoinHandle<Result<PlayOutcome, PlayError>>,
}

impl PlayHandle {
    /// The name of the sample being played.
    pub fn sample(&self) -> &str {
        &self.sample
    }

    /// Waits for the play to end.
    pub async fn join(self) -> Result<PlayOutcome, PlayError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => {
                error!(sample = self.sample, err = %e, "Play task failed.");
                Err(PlayError::Aborted(self.sample))
            }
        }
    }
}

impl fmt::Debug for PlayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayHandle")
            .field("sample", &self.sample)
            .finish()
    }
}

/// Plays the sample on the blocking pool.
pub fn spawn_play(sample: Arc<Sample>, cancel_handle: CancelHandle) -> PlayHandle {
    let name = sample.name().to_string();
    let join = tokio::task::spawn_blocking(move || sample.play(&cancel_handle));
    PlayHandle { sample: name, join }
}

/// Maps pad events to samples.
pub struct Dispatcher {
    pads: HashMap<u8, Vec<Arc<Sample>>>,
    ambient: Vec<AmbientEntry>,
    rng: Mutex<StdRng>,
    shutdown: CancelHandle,
    plays: CancelHandle,
}

impl Dispatcher {
    /// Creates a new dispatcher. A seed makes the ambient selections reproducible.
    pub fn new(
        pads: HashMap<u8, Vec<Arc<Sample>>>,
        ambient: Vec<AmbientEntry>,
        seed: Option<u64>,
        shutdown: CancelHandle,
    ) -> Dispatcher {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Dispatcher {
            pads,
            ambient,
            rng: Mutex::new(rng),
            shutdown,
            plays: CancelHandle::new(),
        }
    }

    /// The handle cancelled when the stop command arrives.
    pub fn shutdown_handle(&self) -> &CancelHandle {
        &self.shutdown
    }

    /// Cancels every play started by this dispatcher.
    pub fn cancel_plays(&self) {
        self.plays.cancel();
    }

    /// Plays the sample under this dispatcher's cancel handle.
    pub fn trigger(&self, sample: Arc<Sample>) -> PlayHandle {
        debug!(sample = sample.name(), "Triggering sample.");
        spawn_play(sample, self.plays.clone())
    }

    /// Decides what to do with the event.
    pub fn route(&self, event: &PadEvent) -> Action {
        match event {
            PadEvent::NoteStart {
                channel,
                key,
                velocity,
            } => {
                debug!(channel, key, velocity, "Pad hit.");
                if let Some(samples) = self.pads.get(key) {
                    return Action::Trigger(samples.clone());
                }

                let selected = self.select_ambient();
                if selected.is_empty() {
                    debug!(key, "Unmapped pad selected no ambient samples.");
                    return Action::Ignore;
                }
                Action::Trigger(selected)
            }
            PadEvent::NoteEnd { channel, key } => {
                debug!(channel, key, "Pad released.");
                Action::Ignore
            }
            PadEvent::SysEx(payload) if payload[..] == STOP_COMMAND => {
                info!("Received stop command.");
                Action::Shutdown
            }
            PadEvent::SysEx(payload) => {
                info!(payload = ?payload, "Ignoring system exclusive message.");
                Action::Ignore
            }
        }
    }

    /// Routes the event and acts on it, returning a handle for every play started.
    pub fn dispatch(&self, event: &PadEvent) -> Vec<PlayHandle> {
        let span = span!(Level::DEBUG, "dispatch");
        let _enter = span.enter();

        match self.route(event) {
            Action::Trigger(samples) => samples
                .into_iter()
                .map(|sample| self.trigger(sample))
                .collect(),
            Action::Shutdown => {
                self.shutdown.cancel();
                Vec::new()
            }
            Action::Ignore => Vec::new(),
        }
    }

    fn select_ambient(&self) -> Vec<Arc<Sample>> {
        let mut rng = self.rng.lock();
        self.ambient
            .iter()
            .filter(|entry| rng.gen_bool(entry.probability))
            .map(|entry| entry.sample.clone())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use std::{path::Path, time::Duration};

    use super::*;
    use crate::{
        audio::mock,
        pcm::{memory::MemoryDecoder, PcmSpec},
        samples::Backend,
    };

    fn sample(name: &str, backend: &Backend) -> Arc<Sample> {
        let spec = PcmSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 16,
        };
        Arc::new(
            Sample::from_decoder(
                name,
                Path::new(name),
                Box::new(MemoryDecoder::new(vec![1; 64], spec)),
                backend,
            )
            .expect("sample"),
        )
    }

    fn dispatcher(seed: Option<u64>) -> Dispatcher {
        let backend = Backend::Dedicated(Arc::new(mock::Device::with_write_delay(
            "mock",
            Duration::ZERO,
        )));
        let pads = HashMap::from([
            (44, vec![sample("moo", &backend)]),
            (45, vec![sample("fart", &backend), sample("moo-again", &backend)]),
        ]);
        let ambient = vec![
            AmbientEntry::new(sample("screen-beeps", &backend), 0.5),
            AmbientEntry::new(sample("scan", &backend), 1.0),
            AmbientEntry::new(sample("never", &backend), 0.0),
        ];
        Dispatcher::new(pads, ambient, seed, CancelHandle::new())
    }

    fn note_on(key: u8) -> PadEvent {
        PadEvent::NoteStart {
            channel: 0,
            key,
            velocity: 100,
        }
    }

    fn names(action: Action) -> Vec<String> {
        match action {
            Action::Trigger(samples) => samples.iter().map(|s| s.name().to_string()).collect(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            PadEvent::parse(&[0x91, 44, 100]),
            Some(PadEvent::NoteStart {
                channel: 1,
                key: 44,
                velocity: 100
            })
        );
        assert_eq!(
            PadEvent::parse(&[0x90, 44, 0]),
            Some(PadEvent::NoteEnd { channel: 0, key: 44 })
        );
        assert_eq!(
            PadEvent::parse(&[0x80, 45, 64]),
            Some(PadEvent::NoteEnd { channel: 0, key: 45 })
        );
        assert_eq!(
            PadEvent::parse(&[0xF0, 0x7F, 0x7F, 0x06, 0x01, 0xF7]),
            Some(PadEvent::SysEx(STOP_COMMAND.to_vec()))
        );
        // Unterminated sysex still yields its data bytes.
        assert_eq!(
            PadEvent::parse(&[0xF0, 0x7F, 0x7F, 0x06, 0x01]),
            Some(PadEvent::SysEx(STOP_COMMAND.to_vec()))
        );
        assert_eq!(PadEvent::parse(&[0xF0, 0xF7]), Some(PadEvent::SysEx(vec![])));
        assert_eq!(PadEvent::parse(&[0xF8]), None);
        assert_eq!(PadEvent::parse(&[0xB0, 7, 100]), None);
        assert_eq!(PadEvent::parse(&[]), None);
    }

    #[test]
    fn test_pad_mapping() {
        let dispatcher = dispatcher(Some(1));
        assert_eq!(names(dispatcher.route(&note_on(44))), vec!["moo"]);
        assert_eq!(
            names(dispatcher.route(&note_on(45))),
            vec!["fart", "moo-again"]
        );
        assert!(matches!(
            dispatcher.route(&PadEvent::NoteEnd { channel: 0, key: 44 }),
            Action::Ignore
        ));
    }

    #[test]
    fn test_unmapped_pads_only_select_ambient_samples() {
        let dispatcher = dispatcher(Some(7));
        for key in 46..60 {
            let selected = names(dispatcher.route(&note_on(key)));
            assert!(selected.contains(&"scan".to_string()));
            assert!(!selected.contains(&"never".to_string()));
            assert!(selected
                .iter()
                .all(|name| name == "scan" || name == "screen-beeps"));
        }
    }

    #[test]
    fn test_seeded_selection_is_reproducible() {
        let first = dispatcher(Some(42));
        let second = dispatcher(Some(42));
        let run = |dispatcher: &Dispatcher| -> Vec<Vec<String>> {
            (0..32)
                .map(|_| names(dispatcher.route(&note_on(50))))
                .collect()
        };

        let first_run = run(&first);
        assert_eq!(first_run, run(&second));
        // Both outcomes of the coin flip show up.
        assert!(first_run.iter().any(|names| names.len() == 2));
        assert!(first_run.iter().any(|names| names.len() == 1));
    }

    #[test]
    fn test_only_exact_stop_command_shuts_down() {
        let dispatcher = dispatcher(None);
        let near_misses = [
            vec![0x7F, 0x7F, 0x06],
            vec![0x7F, 0x7F, 0x06, 0x01, 0x00],
            vec![0x7F, 0x7F, 0x06, 0x02],
            vec![0x7E, 0x7F, 0x06, 0x01],
            vec![],
        ];
        for payload in near_misses {
            assert!(matches!(
                dispatcher.route(&PadEvent::SysEx(payload)),
                Action::Ignore
            ));
        }
        assert!(!dispatcher.shutdown_handle().is_cancelled());

        assert!(matches!(
            dispatcher.route(&PadEvent::SysEx(STOP_COMMAND.to_vec())),
            Action::Shutdown
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dispatch_spawns_plays() {
        let dispatcher = dispatcher(Some(3));
        let handles = dispatcher.dispatch(&note_on(45));
        assert_eq!(
            handles.iter().map(|h| h.sample()).collect::<Vec<_>>(),
            vec!["fart", "moo-again"]
        );
        for handle in handles {
            assert_eq!(handle.join().await.expect("play"), PlayOutcome::Completed);
        }

        assert!(dispatcher
            .dispatch(&PadEvent::SysEx(STOP_COMMAND.to_vec()))
            .is_empty());
        assert!(dispatcher.shutdown_handle().is_cancelled());
    }
}
