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
//! The decode/write loop shared by both playback modes.

use std::fmt;

use tracing::{debug, warn};

use crate::{
    audio::{Stream, StreamError},
    pcm::{self, DecodeError, Decoder},
};

/// The number of frames decoded and written per iteration.
pub const CHUNK_FRAMES: usize = 8192;

/// How a play that didn't fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The whole sample was written.
    Completed,
    /// The play was cancelled by its cancel handle.
    Cancelled,
    /// A newer trigger took over the shared stream.
    Preempted,
}

impl fmt::Display for PlayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlayOutcome::Completed => "completed",
            PlayOutcome::Cancelled => "cancelled",
            PlayOutcome::Preempted => "preempted",
        })
    }
}

/// A play that failed.
#[derive(Debug, thiserror::Error)]
pub enum PlayError {
    #[error("sample {0} is closed")]
    Closed(String),

    #[error("sample {0} is faulted and must be reloaded")]
    Faulted(String),

    #[error("the shared engine is closed")]
    EngineClosed,

    #[error("failed to decode sample {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: DecodeError,
    },

    #[error("stream failed while playing sample {name}: {source}")]
    Stream {
        name: String,
        #[source]
        source: StreamError,
    },

    #[error("play task for sample {0} did not finish")]
    Aborted(String),
}

/// The result of a loop that ran without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Finished {
    pub outcome: PlayOutcome,
    pub frames: u64,
}

/// Why a loop gave up.
#[derive(Debug)]
pub(crate) enum LoopError {
    Decode(DecodeError),
    Stream(StreamError),
}

/// Runs the decode/write loop until the decoder is exhausted, a write or decode fails, or
/// `interrupted` reports an outcome. `interrupted` is checked once per chunk after the write.
/// Unless decoding failed the decoder is rewound before returning.
pub(crate) fn run<F>(
    decoder: &mut dyn Decoder,
    buffer: &mut [i32],
    stream: &mut dyn Stream,
    mut interrupted: F,
) -> Result<Finished, LoopError>
where
    F: FnMut() -> Option<PlayOutcome>,
{
    let spec = decoder.spec();
    let channels = usize::from(spec.channels);

    stream.start().map_err(LoopError::Stream)?;

    let mut frames = 0u64;
    let result = loop {
        let read = match decoder.read_chunk(buffer) {
            Ok(read) => read,
            Err(e) => break Err(LoopError::Decode(e)),
        };
        if read == 0 {
            break Ok(PlayOutcome::Completed);
        }

        let samples = &mut buffer[..read * channels];
        pcm::widen(samples, spec.bits_per_sample);
        if let Err(e) = write_with_recovery(stream, samples) {
            break Err(LoopError::Stream(e));
        }
        frames += read as u64;

        if let Some(outcome) = interrupted() {
            debug!(%outcome, frames, "Play interrupted.");
            break Ok(outcome);
        }
    };

    if let Err(e) = stream.stop() {
        warn!(err = %e, "Unable to stop stream after play.");
    }

    match result {
        Ok(outcome) => {
            decoder.rewind().map_err(LoopError::Decode)?;
            Ok(Finished { outcome, frames })
        }
        Err(LoopError::Stream(e)) => {
            // The decoder itself is fine, so leave it ready for the next trigger.
            if let Err(rewind_err) = decoder.rewind() {
                return Err(LoopError::Decode(rewind_err));
            }
            Err(LoopError::Stream(e))
        }
        Err(e) => Err(e),
    }
}

/// Writes the samples, restarting the stream and retrying once if the first write fails.
fn write_with_recovery(stream: &mut dyn Stream, samples: &[i32]) -> Result<(), StreamError> {
    let Err(e) = stream.write(samples) else {
        return Ok(());
    };

    warn!(err = %e, "Stream write failed, restarting stream.");
    stream.stop()?;
    stream.start()?;
    stream.write(samples)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::{
        audio::{mock, Device as _, StreamParams},
        pcm::{memory::MemoryDecoder, PcmSpec},
    };

    fn spec() -> PcmSpec {
        PcmSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 16,
        }
    }

    fn setup(samples: Vec<i32>) -> (mock::Device, Box<dyn Stream>, MemoryDecoder, Vec<i32>) {
        let device = mock::Device::with_write_delay("mock", Duration::ZERO);
        let stream = device
            .open_stream(StreamParams::new(2, 48000, CHUNK_FRAMES))
            .expect("open");
        let decoder = MemoryDecoder::new(samples, spec());
        (device, stream, decoder, vec![0; 8])
    }

    #[test]
    fn test_writes_widened_samples_and_rewinds() {
        let (device, mut stream, mut decoder, mut buffer) = setup((1..=10).collect());

        let finished = run(&mut decoder, &mut buffer, stream.as_mut(), || None).expect("run");
        assert_eq!(
            finished,
            Finished {
                outcome: PlayOutcome::Completed,
                frames: 5
            }
        );
        assert_eq!(decoder.position(), 0);

        let expected: Vec<i32> = (1..=10).map(|s| s << 16).collect();
        assert_eq!(device.sessions(0), vec![expected]);
        assert_eq!(device.starts(0), 1);
        assert_eq!(device.stops(0), 1);
    }

    #[test]
    fn test_interrupted_after_first_chunk() {
        let (device, mut stream, mut decoder, mut buffer) = setup((1..=20).collect());

        let finished = run(&mut decoder, &mut buffer, stream.as_mut(), || {
            Some(PlayOutcome::Cancelled)
        })
        .expect("run");
        assert_eq!(finished.outcome, PlayOutcome::Cancelled);
        assert_eq!(finished.frames, 4);
        assert_eq!(decoder.position(), 0);
        assert_eq!(device.sessions(0)[0].len(), 8);
    }

    #[test]
    fn test_single_write_failure_recovers() {
        let (device, mut stream, mut decoder, mut buffer) = setup((1..=10).collect());
        device.fail_next_writes(1);

        let finished = run(&mut decoder, &mut buffer, stream.as_mut(), || None).expect("run");
        assert_eq!(finished.outcome, PlayOutcome::Completed);
        assert_eq!(device.starts(0), 2);
        let written: Vec<i32> = device.sessions(0).concat();
        assert_eq!(written, (1..=10).map(|s| s << 16).collect::<Vec<i32>>());
    }

    #[test]
    fn test_second_write_failure_aborts() {
        let (device, mut stream, mut decoder, mut buffer) = setup((1..=10).collect());
        device.fail_next_writes(2);

        let result = run(&mut decoder, &mut buffer, stream.as_mut(), || None);
        assert!(matches!(result, Err(LoopError::Stream(_))));
        assert_eq!(decoder.position(), 0);
        assert!(device.sessions(0).iter().all(|session| session.is_empty()));
    }

    #[test]
    fn test_decode_failure_is_not_rewound() {
        let (device, mut stream, decoder, mut buffer) = setup((1..=20).collect());
        let mut decoder = decoder.fail_at_chunk(1);

        let result = run(&mut decoder, &mut buffer, stream.as_mut(), || None);
        assert!(matches!(result, Err(LoopError::Decode(_))));
        assert_eq!(decoder.position(), 8);
        assert_eq!(device.stops(0), 1);
    }
}
