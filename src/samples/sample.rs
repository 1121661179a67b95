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
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{error, info, span, warn, Level};

use super::{
    engine::Engine,
    playback::{self, Finished, LoopError, PlayError, PlayOutcome, CHUNK_FRAMES},
};
use crate::{
    audio::{self, Stream, StreamError, StreamParams},
    pcm::{self, DecodeError, Decoder, PcmSpec},
    playsync::CancelHandle,
    util::{duration_display, filename_display},
};

/// Where loaded samples send their audio.
#[derive(Clone)]
pub enum Backend {
    /// Every sample opens its own stream on the device.
    Dedicated(Arc<dyn audio::Device>),
    /// Every sample plays through the shared engine.
    Shared(Arc<Engine>),
}

/// The playback mode of a sample. Fixed when the sample is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dedicated,
    Shared,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Dedicated => "dedicated",
            Mode::Shared => "shared",
        })
    }
}

/// Errors loading a sample.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to open sample {name} ({}): {source}", path.display())]
    Open {
        name: String,
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("failed to open a stream for sample {name}: {source}")]
    Stream {
        name: String,
        #[source]
        source: StreamError,
    },

    #[error("sample {0} is closed")]
    Closed(String),
}

enum Owner {
    Dedicated,
    Shared(Arc<Engine>),
}

struct State {
    decoder: Option<Box<dyn Decoder>>,
    buffer: Vec<i32>,
    stream: Option<Box<dyn Stream>>,
    faulted: bool,
    closed: bool,
}

/// A sample that can be played on demand. The decoder and the conversion buffer are
/// reused by every play.
pub struct Sample {
    name: String,
    path: PathBuf,
    spec: PcmSpec,
    duration: Option<Duration>,
    owner: Owner,
    state: Mutex<State>,
}

impl fmt::Debug for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sample")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("spec", &self.spec)
            .field("mode", &self.mode())
            .finish()
    }
}

impl Sample {
    /// Loads the sample at the given path. In dedicated mode this opens a stream matching
    /// the file's channel count and sample rate.
    pub fn load(name: &str, path: &Path, backend: &Backend) -> Result<Sample, LoadError> {
        let decoder = pcm::open(path).map_err(|source| LoadError::Open {
            name: name.to_string(),
            path: path.to_path_buf(),
            source,
        })?;
        Sample::from_decoder(name, path, decoder, backend)
    }

    /// Creates a sample around an already opened decoder.
    pub(crate) fn from_decoder(
        name: &str,
        path: &Path,
        decoder: Box<dyn Decoder>,
        backend: &Backend,
    ) -> Result<Sample, LoadError> {
        let spec = decoder.spec();
        let duration = decoder.total_frames().map(|frames| spec.duration_of(frames));

        let (owner, stream) = match backend {
            Backend::Dedicated(device) => {
                let params = StreamParams::new(spec.channels, spec.sample_rate, CHUNK_FRAMES);
                let stream = device
                    .open_stream(params)
                    .map_err(|source| LoadError::Stream {
                        name: name.to_string(),
                        source,
                    })?;
                (Owner::Dedicated, Some(stream))
            }
            Backend::Shared(engine) => {
                let params = engine.params();
                if params.channels != spec.channels || params.sample_rate != spec.sample_rate {
                    warn!(
                        sample = name,
                        sample_spec = %spec,
                        engine = %params,
                        "Sample format doesn't match the shared stream, it will be played as is."
                    );
                }
                (Owner::Shared(engine.clone()), None)
            }
        };

        let sample = Sample {
            name: name.to_string(),
            path: path.to_path_buf(),
            spec,
            duration,
            owner,
            state: Mutex::new(State {
                decoder: Some(decoder),
                buffer: vec![0; CHUNK_FRAMES * usize::from(spec.channels)],
                stream,
                faulted: false,
                closed: false,
            }),
        };
        info!(
            sample = sample.name,
            file = filename_display(path),
            spec = %spec,
            duration = duration.map(duration_display).unwrap_or_default(),
            mode = %sample.mode(),
            "Loaded sample."
        );

        Ok(sample)
    }

    /// The name of the sample.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The playback mode of the sample.
    pub fn mode(&self) -> Mode {
        match self.owner {
            Owner::Dedicated => Mode::Dedicated,
            Owner::Shared(_) => Mode::Shared,
        }
    }

    /// The decoded format of the sample.
    pub fn spec(&self) -> PcmSpec {
        self.spec
    }

    /// The length of the sample, if the decoder knows it.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Returns true if a decode error has stopped this sample from playing.
    pub fn is_faulted(&self) -> bool {
        self.state.lock().faulted
    }

    /// Plays the sample from the beginning, blocking until it ends, fails, or is cut off.
    pub fn play(&self, cancel_handle: &CancelHandle) -> Result<PlayOutcome, PlayError> {
        match &self.owner {
            Owner::Dedicated => self.play_dedicated(cancel_handle),
            Owner::Shared(engine) => engine.play_sample(self, cancel_handle),
        }
    }

    fn play_dedicated(&self, cancel_handle: &CancelHandle) -> Result<PlayOutcome, PlayError> {
        let span = span!(Level::INFO, "play sample (dedicated)");
        let _enter = span.enter();

        let mut state = self.state.lock();
        let State {
            decoder,
            buffer,
            stream,
            faulted,
            closed,
        } = &mut *state;
        self.check_ready(*closed, *faulted)?;
        let (Some(decoder), Some(stream)) = (decoder.as_mut(), stream.as_mut()) else {
            return Err(PlayError::Closed(self.name.clone()));
        };

        info!(
            sample = self.name,
            duration = self.duration().map(duration_display).unwrap_or_default(),
            "Playing sample."
        );
        let result = playback::run(decoder.as_mut(), buffer, stream.as_mut(), || {
            cancel_handle
                .is_cancelled()
                .then_some(PlayOutcome::Cancelled)
        });
        self.finish(result, faulted)
    }

    /// Plays the sample on a stream owned by someone else. The caller decides when to stop
    /// through `interrupted`.
    pub(crate) fn play_on<F>(
        &self,
        stream: &mut dyn Stream,
        interrupted: F,
    ) -> Result<PlayOutcome, PlayError>
    where
        F: FnMut() -> Option<PlayOutcome>,
    {
        let mut state = self.state.lock();
        let State {
            decoder,
            buffer,
            faulted,
            closed,
            ..
        } = &mut *state;
        self.check_ready(*closed, *faulted)?;
        let Some(decoder) = decoder.as_mut() else {
            return Err(PlayError::Closed(self.name.clone()));
        };

        info!(
            sample = self.name,
            duration = self.duration().map(duration_display).unwrap_or_default(),
            "Playing sample."
        );
        let result = playback::run(decoder.as_mut(), buffer, stream, interrupted);
        self.finish(result, faulted)
    }

    fn check_ready(&self, closed: bool, faulted: bool) -> Result<(), PlayError> {
        if closed {
            return Err(PlayError::Closed(self.name.clone()));
        }
        if faulted {
            return Err(PlayError::Faulted(self.name.clone()));
        }
        Ok(())
    }

    fn finish(
        &self,
        result: Result<Finished, LoopError>,
        faulted: &mut bool,
    ) -> Result<PlayOutcome, PlayError> {
        match result {
            Ok(Finished { outcome, frames }) => {
                info!(
                    sample = self.name,
                    %outcome,
                    frames,
                    played = duration_display(self.spec.duration_of(frames)),
                    "Finished playing sample."
                );
                Ok(outcome)
            }
            Err(LoopError::Decode(source)) => {
                *faulted = true;
                error!(sample = self.name, err = %source, "Decode failed, sample is now faulted.");
                Err(PlayError::Decode {
                    name: self.name.clone(),
                    source,
                })
            }
            Err(LoopError::Stream(source)) => {
                error!(sample = self.name, err = %source, "Stream failed, play aborted.");
                Err(PlayError::Stream {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Reopens the decoder from the sample's file, clearing a fault.
    pub fn reload(&self) -> Result<(), LoadError> {
        let decoder = pcm::open(&self.path).map_err(|source| LoadError::Open {
            name: self.name.clone(),
            path: self.path.clone(),
            source,
        })?;
        if decoder.spec() != self.spec {
            warn!(
                sample = self.name,
                was = %self.spec,
                now = %decoder.spec(),
                "Sample format changed on reload, keeping the original buffer layout."
            );
        }

        let mut state = self.state.lock();
        if state.closed {
            return Err(LoadError::Closed(self.name.clone()));
        }
        state.decoder = Some(decoder);
        state.faulted = false;
        info!(sample = self.name, "Reloaded sample.");
        Ok(())
    }

    /// Releases the decoder and any dedicated stream. Closing twice is a no-op.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.decoder = None;
        if let Some(mut stream) = state.stream.take() {
            if let Err(e) = stream.close() {
                warn!(sample = self.name, err = %e, "Error closing sample stream.");
            }
        }
        info!(sample = self.name, "Closed sample.");
    }
}
