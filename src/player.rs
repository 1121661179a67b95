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
use std::{collections::HashMap, error::Error, path::Path, sync::Arc};

use tracing::{error, info, span, warn, Instrument, Level};

use crate::{
    audio,
    config::{self, ConfigError},
    controller::Controller,
    dispatch::{self, AmbientEntry, Dispatcher, PlayHandle},
    midi, pcm,
    playsync::CancelHandle,
    samples::{Backend, Engine, PlayOutcome, Sample},
    util::{duration_display, filename_display},
};

/// Everything the sampler needs to run: the devices, the loaded samples and the pad mapping.
pub struct Player {
    config: config::Player,
    engine: Option<Arc<Engine>>,
    samples: HashMap<String, Arc<Sample>>,
    dispatcher: Arc<Dispatcher>,
    midi_device: Arc<dyn midi::Device>,
    midi_output_device: Arc<dyn midi::Device>,
}

impl Player {
    /// Finds the configured devices and loads every sample.
    pub fn from_config(config: config::Player) -> Result<Player, Box<dyn Error>> {
        let audio_device = audio::get_device(config.audio_device())?;
        let midi_name = config
            .midi_device()
            .ok_or(ConfigError::Missing("midi_device"))?;
        let midi_device = midi::get_device(midi_name)?;
        let midi_output_device = match config.midi_output_device() {
            Some(output_name) if output_name != midi_name => midi::get_device(output_name)?,
            _ => midi_device.clone(),
        };

        Player::new(config, audio_device, midi_device, midi_output_device)
    }

    /// Creates a player on the given devices, loading every configured sample.
    pub fn new(
        config: config::Player,
        audio_device: Arc<dyn audio::Device>,
        midi_device: Arc<dyn midi::Device>,
        midi_output_device: Arc<dyn midi::Device>,
    ) -> Result<Player, Box<dyn Error>> {
        let span = span!(Level::INFO, "player setup");
        let _enter = span.enter();

        let (backend, engine) = if config.shared_stream() {
            let engine = Arc::new(Engine::new(
                audio_device.as_ref(),
                config.engine().channels(),
                config.engine().sample_rate(),
                config.engine().preemption_capacity(),
            )?);
            (Backend::Shared(engine.clone()), Some(engine))
        } else {
            (Backend::Dedicated(audio_device.clone()), None)
        };
        info!(
            audio_device = %audio_device,
            midi_device = %midi_device,
            shared_stream = config.shared_stream(),
            "Setting up player."
        );

        let samples = match load_samples(&config, &backend) {
            Ok(samples) => samples,
            Err(e) => {
                if let Some(engine) = engine {
                    engine.close();
                }
                return Err(e);
            }
        };

        let mut pads = HashMap::new();
        for pad in config.pads() {
            let pad_samples = pad
                .samples()
                .iter()
                .map(|name| lookup(&samples, name, || format!("pad {}", pad.key())))
                .collect::<Result<Vec<_>, _>>()?;
            pads.insert(pad.key(), pad_samples);
        }
        let ambient = config
            .ambient()
            .iter()
            .map(|entry| {
                Ok(AmbientEntry::new(
                    lookup(&samples, entry.sample(), || "ambient".to_string())?,
                    entry.probability(),
                ))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let dispatcher = Arc::new(Dispatcher::new(
            pads,
            ambient,
            config.seed(),
            CancelHandle::new(),
        ));

        Ok(Player {
            config,
            engine,
            samples,
            dispatcher,
            midi_device,
            midi_output_device,
        })
    }

    /// The handle that stops the player once cancelled.
    pub fn shutdown_handle(&self) -> CancelHandle {
        self.dispatcher.shutdown_handle().clone()
    }

    /// Runs until the stop command arrives or the process is interrupted, then cleans up.
    pub async fn run(self) -> Result<(), Box<dyn Error>> {
        let span = span!(Level::INFO, "player");
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> Result<(), Box<dyn Error>> {
        if let Some(handle) = self.cue(self.config.startup_sample()) {
            log_play(handle).await;
        }

        let controller = match Controller::start(self.dispatcher.clone(), self.midi_device.clone()) {
            Ok(controller) => controller,
            Err(e) => {
                self.close().await;
                return Err(e.into());
            }
        };

        let shutdown = self.shutdown_handle();
        let sequencer = if self.config.diagnostic().enabled() {
            let sequencer = self.config.diagnostic().sequencer()?;
            Some(sequencer.spawn(self.midi_output_device.clone(), shutdown.clone()))
        } else {
            None
        };

        if let Some(handle) = self.cue(self.config.ready_sample()) {
            tokio::spawn(log_play(handle));
        }
        info!(samples = self.samples.len(), "Ready for pad events.");

        let interrupt = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Interrupted, shutting down.");
                        shutdown.cancel();
                    }
                    Err(e) => warn!(err = %e, "Unable to listen for interrupts."),
                }
            })
        };
        let waiter = shutdown.clone();
        tokio::task::spawn_blocking(move || waiter.wait()).await?;
        interrupt.abort();

        info!("Shutting down.");
        controller.stop().await;
        self.dispatcher.cancel_plays();
        if let Some(sequencer) = sequencer {
            if tokio::task::spawn_blocking(move || sequencer.join())
                .await?
                .is_err()
            {
                error!("Diagnostic sequence panicked.");
            }
        }

        if let Some(sample) = self.sample(self.config.closing_sample()) {
            let closing = CancelHandle::new();
            let interrupt = {
                let closing = closing.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        closing.cancel();
                    }
                })
            };
            log_play(dispatch::spawn_play(sample, closing)).await;
            interrupt.abort();
        }
        tokio::time::sleep(self.config.closing_delay()?).await;

        self.close().await;
        Ok(())
    }

    fn sample(&self, name: Option<&str>) -> Option<Arc<Sample>> {
        self.samples.get(name?).cloned()
    }

    fn cue(&self, name: Option<&str>) -> Option<PlayHandle> {
        self.sample(name)
            .map(|sample| self.dispatcher.trigger(sample))
    }

    /// Closes every sample and the shared engine.
    async fn close(self) {
        let samples = self.samples;
        let engine = self.engine;
        let closed = tokio::task::spawn_blocking(move || {
            for sample in samples.values() {
                sample.close();
            }
            if let Some(engine) = engine {
                engine.close();
            }
        })
        .await;
        if let Err(e) = closed {
            error!(err = %e, "Error closing samples.");
        }
    }
}

/// Plays a single file through the given device until it ends or the process is interrupted.
pub async fn play_file(
    path: &Path,
    device_name: &str,
    shared_stream: bool,
) -> Result<PlayOutcome, Box<dyn Error>> {
    let device = audio::get_device(device_name)?;
    let (backend, engine) = if shared_stream {
        let spec = pcm::open(path)?.spec();
        let engine = Arc::new(Engine::new(
            device.as_ref(),
            spec.channels,
            spec.sample_rate,
            1,
        )?);
        (Backend::Shared(engine.clone()), Some(engine))
    } else {
        (Backend::Dedicated(device), None)
    };
    let sample = Arc::new(Sample::load(filename_display(path), path, &backend)?);
    info!(
        file = filename_display(path),
        spec = %sample.spec(),
        duration = sample.duration().map(duration_display).unwrap_or_default(),
        "Playing file."
    );

    let cancel_handle = CancelHandle::new();
    let interrupt = {
        let cancel_handle = cancel_handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel_handle.cancel();
            }
        })
    };
    let result = dispatch::spawn_play(sample.clone(), cancel_handle).join().await;
    interrupt.abort();

    tokio::task::spawn_blocking(move || {
        sample.close();
        if let Some(engine) = engine {
            engine.close();
        }
    })
    .await?;

    Ok(result?)
}

fn load_samples(
    config: &config::Player,
    backend: &Backend,
) -> Result<HashMap<String, Arc<Sample>>, Box<dyn Error>> {
    let mut samples: HashMap<String, Arc<Sample>> = HashMap::new();
    for (name, path) in config.samples() {
        match Sample::load(&name, &path, backend) {
            Ok(sample) => {
                samples.insert(name, Arc::new(sample));
            }
            Err(e) => {
                samples.values().for_each(|sample| sample.close());
                return Err(e.into());
            }
        }
    }
    Ok(samples)
}

fn lookup(
    samples: &HashMap<String, Arc<Sample>>,
    name: &str,
    by: impl FnOnce() -> String,
) -> Result<Arc<Sample>, ConfigError> {
    samples
        .get(name)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownSample {
            sample: name.to_string(),
            by: by(),
        })
}

async fn log_play(handle: PlayHandle) {
    let sample = handle.sample().to_string();
    match handle.join().await {
        Ok(outcome) => info!(sample, %outcome, "Cue finished."),
        Err(e) => error!(sample, err = %e, "Cue failed."),
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs, path::Path, sync::Arc, time::Duration};

    use serial_test::serial;

    use super::{play_file, Player};
    use crate::{
        audio, config, midi,
        samples::PlayOutcome,
        testutil::{eventually_async, ramp, write_wav},
    };

    /// Half a second of audio, written in several chunks.
    const CLOSING_SAMPLES: usize = 24000;

    const CONFIG: &str = r#"
shared_stream: false
samples:
  - name: moo
    path: moo.wav
  - name: power-up
    path: power-up.wav
  - name: bleep
    path: bleep.wav
  - name: power-down
    path: power-down.wav
pads:
  - key: 44
    samples: [moo]
startup_sample: power-up
ready_sample: bleep
closing_sample: power-down
closing_delay: 10ms
diagnostic:
  enabled: true
  first_key: 44
  last_key: 47
  dwell: 1ms
"#;

    fn write_samples(dir: &Path) -> Result<(), Box<dyn Error>> {
        for name in ["moo", "power-up", "bleep"] {
            write_wav(&dir.join(format!("{}.wav", name)), 1, &ramp(64), 48000)?;
        }
        // Longer than the closing delay.
        write_wav(&dir.join("power-down.wav"), 1, &ramp(CLOSING_SAMPLES), 48000)?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn test_lifecycle() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        write_samples(tempdir.path())?;
        let config_path = tempdir.path().join("padsampler.yaml");
        fs::write(&config_path, CONFIG)?;

        let audio_device = audio::mock::Device::with_write_delay("mock-audio", Duration::from_millis(20));
        let midi_device = midi::mock::Device::get("mock-midi");
        let player = Player::new(
            config::Player::deserialize(&config_path)?,
            Arc::new(audio_device.clone()),
            Arc::new(midi_device.clone()),
            Arc::new(midi_device.clone()),
        )?;
        assert_eq!(audio_device.stream_count(), 4);

        let (audio, midi) = (&audio_device, &midi_device);
        let (result, ()) = tokio::join!(player.run(), async move {
            eventually_async(|| async move { midi.is_watching() }, "never watched MIDI").await;
            // The startup cue finishes before pad events are watched.
            assert_eq!(audio.samples_written(1), 64);
            eventually_async(
                || async move { audio.samples_written(2) == 64 },
                "ready cue never played",
            )
            .await;
            eventually_async(
                || async move { midi.emitted_events().len() == 8 },
                "diagnostic sequence never finished",
            )
            .await;

            assert!(midi.mock_event(&[0x90, 44, 127]));
            eventually_async(
                || async move { audio.samples_written(0) == 64 },
                "pad never played",
            )
            .await;

            assert!(midi.mock_event(&[0xF0, 0x7F, 0x7F, 0x06, 0x01, 0xF7]));
        });
        result?;

        assert!(!midi_device.is_watching());
        assert_eq!(audio_device.samples_written(3), CLOSING_SAMPLES);
        for stream in 0..4 {
            assert!(audio_device.is_closed(stream));
        }
        Ok(())
    }

    #[test]
    #[serial]
    fn test_missing_sample_fails_setup() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        write_wav(&tempdir.path().join("moo.wav"), 1, &ramp(64), 48000)?;
        let config_path = tempdir.path().join("padsampler.yaml");
        fs::write(
            &config_path,
            "shared_stream: false\nsamples:\n  - {name: moo, path: moo.wav}\n  - {name: gone, path: gone.wav}\n",
        )?;

        let audio_device = audio::mock::Device::with_write_delay("mock-audio", Duration::ZERO);
        let midi_device: Arc<dyn midi::Device> = Arc::new(midi::mock::Device::get("mock-midi"));
        let result = Player::new(
            config::Player::deserialize(&config_path)?,
            Arc::new(audio_device.clone()),
            midi_device.clone(),
            midi_device,
        );

        assert!(result.is_err());
        assert!(audio_device.is_closed(0));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_play_file() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("moo.wav");
        write_wav(&path, 2, &ramp(256), 48000)?;

        assert_eq!(
            play_file(&path, "mock-output", false).await?,
            PlayOutcome::Completed
        );
        assert_eq!(
            play_file(&path, "mock-output", true).await?,
            PlayOutcome::Completed
        );
        assert!(play_file(&tempdir.path().join("gone.wav"), "mock-output", false)
            .await
            .is_err());
        Ok(())
    }
}
