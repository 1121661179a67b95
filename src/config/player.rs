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
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, Environment, File};
use serde::Deserialize;

use super::{
    diagnostic::{parse_duration, Diagnostic},
    error::ConfigError,
    ENV_PREFIX,
};
use crate::samples::engine::{
    DEFAULT_CHANNELS, DEFAULT_PREEMPTION_CAPACITY, DEFAULT_SAMPLE_RATE,
};

const DEFAULT_AUDIO_DEVICE: &str = "default";
const DEFAULT_CLOSING_DELAY: Duration = Duration::from_secs(1);

/// A named sample file.
#[derive(Deserialize, Clone, Debug)]
pub struct SampleEntry {
    name: String,
    /// Relative paths are resolved against the config file's directory.
    path: PathBuf,
}

impl SampleEntry {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The samples played when a pad is hit.
#[derive(Deserialize, Clone, Debug)]
pub struct PadEntry {
    key: u8,
    samples: Vec<String>,
}

impl PadEntry {
    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }
}

/// A sample that unmapped pads may play, and how likely it is to be picked.
#[derive(Deserialize, Clone, Debug)]
pub struct AmbientEntry {
    sample: String,
    probability: f64,
}

impl AmbientEntry {
    pub fn sample(&self) -> &str {
        &self.sample
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }
}

/// The shared output stream used when the platform only offers one.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Engine {
    sample_rate: Option<u32>,
    channels: Option<u16>,
    /// How many cutoff requests may queue up, usually the number of pads.
    preemption_capacity: Option<usize>,
}

impl Engine {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn channels(&self) -> u16 {
        self.channels.unwrap_or(DEFAULT_CHANNELS)
    }

    pub fn preemption_capacity(&self) -> usize {
        self.preemption_capacity
            .unwrap_or(DEFAULT_PREEMPTION_CAPACITY)
    }
}

/// The configuration for the sampler.
#[derive(Deserialize, Clone, Debug)]
pub struct Player {
    /// The audio output device.
    audio_device: Option<String>,
    /// The MIDI device the pads are read from.
    midi_device: Option<String>,
    /// The MIDI device diagnostic notes are sent to. Defaults to the input device.
    midi_output_device: Option<String>,
    /// Forces shared stream playback on or off. Defaults to on for Linux.
    shared_stream: Option<bool>,
    /// Enables debug logging.
    verbose: Option<bool>,
    #[serde(default)]
    engine: Engine,
    #[serde(default)]
    samples: Vec<SampleEntry>,
    #[serde(default)]
    pads: Vec<PadEntry>,
    #[serde(default)]
    ambient: Vec<AmbientEntry>,
    /// Seeds the ambient selection.
    seed: Option<u64>,
    /// Played once the samples are loaded.
    startup_sample: Option<String>,
    /// Played once pad events are being watched.
    ready_sample: Option<String>,
    /// Played on shutdown.
    closing_sample: Option<String>,
    /// How long to wait after the closing sample has finished before exiting.
    closing_delay: Option<String>,
    #[serde(default)]
    diagnostic: Diagnostic,

    #[serde(skip)]
    base_path: PathBuf,
}

impl Player {
    /// Parses the player configuration from a YAML file, applying environment overrides, and
    /// validates it.
    pub fn deserialize(path: &Path) -> Result<Player, ConfigError> {
        let mut player = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Player>()?;

        player.base_path = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        player.validate()?;
        Ok(player)
    }

    /// Checks that every reference and value in the configuration makes sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for sample in &self.samples {
            if !names.insert(sample.name.as_str()) {
                return Err(ConfigError::DuplicateSample(sample.name.clone()));
            }
        }
        let known = |sample: &str, by: String| {
            if names.contains(sample) {
                Ok(())
            } else {
                Err(ConfigError::UnknownSample {
                    sample: sample.to_string(),
                    by,
                })
            }
        };

        let mut keys = HashSet::new();
        for pad in &self.pads {
            if pad.key > 127 {
                return Err(ConfigError::Key(pad.key));
            }
            if !keys.insert(pad.key) {
                return Err(ConfigError::DuplicatePad(pad.key));
            }
            for sample in &pad.samples {
                known(sample, format!("pad {}", pad.key))?;
            }
        }

        for entry in &self.ambient {
            known(&entry.sample, "ambient".to_string())?;
            if !(0.0..=1.0).contains(&entry.probability) {
                return Err(ConfigError::Probability {
                    sample: entry.sample.clone(),
                    probability: entry.probability,
                });
            }
        }

        for (field, sample) in [
            ("startup_sample", &self.startup_sample),
            ("ready_sample", &self.ready_sample),
            ("closing_sample", &self.closing_sample),
        ] {
            if let Some(sample) = sample {
                known(sample, field.to_string())?;
            }
        }

        if self.engine.channels() == 0 {
            return Err(ConfigError::Zero {
                field: "engine.channels",
            });
        }
        if self.engine.sample_rate() == 0 {
            return Err(ConfigError::Zero {
                field: "engine.sample_rate",
            });
        }
        if self.engine.preemption_capacity() == 0 {
            return Err(ConfigError::Zero {
                field: "engine.preemption_capacity",
            });
        }

        self.closing_delay()?;
        self.diagnostic.validate()
    }

    /// Returns the audio device from the configuration.
    pub fn audio_device(&self) -> &str {
        self.audio_device.as_deref().unwrap_or(DEFAULT_AUDIO_DEVICE)
    }

    /// Returns the MIDI input device from the configuration.
    pub fn midi_device(&self) -> Option<&str> {
        self.midi_device.as_deref()
    }

    /// Returns the MIDI output device, which is the input device unless configured.
    pub fn midi_output_device(&self) -> Option<&str> {
        self.midi_output_device
            .as_deref()
            .or(self.midi_device.as_deref())
    }

    /// Returns true if samples share a single output stream. Linux platforms default to a
    /// shared stream.
    pub fn shared_stream(&self) -> bool {
        self.shared_stream.unwrap_or(cfg!(target_os = "linux"))
    }

    /// Forces shared stream playback on.
    pub fn force_shared_stream(&mut self) {
        self.shared_stream = Some(true);
    }

    pub fn verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Every configured sample with its path resolved.
    pub fn samples(&self) -> Vec<(String, PathBuf)> {
        self.samples
            .iter()
            .map(|sample| (sample.name.clone(), self.base_path.join(&sample.path)))
            .collect()
    }

    pub fn pads(&self) -> &[PadEntry] {
        &self.pads
    }

    pub fn ambient(&self) -> &[AmbientEntry] {
        &self.ambient
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn startup_sample(&self) -> Option<&str> {
        self.startup_sample.as_deref()
    }

    pub fn ready_sample(&self) -> Option<&str> {
        self.ready_sample.as_deref()
    }

    pub fn closing_sample(&self) -> Option<&str> {
        self.closing_sample.as_deref()
    }

    /// Returns the closing delay from the configuration.
    pub fn closing_delay(&self) -> Result<Duration, ConfigError> {
        match &self.closing_delay {
            Some(closing_delay) => parse_duration("closing_delay", closing_delay),
            None => Ok(DEFAULT_CLOSING_DELAY),
        }
    }

    pub fn diagnostic(&self) -> &Diagnostic {
        &self.diagnostic
    }
}

#[cfg(test)]
mod test {
    use std::{
        env,
        error::Error,
        fs,
        path::{Path, PathBuf},
        time::Duration,
    };

    use serial_test::serial;

    use super::*;

    const BEATSTEP: &str = r#"
audio_device: mock-output
midi_device: Arturia BeatStep
shared_stream: true
seed: 7
samples:
  - name: moo
    path: sounds/moo_32b.wav
  - name: fart
    path: sounds/fart_32b.wav
  - name: scan
    path: /opt/sounds/scan_32b.wav
  - name: power-up
    path: sounds/powerUp_32b.wav
pads:
  - key: 44
    samples: [moo]
  - key: 45
    samples: [fart, moo]
ambient:
  - sample: scan
    probability: 1
  - sample: moo
    probability: 0.5
startup_sample: power-up
closing_delay: 250ms
diagnostic:
  enabled: true
  dwell: 10ms
"#;

    fn write_config(contents: &str) -> Result<(tempfile::TempDir, PathBuf), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("padsampler.yaml");
        fs::write(&path, contents)?;
        Ok((tempdir, path))
    }

    #[test]
    #[serial]
    fn test_parse() -> Result<(), Box<dyn Error>> {
        let (tempdir, path) = write_config(BEATSTEP)?;
        let player = Player::deserialize(&path)?;

        assert_eq!(player.audio_device(), "mock-output");
        assert_eq!(player.midi_device(), Some("Arturia BeatStep"));
        assert_eq!(player.midi_output_device(), Some("Arturia BeatStep"));
        assert!(player.shared_stream());
        assert!(!player.verbose());
        assert_eq!(player.seed(), Some(7));
        assert_eq!(player.engine().sample_rate(), 48000);
        assert_eq!(player.engine().channels(), 2);
        assert_eq!(player.engine().preemption_capacity(), 16);
        assert_eq!(player.closing_delay()?, Duration::from_millis(250));
        assert_eq!(player.startup_sample(), Some("power-up"));
        assert_eq!(player.ready_sample(), None);

        let samples = player.samples();
        assert_eq!(samples[0].0, "moo");
        assert_eq!(samples[0].1, tempdir.path().join("sounds/moo_32b.wav"));
        assert_eq!(samples[2].1, PathBuf::from("/opt/sounds/scan_32b.wav"));

        assert_eq!(player.pads()[1].key(), 45);
        assert_eq!(player.pads()[1].samples(), ["fart", "moo"]);
        assert_eq!(player.ambient()[0].probability(), 1.0);

        let diagnostic = player.diagnostic();
        assert!(diagnostic.enabled());
        assert_eq!(diagnostic.dwell()?, Duration::from_millis(10));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_beatstep_asset() -> Result<(), Box<dyn Error>> {
        let player = Player::deserialize(Path::new("assets/beatstep.yaml"))?;

        assert_eq!(player.midi_device(), Some("Arturia BeatStep"));
        assert_eq!(player.samples().len(), 7);
        assert_eq!(
            player.samples()[0].1,
            Path::new("assets").join("sounds/moo.wav")
        );
        assert_eq!(player.pads().len(), 2);
        assert_eq!(player.ambient().len(), 3);
        assert_eq!(player.closing_sample(), Some("power-down"));
        assert_eq!(player.closing_delay()?, Duration::from_secs(1));
        assert!(player.diagnostic().enabled());
        Ok(())
    }

    #[test]
    #[serial]
    fn test_minimal_defaults() -> Result<(), Box<dyn Error>> {
        let (_tempdir, path) = write_config("midi_device: pads\n")?;
        let player = Player::deserialize(&path)?;

        assert_eq!(player.audio_device(), "default");
        assert_eq!(player.shared_stream(), cfg!(target_os = "linux"));
        assert_eq!(player.closing_delay()?, Duration::from_secs(1));
        assert!(player.samples().is_empty());
        assert!(!player.diagnostic().enabled());
        Ok(())
    }

    #[test]
    #[serial]
    fn test_environment_overrides() -> Result<(), Box<dyn Error>> {
        let (_tempdir, path) =
            write_config("shared_stream: true\nengine:\n  sample_rate: 48000\n")?;
        env::set_var("PADSAMPLER_SHARED_STREAM", "false");
        env::set_var("PADSAMPLER_ENGINE__SAMPLE_RATE", "44100");
        let result = Player::deserialize(&path);
        env::remove_var("PADSAMPLER_SHARED_STREAM");
        env::remove_var("PADSAMPLER_ENGINE__SAMPLE_RATE");

        let player = result?;
        assert!(!player.shared_stream());
        assert_eq!(player.engine().sample_rate(), 44100);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_force_shared_stream() -> Result<(), Box<dyn Error>> {
        let (_tempdir, path) = write_config("shared_stream: false\n")?;
        let mut player = Player::deserialize(&path)?;
        assert!(!player.shared_stream());
        player.force_shared_stream();
        assert!(player.shared_stream());
        Ok(())
    }

    #[test]
    #[serial]
    fn test_invalid_configs() -> Result<(), Box<dyn Error>> {
        let cases = [
            (
                "samples: [{name: a, path: a.wav}]\npads: [{key: 44, samples: [b]}]\n",
                "unknown",
            ),
            (
                "samples: [{name: a, path: a.wav}, {name: a, path: b.wav}]\n",
                "duplicate",
            ),
            (
                "samples: [{name: a, path: a.wav}]\nambient: [{sample: a, probability: 1.5}]\n",
                "probability",
            ),
            ("closing_sample: nope\n", "unknown"),
            ("closing_delay: soon\n", "duration"),
            ("diagnostic: {first_key: 59, last_key: 44}\n", "range"),
            ("diagnostic: {channel: 0}\n", "channel"),
            ("engine: {preemption_capacity: 0}\n", "zero"),
        ];

        for (contents, kind) in cases {
            let (_tempdir, path) = write_config(contents)?;
            let result = Player::deserialize(&path);
            let matched = match (kind, &result) {
                ("unknown", Err(ConfigError::UnknownSample { .. })) => true,
                ("duplicate", Err(ConfigError::DuplicateSample(_))) => true,
                ("probability", Err(ConfigError::Probability { .. })) => true,
                ("duration", Err(ConfigError::Duration { .. })) => true,
                ("range", Err(ConfigError::KeyRange { .. })) => true,
                ("channel", Err(ConfigError::Channel(0))) => true,
                ("zero", Err(ConfigError::Zero { .. })) => true,
                _ => false,
            };
            assert!(matched, "{} gave {:?}", contents, result.err());
        }
        Ok(())
    }
}
