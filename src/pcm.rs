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
use std::{fmt, path::Path, time::Duration};

#[cfg(test)]
pub mod memory;
pub mod wav;

/// The format of decoded PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    pub channels: u16,
    pub sample_rate: u32,
    /// The significant bits in each decoded sample.
    pub bits_per_sample: u16,
}

impl PcmSpec {
    /// The duration of the given number of frames.
    pub fn duration_of(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }
}

impl fmt::Display for PcmSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}ch {}Hz {}-bit",
            self.channels, self.sample_rate, self.bits_per_sample
        )
    }
}

/// Error types for decoding PCM
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a valid WAV container: {0}")]
    InvalidContainer(String),

    #[error("failed to decode audio: {0}")]
    Read(#[source] hound::Error),

    #[error("decode buffer of {samples} samples doesn't hold whole {channels} channel frames")]
    BufferShape { samples: usize, channels: u16 },
}

/// A source of interleaved integer PCM.
pub trait Decoder: Send {
    /// The format of the decoded audio.
    fn spec(&self) -> PcmSpec;

    /// Fills the buffer with up to `buffer.len() / channels` frames of interleaved samples at
    /// their native width. Returns the number of frames read; zero means the end was reached.
    fn read_chunk(&mut self, buffer: &mut [i32]) -> Result<usize, DecodeError>;

    /// Positions the decoder back at the first frame.
    fn rewind(&mut self) -> Result<(), DecodeError>;

    /// The total number of frames, if known.
    fn total_frames(&self) -> Option<u64>;
}

/// Opens a decoder for the file at the given path.
pub fn open(path: &Path) -> Result<Box<dyn Decoder>, DecodeError> {
    Ok(Box::new(wav::WavDecoder::open(path)?))
}

/// Widens native-width samples to 32-bit in place.
pub fn widen(samples: &mut [i32], bits_per_sample: u16) {
    if bits_per_sample == 0 || bits_per_sample >= 32 {
        return;
    }
    let shift = 32 - u32::from(bits_per_sample);
    for sample in samples.iter_mut() {
        *sample <<= shift;
    }
}

/// Makes sure a buffer holds whole frames.
fn check_buffer(buffer: &[i32], channels: u16) -> Result<(), DecodeError> {
    if channels == 0 || buffer.len() % usize::from(channels) != 0 {
        return Err(DecodeError::BufferShape {
            samples: buffer.len(),
            channels,
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_widen() {
        let mut samples = vec![1, -1, i16::MAX as i32, i16::MIN as i32];
        widen(&mut samples, 16);
        assert_eq!(
            samples,
            vec![1 << 16, -1 << 16, (i16::MAX as i32) << 16, i32::MIN]
        );

        let mut samples = vec![0x7FFFFF, -0x800000];
        widen(&mut samples, 24);
        assert_eq!(samples, vec![0x7FFFFF00, i32::MIN]);

        let mut samples = vec![12345];
        widen(&mut samples, 32);
        assert_eq!(samples, vec![12345]);
    }

    #[test]
    fn test_duration_of() {
        let spec = PcmSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 16,
        };
        assert_eq!(spec.duration_of(24000), Duration::from_millis(500));
        assert_eq!(spec.to_string(), "2ch 48000Hz 16-bit");
    }

    #[test]
    fn test_check_buffer() {
        assert!(check_buffer(&[0; 4], 2).is_ok());
        assert!(matches!(
            check_buffer(&[0; 3], 2),
            Err(DecodeError::BufferShape { .. })
        ));
    }
}
