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
use std::{fs::File, io::BufReader, path::Path};

use hound::WavReader;

use super::{check_buffer, DecodeError, Decoder, PcmSpec};

/// Decodes WAV files with hound. Float files are scaled to full-range 32-bit integers.
pub struct WavDecoder {
    reader: WavReader<BufReader<File>>,
    spec: PcmSpec,
    float: bool,
}

impl WavDecoder {
    /// Opens the WAV file at the given path and validates its header.
    pub fn open(path: &Path) -> Result<WavDecoder, DecodeError> {
        let reader = WavReader::open(path).map_err(|e| match e {
            hound::Error::IoError(e) => DecodeError::Io(e),
            e => DecodeError::InvalidContainer(e.to_string()),
        })?;

        let wav_spec = reader.spec();
        let float = wav_spec.sample_format == hound::SampleFormat::Float;
        if float && wav_spec.bits_per_sample != 32 {
            return Err(DecodeError::InvalidContainer(format!(
                "unsupported float width {}",
                wav_spec.bits_per_sample
            )));
        }
        if wav_spec.channels == 0 {
            return Err(DecodeError::InvalidContainer("no channels".into()));
        }

        Ok(WavDecoder {
            reader,
            spec: PcmSpec {
                channels: wav_spec.channels,
                sample_rate: wav_spec.sample_rate,
                bits_per_sample: if float { 32 } else { wav_spec.bits_per_sample },
            },
            float,
        })
    }
}

impl Decoder for WavDecoder {
    fn spec(&self) -> PcmSpec {
        self.spec
    }

    fn read_chunk(&mut self, buffer: &mut [i32]) -> Result<usize, DecodeError> {
        check_buffer(buffer, self.spec.channels)?;

        let mut read = 0;
        if self.float {
            for (dst, sample) in buffer.iter_mut().zip(self.reader.samples::<f32>()) {
                let sample = sample.map_err(DecodeError::Read)?;
                *dst = (f64::from(sample.clamp(-1.0, 1.0)) * f64::from(i32::MAX)) as i32;
                read += 1;
            }
        } else {
            for (dst, sample) in buffer.iter_mut().zip(self.reader.samples::<i32>()) {
                *dst = sample.map_err(DecodeError::Read)?;
                read += 1;
            }
        }

        Ok(read / usize::from(self.spec.channels))
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.reader.seek(0)?;
        Ok(())
    }

    fn total_frames(&self) -> Option<u64> {
        Some(u64::from(self.reader.duration()))
    }
}
