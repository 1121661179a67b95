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
use std::io;

use super::{check_buffer, DecodeError, Decoder, PcmSpec};

/// A decoder over interleaved samples held in memory.
pub struct MemoryDecoder {
    samples: Vec<i32>,
    spec: PcmSpec,
    position: usize,
    chunks_read: usize,
    fail_at_chunk: Option<usize>,
}

impl MemoryDecoder {
    pub fn new(samples: Vec<i32>, spec: PcmSpec) -> MemoryDecoder {
        MemoryDecoder {
            samples,
            spec,
            position: 0,
            chunks_read: 0,
            fail_at_chunk: None,
        }
    }

    /// Makes the given (zero based) chunk read fail with a decode error.
    pub fn fail_at_chunk(mut self, chunk: usize) -> MemoryDecoder {
        self.fail_at_chunk = Some(chunk);
        self
    }

    /// The current position in samples.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl Decoder for MemoryDecoder {
    fn spec(&self) -> PcmSpec {
        self.spec
    }

    fn read_chunk(&mut self, buffer: &mut [i32]) -> Result<usize, DecodeError> {
        check_buffer(buffer, self.spec.channels)?;

        let chunk = self.chunks_read;
        self.chunks_read += 1;
        if self.fail_at_chunk == Some(chunk) {
            return Err(DecodeError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "corrupt chunk",
            )));
        }

        let count = buffer.len().min(self.samples.len() - self.position);
        buffer[..count].copy_from_slice(&self.samples[self.position..self.position + count]);
        self.position += count;
        Ok(count / usize::from(self.spec.channels))
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.position = 0;
        Ok(())
    }

    fn total_frames(&self) -> Option<u64> {
        Some((self.samples.len() / usize::from(self.spec.channels.max(1))) as u64)
    }
}
