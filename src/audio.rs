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
use std::{error::Error, fmt, sync::Arc};

pub mod cpal;
pub mod error;
pub mod mock;

pub use error::StreamError;

/// The shape of an output stream. Samples written to a stream are interleaved
/// 32-bit integers with `channels` samples per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Number of interleaved channels.
    pub channels: u16,
    /// Frames per second.
    pub sample_rate: u32,
    /// The number of frames the stream is expected to receive per write.
    pub buffer_frames: usize,
}

impl StreamParams {
    /// Creates new stream parameters.
    pub fn new(channels: u16, sample_rate: u32, buffer_frames: usize) -> StreamParams {
        StreamParams {
            channels,
            sample_rate,
            buffer_frames,
        }
    }
}

impl fmt::Display for StreamParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channels: {}, sample rate: {}, buffer length: {}",
            self.channels, self.sample_rate, self.buffer_frames
        )
    }
}

/// An audio output device that can open streams.
pub trait Device: fmt::Display + Send + Sync {
    /// Returns the name of the device.
    fn name(&self) -> &str;

    /// Opens a new output stream. The stream is created stopped.
    fn open_stream(&self, params: StreamParams) -> Result<Box<dyn Stream>, StreamError>;
}

/// A single output stream on a device.
pub trait Stream: Send {
    /// Starts the stream. Starting a started stream is a no-op.
    fn start(&mut self) -> Result<(), StreamError>;

    /// Stops the stream once data already accepted has been handed to the device.
    fn stop(&mut self) -> Result<(), StreamError>;

    /// Writes interleaved samples, blocking until the device accepts them.
    fn write(&mut self, samples: &[i32]) -> Result<(), StreamError>;

    /// Releases the stream. Closing a closed stream is a no-op.
    fn close(&mut self) -> Result<(), StreamError>;
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets a device with the given name. Names starting with "mock" produce a mock device.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    };

    Ok(Arc::new(cpal::Device::get(name)?))
}
