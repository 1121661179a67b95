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
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use tracing::debug;

use super::{StreamError, StreamParams};

/// How long a mock write blocks for.
#[derive(Clone, Copy, Debug)]
enum Pacing {
    /// Block for as long as the written frames would take to play.
    RealTime,
    /// Block for a fixed amount of time per write.
    Fixed(Duration),
}

/// Everything a mock stream has seen.
#[derive(Default)]
struct StreamRecord {
    params: Option<StreamParams>,
    sessions: Vec<Vec<i32>>,
    starts: usize,
    stops: usize,
    closed: bool,
}

#[derive(Default)]
struct DeviceState {
    streams: Vec<Arc<Mutex<StreamRecord>>>,
    fail_writes: usize,
    fail_open: bool,
}

/// A mock device. Doesn't actually play anything, but remembers what it was asked to play.
#[derive(Clone)]
pub struct Device {
    name: String,
    pacing: Pacing,
    state: Arc<Mutex<DeviceState>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Device {
    /// Gets the given mock device. Writes block for the duration of the written audio.
    pub fn get(name: &str) -> Device {
        Device::with_pacing(name, Pacing::RealTime)
    }

    /// Gets a mock device whose writes each block for the given delay.
    #[cfg(test)]
    pub fn with_write_delay(name: &str, delay: Duration) -> Device {
        Device::with_pacing(name, Pacing::Fixed(delay))
    }

    fn with_pacing(name: &str, pacing: Pacing) -> Device {
        Device {
            name: name.to_string(),
            pacing,
            state: Arc::new(Mutex::new(DeviceState::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes the next `count` writes on any stream of this device fail.
    #[cfg(test)]
    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().fail_writes = count;
    }

    /// Makes every subsequent open fail.
    #[cfg(test)]
    pub fn fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// The number of streams opened on this device.
    #[cfg(test)]
    pub fn stream_count(&self) -> usize {
        self.state.lock().streams.len()
    }

    /// The parameters the given stream was opened with.
    #[cfg(test)]
    pub fn stream_params(&self, stream: usize) -> Option<StreamParams> {
        self.state.lock().streams.get(stream)?.lock().params
    }

    /// Every start-to-stop session of written samples for the given stream.
    #[cfg(test)]
    pub fn sessions(&self, stream: usize) -> Vec<Vec<i32>> {
        match self.state.lock().streams.get(stream) {
            Some(record) => record.lock().sessions.clone(),
            None => Vec::new(),
        }
    }

    /// The total number of samples written to the given stream.
    #[cfg(test)]
    pub fn samples_written(&self, stream: usize) -> usize {
        self.state.lock().streams.get(stream).map_or(0, |record| {
            record.lock().sessions.iter().map(|session| session.len()).sum()
        })
    }

    /// The number of times the given stream was started.
    #[cfg(test)]
    pub fn starts(&self, stream: usize) -> usize {
        self.state
            .lock()
            .streams
            .get(stream)
            .map_or(0, |record| record.lock().starts)
    }

    /// The number of times the given stream was stopped.
    #[cfg(test)]
    pub fn stops(&self, stream: usize) -> usize {
        self.state
            .lock()
            .streams
            .get(stream)
            .map_or(0, |record| record.lock().stops)
    }

    /// Returns true if the given stream has been closed.
    #[cfg(test)]
    pub fn is_closed(&self, stream: usize) -> bool {
        self.state
            .lock()
            .streams
            .get(stream)
            .is_some_and(|record| record.lock().closed)
    }

    /// The largest number of writes that were ever in progress at the same time.
    #[cfg(test)]
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl super::Device for Device {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_stream(&self, params: StreamParams) -> Result<Box<dyn super::Stream>, StreamError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(StreamError::Open {
                params,
                reason: "mock device refused to open".into(),
            });
        }

        let record = Arc::new(Mutex::new(StreamRecord {
            params: Some(params),
            ..Default::default()
        }));
        state.streams.push(record.clone());
        debug!(device = self.name, %params, "Opened mock stream.");

        Ok(Box::new(Stream {
            params,
            pacing: self.pacing,
            started: false,
            closed: false,
            record,
            device: self.clone(),
        }))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

/// A stream on a mock device.
pub struct Stream {
    params: StreamParams,
    pacing: Pacing,
    started: bool,
    closed: bool,
    record: Arc<Mutex<StreamRecord>>,
    device: Device,
}

impl Stream {
    fn delay_for(&self, samples: usize) -> Duration {
        match self.pacing {
            Pacing::Fixed(delay) => delay,
            Pacing::RealTime => {
                let channels = usize::from(self.params.channels.max(1));
                let frames = (samples / channels) as u64;
                Duration::from_micros(
                    frames * 1_000_000 / u64::from(self.params.sample_rate.max(1)),
                )
            }
        }
    }
}

impl super::Stream for Stream {
    fn start(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if !self.started {
            self.started = true;
            let mut record = self.record.lock();
            record.starts += 1;
            record.sessions.push(Vec::new());
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if self.started {
            self.started = false;
            self.record.lock().stops += 1;
        }
        Ok(())
    }

    fn write(&mut self, samples: &[i32]) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if !self.started {
            return Err(StreamError::Write("stream is not started".into()));
        }
        {
            let mut state = self.device.state.lock();
            if state.fail_writes > 0 {
                state.fail_writes -= 1;
                return Err(StreamError::Write("injected mock failure".into()));
            }
        }

        let in_flight = self.device.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.device
            .max_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        thread::sleep(self.delay_for(samples.len()));
        if let Some(session) = self.record.lock().sessions.last_mut() {
            session.extend_from_slice(samples);
        }

        self.device.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<(), StreamError> {
        if !self.closed {
            self.closed = true;
            self.started = false;
            self.record.lock().closed = true;
        }
        Ok(())
    }
}
