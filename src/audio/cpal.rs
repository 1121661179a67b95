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
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use super::{StreamError, StreamParams};

/// Slack added on top of the audio duration when waiting on the device.
const DEVICE_SLACK: Duration = Duration::from_secs(1);

/// A small wrapper around a cpal::Device.
#[derive(Clone)]
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn super::Device>>, Box<dyn Error>> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn super::Device> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal output devices.
    fn list_cpal_devices() -> Result<Vec<Device>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = output_configs
                    .map(|config| config.channels())
                    .max()
                    .unwrap_or(0);

                if max_channels > 0 {
                    devices.push(Device {
                        name: device.name()?,
                        max_channels,
                        host_id,
                        device,
                    });
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the given cpal device. The name "default" selects the default output device
    /// of the default host.
    pub fn get(name: &str) -> Result<Device, Box<dyn Error>> {
        if name == "default" {
            let _shh_stdout = shh::stdout()?;
            let _shh_stderr = shh::stderr()?;

            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or("no default output device available")?;
            let max_channels = device.default_output_config()?.channels();
            return Ok(Device {
                name: device.name()?,
                max_channels,
                host_id: host.id(),
                device,
            });
        }

        Device::list_cpal_devices()?
            .into_iter()
            .find(|device| device.name.trim() == name)
            .ok_or_else(|| format!("no device found with name {}", name).into())
    }
}

impl super::Device for Device {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_stream(&self, params: StreamParams) -> Result<Box<dyn super::Stream>, StreamError> {
        let open_error = |reason: String| StreamError::Open { params, reason };

        let sample_format = self
            .device
            .default_output_config()
            .map_err(|e| open_error(e.to_string()))?
            .sample_format();

        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded::<Vec<i32>>(1);
        let (command_tx, command_rx) = crossbeam_channel::unbounded::<Command>();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let shared = Arc::new(Shared::default());

        let chunk_drain = chunk_rx.clone();
        let device = self.device.clone();
        let device_name = self.name.clone();
        let thread_shared = shared.clone();
        let join = thread::spawn(move || {
            run_device_thread(
                device,
                device_name,
                params,
                sample_format,
                chunk_rx,
                command_rx,
                ready_tx,
                thread_shared,
            )
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                let _ = join.join();
                return Err(open_error(reason));
            }
            Err(_) => {
                let _ = join.join();
                return Err(open_error("device thread exited".into()));
            }
        }

        info!(device = self.name, %params, format = %sample_format, "Opened output stream.");

        Ok(Box::new(Stream {
            params,
            chunk_tx,
            chunk_drain,
            command_tx,
            shared,
            join: Some(join),
            started: false,
            closed: false,
        }))
    }
}

/// State shared between the writer and the output callback.
#[derive(Default)]
struct Shared {
    /// Samples accepted by `write` that the callback hasn't handed to the device yet.
    pending: AtomicUsize,
    /// Tells the callback to discard whatever it is holding.
    flush: AtomicBool,
}

/// Commands handled by the device thread.
enum Command {
    Start(Sender<Result<(), String>>),
    Stop(Sender<Result<(), String>>),
    Close,
}

#[allow(clippy::too_many_arguments)]
fn run_device_thread(
    device: cpal::Device,
    device_name: String,
    params: StreamParams,
    sample_format: cpal::SampleFormat,
    chunk_rx: Receiver<Vec<i32>>,
    command_rx: Receiver<Command>,
    ready_tx: Sender<Result<(), String>>,
    shared: Arc<Shared>,
) {
    let fixed = cpal::StreamConfig {
        channels: params.channels,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(params.buffer_frames as u32),
    };
    let stream = build_stream(&device, &fixed, sample_format, &chunk_rx, &shared).or_else(|e| {
        debug!(
            device = device_name,
            err = e.as_str(),
            "Fixed buffer size rejected, using the device default."
        );
        let config = cpal::StreamConfig {
            buffer_size: cpal::BufferSize::Default,
            ..fixed
        };
        build_stream(&device, &config, sample_format, &chunk_rx, &shared)
    });

    let stream = match stream {
        Ok(stream) => {
            // Streams may start playing as soon as they're built.
            if let Err(e) = stream.pause() {
                debug!(device = device_name, err = %e, "Unable to pause new stream.");
            }
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    for command in command_rx.iter() {
        match command {
            Command::Start(reply) => {
                let _ = reply.send(stream.play().map_err(|e| e.to_string()));
            }
            Command::Stop(reply) => {
                let _ = reply.send(stream.pause().map_err(|e| e.to_string()));
            }
            Command::Close => break,
        }
    }

    debug!(device = device_name, "Output stream thread exiting.");
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    chunk_rx: &Receiver<Vec<i32>>,
    shared: &Arc<Shared>,
) -> Result<cpal::Stream, String> {
    match sample_format {
        cpal::SampleFormat::F32 => build_typed::<f32>(device, config, chunk_rx, shared),
        cpal::SampleFormat::F64 => build_typed::<f64>(device, config, chunk_rx, shared),
        cpal::SampleFormat::I16 => build_typed::<i16>(device, config, chunk_rx, shared),
        cpal::SampleFormat::I32 => build_typed::<i32>(device, config, chunk_rx, shared),
        cpal::SampleFormat::U16 => build_typed::<u16>(device, config, chunk_rx, shared),
        cpal::SampleFormat::U32 => build_typed::<u32>(device, config, chunk_rx, shared),
        other => Err(format!("unsupported sample format {}", other)),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    chunk_rx: &Receiver<Vec<i32>>,
    shared: &Arc<Shared>,
) -> Result<cpal::Stream, String>
where
    T: cpal::SizedSample + cpal::FromSample<i32>,
{
    let mut callback = create_callback::<T>(chunk_rx.clone(), shared.clone());
    device
        .build_output_stream(
            config,
            move |data: &mut [T], info: &cpal::OutputCallbackInfo| callback(data, info),
            |err| error!("CPAL output stream error: {}", err),
            None,
        )
        .map_err(|e| e.to_string())
}

/// Pulls written chunks off the channel and converts them into the device format.
/// Anything the writer hasn't supplied in time is played as silence.
fn create_callback<T>(
    chunk_rx: Receiver<Vec<i32>>,
    shared: Arc<Shared>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: cpal::SizedSample + cpal::FromSample<i32>,
{
    let mut current: Vec<i32> = Vec::new();
    let mut position = 0;
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        if shared.flush.swap(false, Ordering::AcqRel) {
            current.clear();
            position = 0;
        }

        let mut filled = 0;
        while filled < data.len() {
            if position >= current.len() {
                match chunk_rx.try_recv() {
                    Ok(chunk) => {
                        current = chunk;
                        position = 0;
                        continue;
                    }
                    Err(_) => break,
                }
            }

            let count = (current.len() - position).min(data.len() - filled);
            for (dst, &src) in data[filled..filled + count]
                .iter_mut()
                .zip(&current[position..position + count])
            {
                *dst = T::from_sample(src);
            }
            position += count;
            filled += count;
            let _ = shared
                .pending
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                    Some(pending.saturating_sub(count))
                });
        }

        data[filled..].fill(T::EQUILIBRIUM);
    }
}

/// An output stream backed by a cpal stream living on its own thread.
pub struct Stream {
    params: StreamParams,
    chunk_tx: Sender<Vec<i32>>,
    /// A second handle on the callback's channel, used to throw away queued chunks.
    chunk_drain: Receiver<Vec<i32>>,
    command_tx: Sender<Command>,
    shared: Arc<Shared>,
    join: Option<thread::JoinHandle<()>>,
    started: bool,
    closed: bool,
}

impl Stream {
    /// How long the given number of interleaved samples takes to play.
    fn duration_of(&self, samples: usize) -> Duration {
        let channels = u64::from(self.params.channels.max(1));
        let frames = samples as u64 / channels;
        Duration::from_micros(
            frames.saturating_mul(1_000_000) / u64::from(self.params.sample_rate.max(1)),
        )
    }

    fn command(
        &self,
        make: impl FnOnce(Sender<Result<(), String>>) -> Command,
    ) -> Result<(), String> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.command_tx
            .send(make(reply_tx))
            .map_err(|_| "device thread has exited".to_string())?;
        reply_rx
            .recv()
            .map_err(|_| "device thread has exited".to_string())?
    }

    /// Waits for the callback to consume everything that was written.
    fn drain(&self) {
        let pending = self.shared.pending.load(Ordering::Acquire);
        let deadline = Instant::now() + self.duration_of(pending) + DEVICE_SLACK;
        while self.shared.pending.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                warn!(
                    pending = self.shared.pending.load(Ordering::Acquire),
                    "Output stream did not drain in time, discarding."
                );
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Throws away anything the callback hasn't played.
    fn discard(&self) {
        let dropped: usize = self.chunk_drain.try_iter().map(|chunk| chunk.len()).sum();
        if dropped > 0 {
            debug!(samples = dropped, "Discarded unplayed samples.");
        }
        self.shared.flush.store(true, Ordering::Release);
        self.shared.pending.store(0, Ordering::Release);
    }
}

impl super::Stream for Stream {
    fn start(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if self.started {
            return Ok(());
        }
        self.command(Command::Start).map_err(StreamError::Start)?;
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if !self.started {
            return Ok(());
        }
        self.drain();
        self.started = false;
        let result = self.command(Command::Stop).map_err(StreamError::Stop);
        self.discard();
        result
    }

    fn write(&mut self, samples: &[i32]) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if !self.started {
            return Err(StreamError::Write("stream is not started".into()));
        }

        let timeout = self.duration_of(samples.len()) * 2 + DEVICE_SLACK;
        self.shared.pending.fetch_add(samples.len(), Ordering::AcqRel);
        match self.chunk_tx.send_timeout(samples.to_vec(), timeout) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.shared.pending.fetch_update(
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    |pending| Some(pending.saturating_sub(samples.len())),
                );
                Err(StreamError::Write(match e {
                    SendTimeoutError::Timeout(_) => "device stopped accepting audio".into(),
                    SendTimeoutError::Disconnected(_) => "device thread has exited".into(),
                }))
            }
        }
    }

    fn close(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.started = false;
        let _ = self.command_tx.send(Command::Close);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| StreamError::Stop("device thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let _ = super::Stream::close(self);
    }
}
