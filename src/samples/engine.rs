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
//! Arbitration of a single shared output stream.
//!
//! Every play on the shared stream takes an arrival ticket. If someone is already
//! playing, the newcomer pushes a cutoff token carrying its ticket onto a bounded
//! channel, then waits for the stream. The occupant drains the channel once per chunk
//! and gives up the stream as soon as it sees a token from a later arrival. A waiter
//! that is itself overtaken while waiting never plays.

use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, span, warn, Level};

use super::{
    playback::{PlayError, PlayOutcome, CHUNK_FRAMES},
    Sample,
};
use crate::{
    audio::{self, Stream, StreamError, StreamParams},
    playsync::CancelHandle,
};

/// The default number of channels of the shared stream.
pub const DEFAULT_CHANNELS: u16 = 2;

/// The default sample rate of the shared stream.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// The default preemption channel capacity, one slot per pad.
pub const DEFAULT_PREEMPTION_CAPACITY: usize = 16;

/// How long a blocked cutoff request waits before checking whether anyone is still playing.
const CUTOFF_RETRY: Duration = Duration::from_millis(10);

/// The order in which a play arrived at the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

/// Hands a single resource to one occupant at a time, newest arrival first.
pub struct Arbiter<T> {
    resource: Mutex<T>,
    active: AtomicBool,
    arrivals: AtomicU64,
    cutoff_tx: Sender<u64>,
    cutoff_rx: Receiver<u64>,
}

impl<T> Arbiter<T> {
    /// Creates a new arbiter. The capacity of the preemption channel is at least one.
    pub fn new(resource: T, capacity: usize) -> Arbiter<T> {
        let (cutoff_tx, cutoff_rx) = crossbeam_channel::bounded(capacity.max(1));
        Arbiter {
            resource: Mutex::new(resource),
            active: AtomicBool::new(false),
            arrivals: AtomicU64::new(0),
            cutoff_tx,
            cutoff_rx,
        }
    }

    /// Takes an arrival ticket and, if the resource is occupied, asks the occupant to stop.
    /// Blocks while the preemption channel is full and the resource is still occupied.
    pub fn request_cutoff(&self) -> Ticket {
        let ticket = self.arrivals.fetch_add(1, Ordering::SeqCst) + 1;

        if self.active.load(Ordering::SeqCst) {
            let mut token = ticket;
            loop {
                match self.cutoff_tx.send_timeout(token, CUTOFF_RETRY) {
                    Ok(()) => break,
                    Err(SendTimeoutError::Timeout(t)) if self.active.load(Ordering::SeqCst) => {
                        token = t;
                    }
                    // Nobody left to cut off.
                    Err(_) => break,
                }
            }
        }

        Ticket(ticket)
    }

    /// Waits for the resource and marks it occupied.
    pub fn acquire(&self, ticket: Ticket) -> Occupancy<'_, T> {
        let guard = self.resource.lock();
        self.active.store(true, Ordering::SeqCst);
        Occupancy {
            arbiter: self,
            guard,
            ticket,
        }
    }

    /// Returns true if a play that arrived after the given ticket wants the resource.
    /// Drains every pending token.
    pub fn cutoff_requested(&self, ticket: Ticket) -> bool {
        let mut requested = false;
        for token in self.cutoff_rx.try_iter() {
            if token > ticket.0 {
                requested = true;
            }
        }
        requested || self.is_superseded(ticket)
    }

    /// Returns true if anything arrived after the given ticket.
    pub fn is_superseded(&self, ticket: Ticket) -> bool {
        self.arrivals.load(Ordering::SeqCst) > ticket.0
    }

    /// Returns true if the resource is occupied.
    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.active.store(false, Ordering::SeqCst);
        let stale = self.cutoff_rx.try_iter().count();
        if stale > 0 {
            debug!(stale, "Dropped stale cutoff tokens.");
        }
    }
}

/// Exclusive use of an arbiter's resource. Dropping it releases the resource.
pub struct Occupancy<'a, T> {
    arbiter: &'a Arbiter<T>,
    guard: MutexGuard<'a, T>,
    ticket: Ticket,
}

impl<T> Occupancy<'_, T> {
    /// Returns true if something arrived while this occupant was waiting.
    pub fn is_superseded(&self) -> bool {
        self.arbiter.is_superseded(self.ticket)
    }

    /// Returns true if a later arrival asked for the resource.
    pub fn cutoff_requested(&self) -> bool {
        self.arbiter.cutoff_requested(self.ticket)
    }

    pub fn resource_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for Occupancy<'_, T> {
    fn drop(&mut self) {
        // The lock is released after this, when the guard is dropped.
        self.arbiter.release();
    }
}

/// Serializes plays onto a single shared output stream.
pub struct Engine {
    device_name: String,
    params: StreamParams,
    arbiter: Arbiter<Option<Box<dyn Stream>>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("device", &self.device_name)
            .field("params", &self.params)
            .finish()
    }
}

impl Engine {
    /// Opens the shared stream on the given device.
    pub fn new(
        device: &dyn audio::Device,
        channels: u16,
        sample_rate: u32,
        preemption_capacity: usize,
    ) -> Result<Engine, StreamError> {
        let params = StreamParams::new(channels, sample_rate, CHUNK_FRAMES);
        let stream = device.open_stream(params)?;
        info!(
            device = device.name(),
            %params,
            preemption_capacity = preemption_capacity.max(1),
            "Shared engine ready."
        );

        Ok(Engine {
            device_name: device.name().to_string(),
            params,
            arbiter: Arbiter::new(Some(stream), preemption_capacity),
        })
    }

    /// The parameters of the shared stream.
    pub fn params(&self) -> StreamParams {
        self.params
    }

    /// Returns true if a sample is playing on the shared stream.
    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.arbiter.is_active()
    }

    /// Plays the sample on the shared stream, cutting off whatever is currently playing.
    /// The play ends early if the cancel handle is cancelled or a newer play arrives.
    pub fn play_sample(
        &self,
        sample: &Sample,
        cancel_handle: &CancelHandle,
    ) -> Result<PlayOutcome, PlayError> {
        let span = span!(Level::INFO, "play sample (shared)");
        let _enter = span.enter();

        let ticket = self.arbiter.request_cutoff();
        let mut occupancy = self.arbiter.acquire(ticket);

        if occupancy.is_superseded() {
            info!(sample = sample.name(), "Superseded while waiting, not playing.");
            return Ok(PlayOutcome::Preempted);
        }
        if cancel_handle.is_cancelled() {
            return Ok(PlayOutcome::Cancelled);
        }

        let Some(stream) = occupancy.resource_mut().as_mut() else {
            return Err(PlayError::EngineClosed);
        };

        let arbiter = &self.arbiter;
        let outcome = sample.play_on(stream.as_mut(), || {
            if arbiter.cutoff_requested(ticket) {
                Some(PlayOutcome::Preempted)
            } else if cancel_handle.is_cancelled() {
                Some(PlayOutcome::Cancelled)
            } else {
                None
            }
        })?;

        if outcome == PlayOutcome::Preempted {
            info!(sample = sample.name(), "Cut off by a newer trigger.");
        }
        Ok(outcome)
    }

    /// Closes the shared stream, cutting off anything still playing. Closing twice is a no-op.
    pub fn close(&self) {
        let ticket = self.arbiter.request_cutoff();
        let mut occupancy = self.arbiter.acquire(ticket);
        if let Some(mut stream) = occupancy.resource_mut().take() {
            match stream.close() {
                Ok(()) => info!(device = self.device_name, "Closed shared engine."),
                Err(e) => warn!(device = self.device_name, err = %e, "Error closing shared stream."),
            }
        }
    }
}
