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
use std::{sync::Arc, time::Duration};

use parking_lot::{Condvar, Mutex};

/// Represents the current cancel state.
#[derive(Clone, Copy, PartialEq, Debug)]
enum CancelState {
    Running,
    Cancelled,
}

/// A cancel handle is handed to every play. Plays poll it between chunks, and the
/// shutdown path blocks on it until someone cancels.
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<Mutex<CancelState>>,
    condvar: Arc<Condvar>,
}

impl CancelHandle {
    /// Creates a new cancel handle.
    pub fn new() -> CancelHandle {
        CancelHandle {
            state: Arc::new(Mutex::new(CancelState::Running)),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Returns true if the handle has been cancelled. Never blocks for longer than
    /// it takes to read the state.
    pub fn is_cancelled(&self) -> bool {
        *self.state.lock() == CancelState::Cancelled
    }

    /// Blocks until the handle is cancelled.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while *state == CancelState::Running {
            self.condvar.wait(&mut state);
        }
    }

    /// Blocks until the handle is cancelled or the timeout elapses. Returns true if
    /// the handle was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if *state == CancelState::Cancelled {
            return true;
        }
        let _ = self
            .condvar
            .wait_while_for(&mut state, |state| *state == CancelState::Running, timeout);
        *state == CancelState::Cancelled
    }

    /// Cancels the handle, waking every waiter. Cancelling twice is a no-op.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if *state == CancelState::Running {
            *state = CancelState::Cancelled;
            self.condvar.notify_all();
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        CancelHandle::new()
    }
}
