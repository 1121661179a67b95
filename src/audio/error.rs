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
use super::StreamParams;

/// Error types for output stream operations
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("failed to open stream with {params}: {reason}")]
    Open {
        params: StreamParams,
        reason: String,
    },

    #[error("failed to start stream: {0}")]
    Start(String),

    #[error("failed to stop stream: {0}")]
    Stop(String),

    #[error("failed to write to stream: {0}")]
    Write(String),

    #[error("stream is closed")]
    Closed,
}
