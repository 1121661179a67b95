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

//! Pad-triggered sample playback.
//!
//! This module provides:
//! - Samples that decode and write their own audio chunk by chunk
//! - Dedicated playback, one output stream per sample
//! - Shared playback through an engine that lets the newest trigger cut off the current one

pub mod engine;
pub mod playback;
mod sample;

pub use engine::Engine;
pub use playback::{PlayError, PlayOutcome};
pub use sample::{Backend, LoadError, Mode, Sample};
