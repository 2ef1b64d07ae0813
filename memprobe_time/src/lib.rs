//
// Copyright 2026 The Project Oak Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! High-resolution tick sources for memory measurements.
//!
//! Everything that times a memory workload goes through the [`Timer`] trait,
//! which deals in raw ticks of a monotonic counter. Ticks are converted to
//! nanoseconds only when a measurement is reported.
//!
//! # Organization
//!
//! - `tsc`: invariant time-stamp counter (x86_64 only)
//! - `monotonic`: the OS monotonic clock
//! - `platform`: picks the best available source
//! - `manual`: a deterministic, hand-advanced timer for tests

use std::time::Duration;

pub mod manual;
pub mod monotonic;
pub mod platform;
#[cfg(target_arch = "x86_64")]
pub mod tsc;

pub use manual::ManualTimer;
pub use monotonic::MonotonicTimer;
pub use platform::PlatformTimer;
#[cfg(target_arch = "x86_64")]
pub use tsc::{read_tsc, TscTimer};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Errors produced while setting up a tick source.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("high-resolution clock unavailable: {reason}")]
    ClockUnavailable { reason: String },
}

/// A monotonic, high-resolution tick counter.
///
/// This trait is object-safe so the benchmark engine can hold an
/// `Arc<dyn Timer>` and share it between worker threads.
pub trait Timer: Send + Sync {
    /// Current counter value. Never decreases between two calls on the same
    /// thread.
    fn now(&self) -> u64;

    /// Number of ticks per second.
    fn ticks_per_second(&self) -> u64;

    /// Smallest interval between two distinct readings.
    fn resolution(&self) -> Duration;

    /// Converts a tick count into nanoseconds.
    fn ticks_to_nanos(&self, ticks: u64) -> u64 {
        let tps = self.ticks_per_second().max(1) as u128;
        (ticks as u128 * NANOS_PER_SEC / tps) as u64
    }

    /// Converts a duration into the number of ticks it spans.
    fn nanos_to_ticks(&self, nanos: u64) -> u64 {
        (nanos as u128 * self.ticks_per_second() as u128 / NANOS_PER_SEC) as u64
    }

    /// Nanoseconds elapsed between two readings of this timer.
    fn elapsed_nanos(&self, start: u64, end: u64) -> u64 {
        self.ticks_to_nanos(end.saturating_sub(start))
    }
}
