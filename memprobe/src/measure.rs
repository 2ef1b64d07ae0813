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

//! The timed section shared by every worker.

use core::{
    hint::black_box,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use memprobe_time::Timer;

use crate::config::RunLength;

/// Untimed passes before measurement starts.
pub const WARMUP_PASSES: u64 = 4;

/// Upper bound on untimed chase steps before a pointer-chasing measurement.
pub const WARMUP_CHASE_STEPS: u64 = 1 << 18;

/// Measurements shorter than this many ticks are flagged as unreliable.
pub const MIN_ELAPSED_TICKS: u64 = 10_000;

/// Bytes of traffic between two timer readings in duration-bounded runs.
pub const BYTES_PER_TIMER_CHECK: usize = 1 << 20;

#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Ticks(u64),
    Passes(u64),
    /// Until the flag is set, checked after every round.
    UntilSet(&'a AtomicBool),
}

impl PartialEq for Target<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Ticks(a), Self::Ticks(b)) | (Self::Passes(a), Self::Passes(b)) => a == b,
            (Self::UntilSet(a), Self::UntilSet(b)) => core::ptr::eq(*a, *b),
            _ => false,
        }
    }
}

impl Eq for Target<'_> {}

impl Target<'_> {
    pub fn from_length(length: RunLength, timer: &dyn Timer) -> Self {
        match length {
            RunLength::Duration(duration) => {
                Self::Ticks(timer.nanos_to_ticks(duration.as_nanos() as u64).max(1))
            }
            RunLength::Passes(passes) => Self::Passes(passes.max(1)),
        }
    }
}

/// Raw counts from one timed section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub passes: u64,
    pub elapsed_ticks: u64,
    pub overhead_ticks: u64,
}

impl Timing {
    /// Elapsed ticks with the loop overhead removed. Falls back to the raw
    /// figure when the overhead is not smaller than it.
    pub fn adjusted_ticks(&self) -> u64 {
        if self.overhead_ticks < self.elapsed_ticks {
            self.elapsed_ticks - self.overhead_ticks
        } else {
            self.elapsed_ticks
        }
    }

    pub fn adjusted_duration(&self, timer: &dyn Timer) -> Duration {
        Duration::from_nanos(timer.ticks_to_nanos(self.adjusted_ticks()))
    }

    /// Whether the measurement is too short or too dominated by overhead to
    /// be trusted.
    pub fn is_suspect(&self) -> bool {
        self.overhead_ticks >= self.elapsed_ticks
            || self.elapsed_ticks < MIN_ELAPSED_TICKS
            || self.elapsed_ticks.saturating_sub(self.overhead_ticks) < self.elapsed_ticks / 2
    }
}

/// Passes between timer readings so each check covers roughly
/// [`BYTES_PER_TIMER_CHECK`] bytes.
pub fn passes_per_check(bytes_per_pass: usize) -> u64 {
    (BYTES_PER_TIMER_CHECK / bytes_per_pass.max(1)).max(1) as u64
}

/// Runs `pass` [`WARMUP_PASSES`] times without timing it.
pub fn warm_up(pass: &mut impl FnMut() -> u64) {
    for _ in 0..WARMUP_PASSES {
        black_box(pass());
    }
}

/// Runs `pass` until `target` is met, then runs `dummy` the same number of
/// times to measure the loop overhead.
pub fn time_passes(
    timer: &dyn Timer,
    target: Target<'_>,
    per_check: u64,
    mut pass: impl FnMut() -> u64,
    mut dummy: impl FnMut() -> u64,
) -> Timing {
    let per_check = per_check.max(1);
    let mut sink = 0u64;
    let mut passes = 0u64;

    let start = timer.now();
    let end = loop {
        let round = match target {
            Target::Passes(total) => per_check.min(total - passes),
            Target::Ticks(_) | Target::UntilSet(_) => per_check,
        };
        for _ in 0..round {
            sink ^= pass();
        }
        passes += round;
        let now = timer.now();
        let done = match target {
            Target::Passes(total) => passes >= total,
            Target::Ticks(ticks) => now.saturating_sub(start) >= ticks,
            Target::UntilSet(flag) => flag.load(Ordering::Acquire),
        };
        if done {
            break now;
        }
    };

    let overhead_start = timer.now();
    let mut replayed = 0u64;
    while replayed < passes {
        let round = per_check.min(passes - replayed);
        for _ in 0..round {
            sink ^= dummy();
        }
        replayed += round;
        black_box(timer.now());
    }
    let overhead_end = timer.now();
    black_box(sink);

    Timing {
        passes,
        elapsed_ticks: end.saturating_sub(start),
        overhead_ticks: overhead_end.saturating_sub(overhead_start),
    }
}
