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

//! Timer backed by the OS monotonic clock.

use std::time::{Duration, Instant};

use crate::{Timer, TimerError};

/// Nanosecond ticks measured from a process-local origin.
#[derive(Debug, Clone)]
pub struct MonotonicTimer {
    origin: Instant,
    resolution: Duration,
}

impl MonotonicTimer {
    pub fn new() -> Result<Self, TimerError> {
        let resolution = clock_resolution()?;
        Ok(Self { origin: Instant::now(), resolution })
    }
}

#[cfg(unix)]
fn clock_resolution() -> Result<Duration, TimerError> {
    use nix::time::{clock_getres, ClockId};

    let spec = clock_getres(ClockId::CLOCK_MONOTONIC)
        .map_err(|err| TimerError::ClockUnavailable { reason: format!("clock_getres: {err}") })?;
    let resolution = Duration::new(spec.tv_sec() as u64, spec.tv_nsec() as u32);
    if resolution.is_zero() {
        return Err(TimerError::ClockUnavailable {
            reason: "monotonic clock reports zero resolution".to_string(),
        });
    }
    Ok(resolution)
}

#[cfg(not(unix))]
fn clock_resolution() -> Result<Duration, TimerError> {
    Ok(Duration::from_nanos(1))
}

impl Timer for MonotonicTimer {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn ticks_per_second(&self) -> u64 {
        1_000_000_000
    }

    fn resolution(&self) -> Duration {
        self.resolution
    }
}
