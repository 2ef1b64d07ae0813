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

//! Time-stamp counter timer.
//!
//! The TSC only makes a usable benchmark clock when it is invariant, i.e. it
//! ticks at a constant rate regardless of frequency scaling and sleep states.
//! Its rate is not architecturally exposed, so it is calibrated against the OS
//! monotonic clock when the timer is created.

use core::arch::x86_64::{__cpuid, _mm_lfence, _rdtsc};
use std::time::{Duration, Instant};

use log::debug;

use crate::{Timer, TimerError, NANOS_PER_SEC};

/// Default window over which the counter rate is calibrated.
pub const DEFAULT_CALIBRATION_WINDOW: Duration = Duration::from_millis(100);

const CPUID_MAX_EXTENDED_LEAF: u32 = 0x8000_0000;
const CPUID_ADVANCED_POWER_MANAGEMENT: u32 = 0x8000_0007;
const INVARIANT_TSC_BIT: u32 = 1 << 8;

/// Reads the TSC with load fences on both sides so that surrounding memory
/// accesses cannot be reordered across the reading.
#[inline]
pub fn read_tsc() -> u64 {
    // SAFETY: lfence and rdtsc are available on every x86_64 processor and
    // have no side effects beyond ordering.
    unsafe {
        _mm_lfence();
        let ticks = _rdtsc();
        _mm_lfence();
        ticks
    }
}

/// Whether the processor advertises an invariant TSC.
pub fn has_invariant_tsc() -> bool {
    let max_leaf = __cpuid(CPUID_MAX_EXTENDED_LEAF).eax;
    if max_leaf < CPUID_ADVANCED_POWER_MANAGEMENT {
        return false;
    }
    let leaf = __cpuid(CPUID_ADVANCED_POWER_MANAGEMENT);
    leaf.edx & INVARIANT_TSC_BIT != 0
}

#[derive(Debug, Clone, Copy)]
pub struct TscTimer {
    ticks_per_second: u64,
}

impl TscTimer {
    /// Creates a timer calibrated over [`DEFAULT_CALIBRATION_WINDOW`].
    pub fn new() -> Result<Self, TimerError> {
        Self::calibrate(DEFAULT_CALIBRATION_WINDOW)
    }

    /// Creates a timer calibrated by counting ticks across `window`.
    pub fn calibrate(window: Duration) -> Result<Self, TimerError> {
        if !has_invariant_tsc() {
            return Err(TimerError::ClockUnavailable {
                reason: "processor does not report an invariant TSC".to_string(),
            });
        }

        let wall_start = Instant::now();
        let tsc_start = read_tsc();
        std::thread::sleep(window);
        let tsc_end = read_tsc();
        let wall = wall_start.elapsed();

        let ticks = tsc_end.saturating_sub(tsc_start);
        if ticks == 0 || wall.is_zero() {
            return Err(TimerError::ClockUnavailable {
                reason: "TSC did not advance during calibration".to_string(),
            });
        }

        let ticks_per_second = (ticks as u128 * NANOS_PER_SEC / wall.as_nanos()) as u64;
        debug!("calibrated TSC at {ticks_per_second} ticks/s over {wall:?}");
        Ok(Self { ticks_per_second })
    }

    /// Creates a timer with a known counter rate, skipping calibration.
    pub fn with_frequency(ticks_per_second: u64) -> Self {
        Self { ticks_per_second }
    }
}

impl Timer for TscTimer {
    fn now(&self) -> u64 {
        read_tsc()
    }

    fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }

    fn resolution(&self) -> Duration {
        Duration::from_nanos(self.ticks_to_nanos(1).max(1))
    }
}
