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

use std::time::Duration;

use log::{info, warn};

#[cfg(target_arch = "x86_64")]
use crate::TscTimer;
use crate::{MonotonicTimer, Timer, TimerError};

/// The best tick source available on this machine.
#[derive(Debug, Clone)]
pub enum PlatformTimer {
    #[cfg(target_arch = "x86_64")]
    Tsc(TscTimer),
    Monotonic(MonotonicTimer),
}

impl PlatformTimer {
    /// Prefers the invariant TSC and falls back to the OS monotonic clock.
    ///
    /// Returns `ClockUnavailable` only when neither source works.
    pub fn detect() -> Result<Self, TimerError> {
        if let Some(tsc) = Self::invariant_tsc() {
            return Ok(tsc);
        }
        let monotonic = MonotonicTimer::new()?;
        info!("using monotonic clock (resolution {:?})", monotonic.resolution());
        Ok(Self::Monotonic(monotonic))
    }

    #[cfg(target_arch = "x86_64")]
    fn invariant_tsc() -> Option<Self> {
        match TscTimer::new() {
            Ok(tsc) => {
                info!("using invariant TSC ({} ticks/s)", tsc.ticks_per_second());
                Some(Self::Tsc(tsc))
            }
            Err(err) => {
                warn!("{err}; falling back to the monotonic clock");
                None
            }
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn invariant_tsc() -> Option<Self> {
        None
    }
}

impl Timer for PlatformTimer {
    fn now(&self) -> u64 {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Tsc(timer) => timer.now(),
            Self::Monotonic(timer) => timer.now(),
        }
    }

    fn ticks_per_second(&self) -> u64 {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Tsc(timer) => timer.ticks_per_second(),
            Self::Monotonic(timer) => timer.ticks_per_second(),
        }
    }

    fn resolution(&self) -> Duration {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Tsc(timer) => timer.resolution(),
            Self::Monotonic(timer) => timer.resolution(),
        }
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[googletest::test]
    fn detects_a_working_timer() {
        let timer = PlatformTimer::detect().expect("some clock should be available");
        let start = timer.now();
        std::thread::sleep(Duration::from_millis(5));
        let end = timer.now();
        assert_that!(timer.elapsed_nanos(start, end), ge(4_000_000));
    }
}
