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

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::Timer;

/// A `Timer` whose counter only moves when told to.
///
/// Every call to [`Timer::now`] advances the counter by a fixed step (zero by
/// default), which makes timed loops terminate after a predictable number of
/// readings. This is primarily useful for testing components that depend on
/// the passage of time.
pub struct ManualTimer {
    ticks: AtomicU64,
    step: u64,
    ticks_per_second: u64,
}

impl ManualTimer {
    /// Creates a timer frozen at tick zero.
    pub fn new(ticks_per_second: u64) -> Self {
        Self::stepping(ticks_per_second, 0)
    }

    /// Creates a timer that advances by `step` ticks on every reading.
    pub fn stepping(ticks_per_second: u64, step: u64) -> Self {
        Self { ticks: AtomicU64::new(0), step, ticks_per_second }
    }

    /// Moves the counter forward by `ticks`.
    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }
}

impl Timer for ManualTimer {
    fn now(&self) -> u64 {
        self.ticks.fetch_add(self.step, Ordering::SeqCst)
    }

    fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }

    fn resolution(&self) -> Duration {
        Duration::from_nanos(self.ticks_to_nanos(1).max(1))
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[googletest::test]
    fn frozen_until_advanced() {
        let timer = ManualTimer::new(1_000);
        assert_that!(timer.now(), eq(0));
        assert_that!(timer.now(), eq(0));
        timer.advance(7);
        assert_that!(timer.now(), eq(7));
    }

    #[googletest::test]
    fn stepping_timer_moves_on_every_read() {
        let timer = ManualTimer::stepping(1_000, 3);
        let first = timer.now();
        let second = timer.now();
        assert_that!(second - first, eq(3));
        assert_that!(timer.resolution(), eq(Duration::from_millis(1)));
    }
}
