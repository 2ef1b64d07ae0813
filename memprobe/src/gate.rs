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

//! A start gate that releases a group of workers together.
//!
//! Unlike `std::sync::Barrier`, the gate can be aborted: if the coordinator
//! fails to spawn one of the workers, the ones already waiting are woken and
//! told not to start measuring.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::{
    error::Result,
    thread::{Runnable, ThreadBuilder},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Open,
    Aborted,
}

#[derive(Debug)]
struct GateState {
    arrived: usize,
    phase: Phase,
}

#[derive(Debug)]
pub struct StartGate {
    expected: usize,
    state: Mutex<GateState>,
    changed: Condvar,
}

impl StartGate {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            state: Mutex::new(GateState { arrived: 0, phase: Phase::Waiting }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A worker's place at the gate. Dropping an unused ticket counts as
    /// arriving, so a worker that fails early never holds the others up.
    pub fn ticket(&self) -> Ticket<'_> {
        Ticket { gate: self, used: false }
    }

    fn arrive(&self) -> MutexGuard<'_, GateState> {
        let mut state = self.lock();
        state.arrived += 1;
        self.changed.notify_all();
        state
    }

    /// Blocks until every expected worker has arrived or the gate was aborted.
    pub fn wait_for_arrivals(&self) {
        let state = self.lock();
        let _state = self
            .changed
            .wait_while(state, |state| {
                state.arrived < self.expected && state.phase == Phase::Waiting
            })
            .unwrap_or_else(PoisonError::into_inner);
    }

    pub fn open(&self) {
        self.set_phase(Phase::Open);
    }

    pub fn abort(&self) {
        self.set_phase(Phase::Aborted);
    }

    fn set_phase(&self, phase: Phase) {
        let mut state = self.lock();
        if state.phase == Phase::Waiting {
            state.phase = phase;
        }
        self.changed.notify_all();
    }
}

pub struct Ticket<'g> {
    gate: &'g StartGate,
    used: bool,
}

impl Ticket<'_> {
    /// Arrives and blocks until the gate opens. Returns `false` if it was
    /// aborted instead.
    pub fn wait(mut self) -> bool {
        self.used = true;
        let state = self.gate.arrive();
        let state = self
            .gate
            .changed
            .wait_while(state, |state| state.phase == Phase::Waiting)
            .unwrap_or_else(PoisonError::into_inner);
        state.phase == Phase::Open
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if !self.used {
            drop(self.gate.arrive());
        }
    }
}

/// Spawns every worker on its own scoped thread, releases them through `gate`
/// once all have arrived, and joins them in order.
///
/// If a spawn fails the gate is aborted, the workers already started are
/// joined, and the spawn error is returned.
pub fn run_gated<R: Runnable>(
    gate: &StartGate,
    workers: Vec<(String, R)>,
    stack_size: Option<usize>,
) -> Result<Vec<R>> {
    std::thread::scope(|scope| {
        let mut threads = Vec::with_capacity(workers.len());
        let mut failure = None;
        for (name, worker) in workers {
            let builder = ThreadBuilder::new(name);
            let builder = match stack_size {
                Some(bytes) => builder.stack_size(bytes),
                None => builder,
            };
            match builder.spawn_scoped(scope, worker) {
                Ok(thread) => threads.push(thread),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if failure.is_some() {
            gate.abort();
        } else {
            gate.wait_for_arrivals();
            gate.open();
        }

        let joined: Vec<_> = threads.into_iter().map(|thread| thread.join()).collect();
        match failure {
            Some(err) => Err(err),
            None => joined.into_iter().collect(),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use googletest::prelude::*;

    use super::*;
    use crate::error::Error;

    struct Racer<'a> {
        gate: &'a StartGate,
        released: &'a AtomicUsize,
        arrived_before_release: usize,
        started: Option<bool>,
    }

    impl Runnable for Racer<'_> {
        fn run(&mut self) {
            let ticket = self.gate.ticket();
            let opened = ticket.wait();
            self.arrived_before_release = self.released.fetch_add(1, Ordering::SeqCst);
            self.started = Some(opened);
        }
    }

    #[googletest::test]
    fn releases_all_workers_after_everyone_arrives() {
        let gate = StartGate::new(4);
        let released = AtomicUsize::new(0);
        let workers = (0..4)
            .map(|index| {
                let racer =
                    Racer { gate: &gate, released: &released, arrived_before_release: 0, started: None };
                (format!("racer-{index}"), racer)
            })
            .collect();

        let finished = run_gated(&gate, workers, None).expect("all workers ran");
        assert_that!(finished.len(), eq(4));
        for racer in &finished {
            expect_that!(racer.started, some(eq(true)));
        }
        let order: usize = finished.iter().map(|racer| racer.arrived_before_release).sum();
        expect_that!(order, eq(1 + 2 + 3));
        expect_that!(released.load(Ordering::SeqCst), eq(4));
    }

    #[googletest::test]
    fn dropped_ticket_counts_as_arrival() {
        let gate = StartGate::new(2);
        std::thread::scope(|scope| {
            scope.spawn(|| drop(gate.ticket()));
            let waiter = scope.spawn(|| gate.ticket().wait());
            gate.wait_for_arrivals();
            gate.open();
            assert_that!(waiter.join().expect("waiter"), eq(true));
        });
    }

    #[googletest::test]
    fn abort_wakes_waiting_workers() {
        let gate = StartGate::new(3);
        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| gate.ticket().wait());
            std::thread::sleep(Duration::from_millis(10));
            gate.abort();
            assert_that!(waiter.join().expect("waiter"), eq(false));
        });
        // Opening after an abort does not revive the gate.
        gate.open();
        assert_that!(gate.ticket().wait(), eq(false));
    }

    #[cfg(target_os = "linux")]
    #[googletest::test]
    fn spawn_failure_aborts_the_gate() {
        let gate = StartGate::new(2);
        let released = AtomicUsize::new(0);
        let workers = (0..2)
            .map(|index| {
                let racer =
                    Racer { gate: &gate, released: &released, arrived_before_release: 0, started: None };
                (format!("racer-{index}"), racer)
            })
            .collect();

        let result = run_gated(&gate, workers, Some(1 << 62));
        assert_that!(result.map(|_| ()), err(matches_pattern!(Error::ThreadSpawnFailure { .. })));
        expect_that!(released.load(Ordering::SeqCst), eq(0));
    }
}
