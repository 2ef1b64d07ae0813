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

//! Memory latency benchmark.
//!
//! The first worker chases a chain of dependent loads through its slice, so
//! each access waits for the previous one. Any further workers stream over
//! their own slices as background load until the chase is done.

use std::{
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use memprobe_time::Timer;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    config::{AccessPattern, ChunkSize, Operation, RunConfig, RunLength},
    error::{Error, Result},
    gate::{run_gated, StartGate, Ticket},
    kernels::{self, Word, W256, W512},
    measure::{passes_per_check, time_passes, Target, WARMUP_CHASE_STEPS},
    permutation::{link_random, link_sequential},
    record::{Repetition, WorkerResult},
    thread::Runnable,
    throughput::{
        self, Measured, ThroughputAggregation, ThroughputBenchmarkWorker, WorkerSettings,
        START_ABORTED,
    },
};

/// Chase steps between timer checks when a run is bounded by duration.
pub const LATENCY_BATCH_STEPS: u64 = 1 << 16;

fn chase<W: Word>(
    bytes: &mut [u8],
    settings: &WorkerSettings,
    timer: &dyn Timer,
    ticket: Ticket<'_>,
) -> std::result::Result<Measured, String> {
    let slots = throughput::words::<W>(bytes)?;
    if slots.is_empty() {
        return Err("empty working set".to_string());
    }
    match settings.pattern {
        AccessPattern::Sequential => link_sequential(slots, settings.stride),
        AccessPattern::Random => link_random(slots, &mut StdRng::seed_from_u64(settings.seed)),
    }

    let len = slots.len() as u64;
    // A counted pass is one full traversal of the chain.
    let (target, steps) = match settings.length {
        RunLength::Passes(passes) => (Target::Passes(passes.max(1)), len),
        RunLength::Duration(_) => {
            (Target::from_length(settings.length, timer), len.min(LATENCY_BATCH_STEPS))
        }
    };
    let width = mem::size_of::<W>() as u64;
    let per_check = passes_per_check((steps * width) as usize);
    let warmup_steps = len.min(WARMUP_CHASE_STEPS);
    let slot_count = slots.len();
    let dummy = || kernels::dummy_chase(slot_count, 0, steps) as u64;

    let timing = match settings.operation {
        Operation::Read => {
            let slots = &*slots;
            let mut position = kernels::chase_read(slots, 0, warmup_steps);
            if !ticket.wait() {
                return Err(START_ABORTED.to_string());
            }
            let pass = || {
                position = kernels::chase_read(slots, position, steps);
                position as u64
            };
            time_passes(timer, target, per_check, pass, dummy)
        }
        Operation::Write => {
            let mut position = kernels::chase_write(slots, 0, warmup_steps);
            if !ticket.wait() {
                return Err(START_ABORTED.to_string());
            }
            let pass = || {
                position = kernels::chase_write(slots, position, steps);
                position as u64
            };
            time_passes(timer, target, per_check, pass, dummy)
        }
        Operation::Copy => return Err("latency runs cannot copy".to_string()),
    };
    Ok(Measured { timing, accesses_per_pass: steps, bytes_per_pass: steps * width })
}

fn chase_chunks(
    bytes: &mut [u8],
    settings: &WorkerSettings,
    timer: &dyn Timer,
    ticket: Ticket<'_>,
) -> std::result::Result<Measured, String> {
    match settings.chunk {
        ChunkSize::Bits64 => chase::<u64>(bytes, settings, timer, ticket),
        ChunkSize::Bits128 => chase::<u128>(bytes, settings, timer, ticket),
        ChunkSize::Bits256 => chase::<W256>(bytes, settings, timer, ticket),
        ChunkSize::Bits512 => chase::<W512>(bytes, settings, timer, ticket),
        narrow => Err(format!("pointer chasing needs chunks of at least 64 bits, got {narrow}")),
    }
}

/// Raises the flag when dropped, unwinding included.
struct RaiseOnDrop<'a>(Option<&'a AtomicBool>);

impl Drop for RaiseOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(flag) = self.0 {
            flag.store(true, Ordering::Release);
        }
    }
}

/// The worker whose accesses are timed in a latency run.
pub struct LatencyWorker<'a> {
    slice: &'a mut [u8],
    settings: WorkerSettings,
    timer: &'a dyn Timer,
    gate: &'a StartGate,
    done: Option<&'a AtomicBool>,
    result: Option<WorkerResult>,
}

impl<'a> LatencyWorker<'a> {
    pub fn new(
        slice: &'a mut [u8],
        settings: WorkerSettings,
        timer: &'a dyn Timer,
        gate: &'a StartGate,
    ) -> Self {
        Self { slice, settings, timer, gate, done: None, result: None }
    }

    /// Sets `flag` once the worker has finished, whether it measured or not.
    pub fn signal_done(mut self, flag: &'a AtomicBool) -> Self {
        self.done = Some(flag);
        self
    }

    pub fn into_result(self) -> WorkerResult {
        self.result.unwrap_or_else(|| WorkerResult::failed(0, "worker did not run"))
    }
}

impl Runnable for LatencyWorker<'_> {
    fn run(&mut self) {
        let _done = RaiseOnDrop(self.done);
        let ticket = self.gate.ticket();
        let outcome = throughput::pin(self.settings.cpu)
            .and_then(|()| chase_chunks(self.slice, &self.settings, self.timer, ticket));
        self.result = Some(match outcome {
            Ok(measured) => WorkerResult::measured(
                0,
                measured.timing,
                measured.accesses_per_pass,
                measured.bytes_per_pass,
                measured.timing.adjusted_duration(self.timer),
            ),
            Err(reason) => WorkerResult::failed(0, reason),
        });
    }
}

enum Role<'a> {
    Chase(LatencyWorker<'a>),
    Load(ThroughputBenchmarkWorker<'a>),
}

impl Runnable for Role<'_> {
    fn run(&mut self) {
        match self {
            Self::Chase(worker) => worker.run(),
            Self::Load(worker) => worker.run(),
        }
    }
}

impl Role<'_> {
    fn into_result(self) -> WorkerResult {
        match self {
            Self::Chase(worker) => worker.into_result(),
            Self::Load(worker) => worker.into_result(),
        }
    }
}

/// Settings for a background load worker of a latency run: a sequential
/// read stream with the run's chunk width.
fn load_settings(config: &RunConfig, cpu: Option<usize>, seed: u64) -> WorkerSettings {
    WorkerSettings {
        pattern: AccessPattern::Sequential,
        operation: Operation::Read,
        stride: 1,
        ..WorkerSettings::from_config(config, cpu, seed)
    }
}

/// Nanoseconds per access of a measured chase.
pub fn nanos_per_access(result: &WorkerResult) -> Result<f64> {
    if let Some(reason) = &result.failure {
        return Err(Error::execution(format!("latency worker failed: {reason}")));
    }
    if result.accesses == 0 {
        return Err(Error::execution("latency worker performed no accesses"));
    }
    Ok(result.elapsed.as_nanos() as f64 / result.accesses as f64)
}

#[derive(Clone)]
pub struct LatencyBenchmark {
    timer: Arc<dyn Timer>,
    worker_stack_size: Option<usize>,
}

impl LatencyBenchmark {
    pub fn new(timer: Arc<dyn Timer>) -> Self {
        Self { timer, worker_stack_size: None }
    }

    pub fn with_worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = Some(bytes);
        self
    }

    /// Runs one repetition. The first slice is chased; the rest carry load.
    pub fn run_repetition(
        &self,
        config: &RunConfig,
        slices: Vec<&mut [u8]>,
        cpus: &[Option<usize>],
        seed: u64,
    ) -> Result<Repetition> {
        if slices.is_empty() {
            return Err(Error::execution("latency run needs at least one worker"));
        }
        let gate = StartGate::new(slices.len());
        let chase_done = AtomicBool::new(false);
        let timer: &dyn Timer = self.timer.as_ref();
        let roles = slices
            .into_iter()
            .enumerate()
            .map(|(index, slice)| {
                let cpu = cpus.get(index).copied().flatten();
                let seed = seed.wrapping_add(index as u64);
                let role = if index == 0 {
                    let settings = WorkerSettings::from_config(config, cpu, seed);
                    let worker = LatencyWorker::new(slice, settings, timer, &gate);
                    Role::Chase(worker.signal_done(&chase_done))
                } else {
                    let settings = load_settings(config, cpu, seed);
                    let worker = ThroughputBenchmarkWorker::new(index, slice, settings, timer, &gate);
                    Role::Load(worker.until(&chase_done))
                };
                (format!("{}-{index}", config.name), role)
            })
            .collect();

        let workers: Vec<WorkerResult> =
            run_gated(&gate, roles, self.worker_stack_size)?.into_iter().map(Role::into_result).collect();
        let metric = nanos_per_access(&workers[0])?;
        let load_mib_per_second = match &workers[1..] {
            [] => None,
            load => Some(ThroughputAggregation::SlowestWorker.aggregate(load)?),
        };
        Ok(Repetition { metric, elapsed: workers[0].elapsed, workers, load_mib_per_second })
    }
}
