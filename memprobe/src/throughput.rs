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

//! Memory throughput benchmark.
//!
//! Each worker streams over its own slice of the region with one operation and
//! chunk width. Workers are released together through a [`StartGate`] and the
//! per-worker byte counts and times are combined into one MiB/s figure.

use std::{
    mem,
    sync::{atomic::AtomicBool, Arc},
};

use memprobe_time::Timer;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    config::{AccessPattern, ChunkSize, Operation, RunConfig, RunLength},
    error::{Error, Result},
    gate::{run_gated, StartGate, Ticket},
    kernels::{self, as_words_mut, Word, W256, W512},
    measure::{self, passes_per_check, time_passes, warm_up, Target, Timing},
    permutation::link_random,
    record::{Repetition, WorkerResult},
    thread::Runnable,
    topology::pin_current_thread,
    MIB,
};

pub(crate) const START_ABORTED: &str = "start aborted before measurement";

/// Parameters a worker needs, copied out of the run configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub pattern: AccessPattern,
    pub operation: Operation,
    pub chunk: ChunkSize,
    pub stride: isize,
    pub length: RunLength,
    pub cpu: Option<usize>,
    pub seed: u64,
}

impl WorkerSettings {
    pub fn from_config(config: &RunConfig, cpu: Option<usize>, seed: u64) -> Self {
        Self {
            pattern: config.pattern,
            operation: config.operation,
            chunk: config.chunk,
            stride: config.stride as isize,
            length: config.length,
            cpu,
            seed,
        }
    }
}

/// What a measured section did, before it is turned into a [`WorkerResult`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Measured {
    pub timing: Timing,
    pub accesses_per_pass: u64,
    pub bytes_per_pass: u64,
}

pub(crate) fn pin(cpu: Option<usize>) -> std::result::Result<(), String> {
    match cpu {
        Some(cpu) => pin_current_thread(cpu).map_err(|err| format!("cannot pin to CPU {cpu}: {err}")),
        None => Ok(()),
    }
}

pub(crate) fn words<W: Word>(bytes: &mut [u8]) -> std::result::Result<&mut [W], String> {
    let len = bytes.len();
    as_words_mut::<W>(bytes).ok_or_else(|| {
        format!("working set of {len} bytes is not whole aligned {}-byte chunks", mem::size_of::<W>())
    })
}

/// Streams over `bytes` with the access widths of `W` until `target` is met.
fn stream<W: Word>(
    bytes: &mut [u8],
    settings: &WorkerSettings,
    target: Target<'_>,
    timer: &dyn Timer,
    ticket: Ticket<'_>,
) -> std::result::Result<Measured, String> {
    let words = words::<W>(bytes)?;
    let stride = settings.stride;
    let width = mem::size_of::<W>() as u64;

    match (settings.pattern, settings.operation) {
        (AccessPattern::Sequential, Operation::Read) => {
            let len = words.len();
            let words = &*words;
            let accesses = kernels::accesses_per_pass(len, stride) as u64;
            let mut pass = || kernels::read_pass(words, stride);
            warm_up(&mut pass);
            if !ticket.wait() {
                return Err(START_ABORTED.to_string());
            }
            let per_check = passes_per_check((accesses * width) as usize);
            let timing =
                time_passes(timer, target, per_check, pass, || kernels::dummy_pass(len, stride));
            Ok(Measured { timing, accesses_per_pass: accesses, bytes_per_pass: accesses * width })
        }
        (AccessPattern::Sequential, Operation::Write) => {
            let len = words.len();
            let value = W::from_u64(settings.seed);
            let accesses = kernels::accesses_per_pass(len, stride) as u64;
            let mut pass = || kernels::write_pass(words, stride, value);
            warm_up(&mut pass);
            if !ticket.wait() {
                return Err(START_ABORTED.to_string());
            }
            let per_check = passes_per_check((accesses * width) as usize);
            let timing =
                time_passes(timer, target, per_check, pass, || kernels::dummy_pass(len, stride));
            Ok(Measured { timing, accesses_per_pass: accesses, bytes_per_pass: accesses * width })
        }
        (AccessPattern::Sequential, Operation::Copy) => {
            let half = words.len() / 2;
            if half == 0 {
                return Err("working set too small to copy".to_string());
            }
            let (src, dst) = words.split_at_mut(half);
            let src = &src[..half];
            let dst = &mut dst[..half];
            let accesses = kernels::accesses_per_pass(half, stride) as u64;
            // Every access reads one chunk and writes one chunk.
            let bytes = 2 * accesses * width;
            let mut pass = || kernels::copy_pass(src, dst, stride);
            warm_up(&mut pass);
            if !ticket.wait() {
                return Err(START_ABORTED.to_string());
            }
            let timing = time_passes(timer, target, passes_per_check(bytes as usize), pass, || {
                kernels::dummy_pass(half, stride)
            });
            Ok(Measured { timing, accesses_per_pass: accesses, bytes_per_pass: bytes })
        }
        (AccessPattern::Random, Operation::Copy) => {
            Err("random copy is not a supported combination".to_string())
        }
        (AccessPattern::Random, operation) => {
            if !settings.chunk.holds_pointer() {
                return Err(format!("random access needs chunks of at least 64 bits, got {}", settings.chunk));
            }
            let len = words.len();
            if len == 0 {
                return Err("empty working set".to_string());
            }
            link_random(words, &mut StdRng::seed_from_u64(settings.seed));
            let steps = len as u64;
            let warmup_steps = steps.min(measure::WARMUP_CHASE_STEPS);
            let per_check = passes_per_check(len * width as usize);
            let dummy = || kernels::dummy_chase(len, 0, steps) as u64;
            let timing = if operation == Operation::Read {
                let words = &*words;
                let mut position = kernels::chase_read(words, 0, warmup_steps);
                if !ticket.wait() {
                    return Err(START_ABORTED.to_string());
                }
                let pass = || {
                    position = kernels::chase_read(words, position, steps);
                    position as u64
                };
                time_passes(timer, target, per_check, pass, dummy)
            } else {
                let mut position = kernels::chase_write(words, 0, warmup_steps);
                if !ticket.wait() {
                    return Err(START_ABORTED.to_string());
                }
                let pass = || {
                    position = kernels::chase_write(words, position, steps);
                    position as u64
                };
                time_passes(timer, target, per_check, pass, dummy)
            };
            Ok(Measured { timing, accesses_per_pass: steps, bytes_per_pass: steps * width })
        }
    }
}

/// Dispatches on the chunk width. With `until`, the worker streams until the
/// flag is set instead of for the configured length.
pub(crate) fn measure_chunks(
    bytes: &mut [u8],
    settings: &WorkerSettings,
    until: Option<&AtomicBool>,
    timer: &dyn Timer,
    ticket: Ticket<'_>,
) -> std::result::Result<Measured, String> {
    let target = match until {
        Some(flag) => Target::UntilSet(flag),
        None => Target::from_length(settings.length, timer),
    };
    match settings.chunk {
        ChunkSize::Bits8 => stream::<u8>(bytes, settings, target, timer, ticket),
        ChunkSize::Bits16 => stream::<u16>(bytes, settings, target, timer, ticket),
        ChunkSize::Bits32 => stream::<u32>(bytes, settings, target, timer, ticket),
        ChunkSize::Bits64 => stream::<u64>(bytes, settings, target, timer, ticket),
        ChunkSize::Bits128 => stream::<u128>(bytes, settings, target, timer, ticket),
        ChunkSize::Bits256 => stream::<W256>(bytes, settings, target, timer, ticket),
        ChunkSize::Bits512 => stream::<W512>(bytes, settings, target, timer, ticket),
    }
}

/// One throughput worker, bound to its slice for the duration of a
/// repetition.
pub struct ThroughputBenchmarkWorker<'a> {
    index: usize,
    slice: &'a mut [u8],
    settings: WorkerSettings,
    timer: &'a dyn Timer,
    gate: &'a StartGate,
    until: Option<&'a AtomicBool>,
    result: Option<WorkerResult>,
}

impl<'a> ThroughputBenchmarkWorker<'a> {
    pub fn new(
        index: usize,
        slice: &'a mut [u8],
        settings: WorkerSettings,
        timer: &'a dyn Timer,
        gate: &'a StartGate,
    ) -> Self {
        Self { index, slice, settings, timer, gate, until: None, result: None }
    }

    /// Streams until `flag` is set rather than for the configured length.
    pub fn until(mut self, flag: &'a AtomicBool) -> Self {
        self.until = Some(flag);
        self
    }

    /// The worker's outcome; a failure if it never ran.
    pub fn into_result(self) -> WorkerResult {
        self.result.unwrap_or_else(|| WorkerResult::failed(self.index, "worker did not run"))
    }
}

impl Runnable for ThroughputBenchmarkWorker<'_> {
    fn run(&mut self) {
        let ticket = self.gate.ticket();
        let outcome = pin(self.settings.cpu).and_then(|()| {
            measure_chunks(self.slice, &self.settings, self.until, self.timer, ticket)
        });
        self.result = Some(match outcome {
            Ok(measured) => WorkerResult::measured(
                self.index,
                measured.timing,
                measured.accesses_per_pass,
                measured.bytes_per_pass,
                measured.timing.adjusted_duration(self.timer),
            ),
            Err(reason) => WorkerResult::failed(self.index, reason),
        });
    }
}

/// How per-worker measurements combine into one throughput figure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThroughputAggregation {
    /// Total bytes over the longest worker time.
    #[default]
    SlowestWorker,
    /// Total bytes over the mean worker time.
    MeanElapsed,
    /// Sum of each worker's own rate.
    SumOfWorkerRates,
}

pub const DEFAULT_AGGREGATION: ThroughputAggregation = ThroughputAggregation::SlowestWorker;

impl ThroughputAggregation {
    /// Combined throughput in MiB/s. Fails if any worker failed or measured no
    /// time.
    pub fn aggregate(self, workers: &[WorkerResult]) -> Result<f64> {
        if workers.is_empty() {
            return Err(Error::execution("no worker results to aggregate"));
        }
        let mut seconds = Vec::with_capacity(workers.len());
        for worker in workers {
            if let Some(reason) = &worker.failure {
                return Err(Error::execution(format!("worker {} failed: {reason}", worker.index)));
            }
            let elapsed = worker.elapsed.as_secs_f64();
            if elapsed <= 0.0 {
                return Err(Error::execution(format!(
                    "worker {} measured no elapsed time",
                    worker.index
                )));
            }
            seconds.push(elapsed);
        }

        let mib = MIB as f64;
        let total_mib = workers.iter().map(|worker| worker.bytes_moved as f64).sum::<f64>() / mib;
        let rate = match self {
            Self::SlowestWorker => total_mib / seconds.iter().copied().fold(0.0, f64::max),
            Self::MeanElapsed => total_mib / (seconds.iter().sum::<f64>() / seconds.len() as f64),
            Self::SumOfWorkerRates => workers
                .iter()
                .zip(&seconds)
                .map(|(worker, seconds)| worker.bytes_moved as f64 / mib / seconds)
                .sum(),
        };
        Ok(rate)
    }
}

/// Runs throughput repetitions over pre-partitioned worker slices.
#[derive(Clone)]
pub struct ThroughputBenchmark {
    timer: Arc<dyn Timer>,
    aggregation: ThroughputAggregation,
    worker_stack_size: Option<usize>,
}

impl ThroughputBenchmark {
    pub fn new(timer: Arc<dyn Timer>) -> Self {
        Self { timer, aggregation: DEFAULT_AGGREGATION, worker_stack_size: None }
    }

    pub fn with_aggregation(mut self, aggregation: ThroughputAggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = Some(bytes);
        self
    }

    /// Runs one repetition with one worker per slice.
    pub fn run_repetition(
        &self,
        config: &RunConfig,
        slices: Vec<&mut [u8]>,
        cpus: &[Option<usize>],
        seed: u64,
    ) -> Result<Repetition> {
        let workers = self.run_workers(config, slices, cpus, seed)?;
        let metric = self.aggregation.aggregate(&workers)?;
        let elapsed = workers.iter().map(|worker| worker.elapsed).max().unwrap_or_default();
        Ok(Repetition { metric, elapsed, workers, load_mib_per_second: None })
    }

    /// Runs the workers and returns their raw results, failed ones included.
    pub(crate) fn run_workers(
        &self,
        config: &RunConfig,
        slices: Vec<&mut [u8]>,
        cpus: &[Option<usize>],
        seed: u64,
    ) -> Result<Vec<WorkerResult>> {
        let gate = StartGate::new(slices.len());
        let timer: &dyn Timer = self.timer.as_ref();
        let workers = slices
            .into_iter()
            .enumerate()
            .map(|(index, slice)| {
                let cpu = cpus.get(index).copied().flatten();
                let settings = WorkerSettings::from_config(config, cpu, seed.wrapping_add(index as u64));
                let worker = ThroughputBenchmarkWorker::new(index, slice, settings, timer, &gate);
                (format!("{}-{index}", config.name), worker)
            })
            .collect();
        let finished = run_gated(&gate, workers, self.worker_stack_size)?;
        Ok(finished.into_iter().map(ThroughputBenchmarkWorker::into_result).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use googletest::prelude::*;
    use memprobe_time::{ManualTimer, MonotonicTimer};

    use super::*;

    fn worker(index: usize, bytes_moved: u64, elapsed_ms: u64) -> WorkerResult {
        WorkerResult {
            index,
            bytes_moved,
            accesses: bytes_moved / 8,
            passes: 1,
            elapsed_ticks: elapsed_ms,
            overhead_ticks: 0,
            elapsed: Duration::from_millis(elapsed_ms),
            warning: false,
            failure: None,
        }
    }

    fn run(
        config: &RunConfig,
        bytes: &mut [u8],
        workers: usize,
    ) -> crate::error::Result<Vec<WorkerResult>> {
        let timer: Arc<dyn Timer> = Arc::new(MonotonicTimer::new().expect("monotonic clock"));
        let share = bytes.len() / workers;
        let slices: Vec<&mut [u8]> = bytes.chunks_exact_mut(share).collect();
        ThroughputBenchmark::new(timer).run_workers(config, slices, &[], 1)
    }

    fn aligned(len: usize) -> Vec<u64> {
        vec![0u64; len / 8]
    }

    fn as_bytes(words: &mut [u64]) -> &mut [u8] {
        let len = words.len() * 8;
        // SAFETY: u64 has no padding; the view covers the same allocation.
        unsafe { core::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), len) }
    }

    #[googletest::test]
    fn slowest_worker_divides_total_bytes_by_longest_time() {
        let workers = [worker(0, 2 * MIB as u64, 1_000), worker(1, 2 * MIB as u64, 2_000)];
        let rate = |aggregation: ThroughputAggregation| {
            aggregation.aggregate(&workers).expect("aggregated")
        };
        expect_that!(rate(ThroughputAggregation::SlowestWorker), approx_eq(2.0));
        expect_that!(rate(ThroughputAggregation::MeanElapsed), approx_eq(4.0 / 1.5));
        expect_that!(rate(ThroughputAggregation::SumOfWorkerRates), approx_eq(3.0));
    }

    #[googletest::test]
    fn aggregation_rejects_failures_and_zero_time() {
        let failed = [worker(0, MIB as u64, 1_000), WorkerResult::failed(1, "pin")];
        expect_that!(
            DEFAULT_AGGREGATION.aggregate(&failed),
            err(matches_pattern!(Error::BenchmarkExecutionFailure { .. }))
        );
        expect_that!(
            DEFAULT_AGGREGATION.aggregate(&[worker(0, MIB as u64, 0)]),
            err(matches_pattern!(Error::BenchmarkExecutionFailure { .. }))
        );
        expect_that!(
            DEFAULT_AGGREGATION.aggregate(&[]),
            err(matches_pattern!(Error::BenchmarkExecutionFailure { .. }))
        );
    }

    #[googletest::test]
    fn sequential_read_counts_every_byte() {
        let config = RunConfig { length: RunLength::Passes(3), workers: 2, ..RunConfig::throughput("bw") };
        let mut backing = aligned(64 * 1024);
        let results = run(&config, as_bytes(&mut backing), 2).expect("workers ran");
        assert_that!(results.len(), eq(2));
        for result in &results {
            expect_that!(result.failure, none());
            expect_that!(result.passes, eq(3));
            expect_that!(result.bytes_moved, eq(3 * 32 * 1024));
            expect_that!(result.accesses, eq(3 * 4 * 1024));
        }
    }

    #[googletest::test]
    fn strided_write_moves_fewer_bytes() {
        let config = RunConfig {
            operation: Operation::Write,
            chunk: ChunkSize::Bits32,
            stride: -4,
            length: RunLength::Passes(2),
            ..RunConfig::throughput("bw")
        };
        let mut backing = aligned(4096);
        let results = run(&config, as_bytes(&mut backing), 1).expect("worker ran");
        expect_that!(results[0].accesses, eq(2 * 256));
        expect_that!(results[0].bytes_moved, eq(2 * 256 * 4));
    }

    #[googletest::test]
    fn copy_counts_read_and_write_traffic() {
        let config = RunConfig {
            operation: Operation::Copy,
            chunk: ChunkSize::Bits128,
            length: RunLength::Passes(1),
            ..RunConfig::throughput("bw")
        };
        let mut backing = aligned(8192);
        let results = run(&config, as_bytes(&mut backing), 1).expect("worker ran");
        expect_that!(results[0].bytes_moved, eq(8192));
    }

    #[googletest::test]
    fn random_read_traverses_the_whole_chain() {
        let config = RunConfig {
            pattern: AccessPattern::Random,
            chunk: ChunkSize::Bits512,
            length: RunLength::Passes(2),
            ..RunConfig::throughput("bw")
        };
        let mut backing = aligned(64 * 1024);
        let results = run(&config, as_bytes(&mut backing), 1).expect("worker ran");
        expect_that!(results[0].failure, none());
        expect_that!(results[0].accesses, eq(2 * 1024));
    }

    #[googletest::test]
    fn narrow_random_chunks_fail_the_worker() {
        let config = RunConfig {
            pattern: AccessPattern::Random,
            chunk: ChunkSize::Bits32,
            length: RunLength::Passes(1),
            ..RunConfig::throughput("bw")
        };
        let mut backing = aligned(4096);
        let results = run(&config, as_bytes(&mut backing), 1).expect("worker ran");
        expect_that!(results[0].succeeded(), eq(false));
    }

    #[googletest::test]
    fn manual_timer_drives_a_duration_run() {
        let timer: Arc<dyn Timer> = Arc::new(ManualTimer::stepping(1_000_000, 1_000));
        let config = RunConfig {
            length: RunLength::Duration(Duration::from_millis(5)),
            ..RunConfig::throughput("bw")
        };
        let mut backing = aligned(MIB);
        let repetition = ThroughputBenchmark::new(timer)
            .run_repetition(&config, vec![as_bytes(&mut backing)], &[], 3)
            .expect("repetition");
        // One pass per check; each check advances the timer by 1 ms.
        expect_that!(repetition.workers[0].passes, eq(5));
        expect_that!(repetition.metric, gt(0.0));
    }
}
