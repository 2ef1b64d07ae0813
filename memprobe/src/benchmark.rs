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

//! Turns a [`RunConfig`] into a [`MeasurementRecord`].

use std::sync::Arc;

use log::debug;
use memprobe_time::Timer;

use crate::{
    config::{AccessPattern, BenchmarkKind, Operation, RunConfig, RunLength},
    error::{Error, Result},
    latency::LatencyBenchmark,
    record::MeasurementRecord,
    region::MemoryRegion,
    throughput::{ThroughputAggregation, ThroughputBenchmark},
    topology::NodeTopology,
};

/// Rejects configurations no benchmark can run.
pub fn validate(config: &RunConfig) -> Result<()> {
    let invalid =
        |reason: String| -> Result<()> { Err(Error::execution(format!("{}: {reason}", config.name))) };
    if config.workers == 0 {
        return invalid("run needs at least one worker".to_string());
    }
    if config.stride == 0 {
        return invalid("stride must not be zero".to_string());
    }
    if config.repetitions == 0 {
        return invalid("run needs at least one repetition".to_string());
    }
    match config.length {
        RunLength::Duration(duration) if duration.is_zero() => {
            return invalid("duration must not be zero".to_string());
        }
        RunLength::Passes(0) => return invalid("run needs at least one pass".to_string()),
        _ => {}
    }
    let chases = config.kind == BenchmarkKind::Latency || config.pattern == AccessPattern::Random;
    if chases && !config.chunk.holds_pointer() {
        return invalid(format!("{} chunks cannot hold chain links", config.chunk));
    }
    if chases && config.operation == Operation::Copy {
        return invalid("pointer-chasing runs cannot copy".to_string());
    }
    Ok(())
}

/// Bytes each worker gets: the requested working set, or an equal share of
/// the region rounded down to whole chunks.
pub fn worker_share(region_len: usize, config: &RunConfig) -> Result<usize> {
    if config.workers == 0 {
        return Err(Error::execution("run needs at least one worker"));
    }
    // Copies split their share into equal source and destination halves.
    let granule = match config.operation {
        Operation::Copy => 2 * config.chunk.bytes(),
        Operation::Read | Operation::Write => config.chunk.bytes(),
    };
    match config.working_set_per_worker {
        Some(bytes) => {
            if bytes == 0 || bytes % granule != 0 {
                return Err(Error::execution(format!(
                    "working set of {bytes} bytes is not a positive multiple of {granule}"
                )));
            }
            let needed = bytes.checked_mul(config.workers);
            if needed.is_none_or(|needed| needed > region_len) {
                return Err(Error::execution(format!(
                    "{} workers of {bytes} bytes do not fit in a {region_len} byte region",
                    config.workers
                )));
            }
            Ok(bytes)
        }
        None => {
            let share = region_len / config.workers / granule * granule;
            if share == 0 {
                return Err(Error::execution(format!(
                    "{region_len} byte region is too small for {} workers",
                    config.workers
                )));
            }
            Ok(share)
        }
    }
}

/// A runnable benchmark of either kind.
#[derive(Clone)]
pub enum Benchmark {
    Latency(LatencyBenchmark),
    Throughput(ThroughputBenchmark),
}

impl Benchmark {
    pub fn for_kind(kind: BenchmarkKind, timer: Arc<dyn Timer>) -> Self {
        match kind {
            BenchmarkKind::Latency => Self::Latency(LatencyBenchmark::new(timer)),
            BenchmarkKind::Throughput => Self::Throughput(ThroughputBenchmark::new(timer)),
        }
    }

    pub fn with_aggregation(self, aggregation: ThroughputAggregation) -> Self {
        match self {
            Self::Throughput(benchmark) => Self::Throughput(benchmark.with_aggregation(aggregation)),
            latency => latency,
        }
    }

    /// Stack size for every worker thread the benchmark spawns.
    pub fn with_worker_stack_size(self, bytes: usize) -> Self {
        match self {
            Self::Latency(benchmark) => Self::Latency(benchmark.with_worker_stack_size(bytes)),
            Self::Throughput(benchmark) => Self::Throughput(benchmark.with_worker_stack_size(bytes)),
        }
    }

    pub fn kind(&self) -> BenchmarkKind {
        match self {
            Self::Latency(_) => BenchmarkKind::Latency,
            Self::Throughput(_) => BenchmarkKind::Throughput,
        }
    }

    /// Runs every repetition of `config` over the front of `region`.
    pub fn run(
        &self,
        region: &mut MemoryRegion,
        config: &RunConfig,
        seed: u64,
    ) -> Result<MeasurementRecord> {
        if config.kind != self.kind() {
            return Err(Error::execution(format!(
                "{}: {:?} run given to a {:?} benchmark",
                config.name,
                config.kind,
                self.kind()
            )));
        }
        validate(config)?;
        let share = worker_share(region.len(), config)?;
        let cpus = config.affinity.resolve(config.workers, &NodeTopology::default())?;

        let mut repetitions = Vec::with_capacity(config.repetitions as usize);
        for repetition in 0..config.repetitions {
            let seed = seed.wrapping_add(u64::from(repetition) << 32);
            let slices: Vec<&mut [u8]> =
                region.as_mut_slice()[..share * config.workers].chunks_exact_mut(share).collect();
            let measured = match self {
                Self::Latency(benchmark) => benchmark.run_repetition(config, slices, &cpus, seed)?,
                Self::Throughput(benchmark) => benchmark.run_repetition(config, slices, &cpus, seed)?,
            };
            debug!(
                "{} repetition {}/{}: {:.3}",
                config.name,
                repetition + 1,
                config.repetitions,
                measured.metric
            );
            repetitions.push(measured);
        }
        MeasurementRecord::new(config, repetitions)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use googletest::prelude::*;
    use memprobe_time::MonotonicTimer;

    use super::*;
    use crate::config::ChunkSize;

    fn timer() -> Arc<dyn Timer> {
        Arc::new(MonotonicTimer::new().expect("monotonic clock"))
    }

    #[googletest::test]
    fn invalid_combinations_are_rejected() {
        let cases = [
            RunConfig { workers: 0, ..RunConfig::throughput("a") },
            RunConfig { stride: 0, ..RunConfig::throughput("b") },
            RunConfig { repetitions: 0, ..RunConfig::throughput("c") },
            RunConfig { length: RunLength::Duration(Duration::ZERO), ..RunConfig::throughput("d") },
            RunConfig { chunk: ChunkSize::Bits32, ..RunConfig::latency("e") },
            RunConfig { operation: Operation::Copy, ..RunConfig::latency("f") },
            RunConfig {
                pattern: AccessPattern::Random,
                operation: Operation::Copy,
                ..RunConfig::throughput("g")
            },
        ];
        for config in &cases {
            expect_that!(validate(config), err(matches_pattern!(Error::BenchmarkExecutionFailure { .. })));
        }
        expect_that!(validate(&RunConfig { stride: -8, ..RunConfig::throughput("h") }), ok(anything()));
    }

    #[googletest::test]
    fn equal_shares_round_down_to_whole_chunks() {
        let config = RunConfig { workers: 3, chunk: ChunkSize::Bits512, ..RunConfig::throughput("bw") };
        expect_that!(worker_share(1 << 20, &config), ok(eq(&349_504)));
        let copy = RunConfig { operation: Operation::Copy, ..config };
        expect_that!(worker_share(1 << 20, &copy), ok(eq(&349_440)));
        let crowded = RunConfig { workers: 100, ..RunConfig::throughput("bw") };
        expect_that!(
            worker_share(512, &crowded),
            err(matches_pattern!(Error::BenchmarkExecutionFailure { .. }))
        );
    }

    #[googletest::test]
    fn explicit_working_sets_must_fit() {
        let config =
            RunConfig { workers: 4, working_set_per_worker: Some(4096), ..RunConfig::throughput("bw") };
        expect_that!(worker_share(16_384, &config), ok(eq(&4096)));
        expect_that!(
            worker_share(16_383, &config),
            err(matches_pattern!(Error::BenchmarkExecutionFailure { .. }))
        );
        let ragged = RunConfig { working_set_per_worker: Some(4100), ..config };
        expect_that!(
            worker_share(1 << 20, &ragged),
            err(matches_pattern!(Error::BenchmarkExecutionFailure { .. }))
        );
    }

    #[googletest::test]
    fn runs_every_repetition() {
        let mut region = MemoryRegion::allocate(1 << 20, None).expect("region");
        region.prime(3);
        let config = RunConfig {
            workers: 2,
            repetitions: 3,
            length: RunLength::Passes(2),
            ..RunConfig::throughput("bw")
        };
        let record = Benchmark::for_kind(BenchmarkKind::Throughput, timer())
            .run(&mut region, &config, 11)
            .expect("record");
        expect_that!(record.repetitions().len(), eq(3));
        expect_that!(record.summary().count, eq(3));
        expect_that!(record.worker_results().len(), eq(2));
        expect_that!(record.metric(), gt(0.0));
    }

    #[googletest::test]
    fn kind_mismatch_is_an_error() {
        let mut region = MemoryRegion::allocate(1 << 16, None).expect("region");
        let result = Benchmark::for_kind(BenchmarkKind::Throughput, timer()).run(
            &mut region,
            &RunConfig::latency("lat"),
            1,
        );
        expect_that!(result, err(matches_pattern!(Error::BenchmarkExecutionFailure { .. })));
    }
}
