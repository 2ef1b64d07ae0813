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

//! Executes a [`RunPlan`] entry by entry over one primed memory region per
//! memory node.

use std::sync::Arc;

use log::{info, warn};
use memprobe_time::{PlatformTimer, Timer};

use crate::{
    benchmark::Benchmark,
    config::{Placement, RunConfig, RunPlan},
    error::{Error, Result},
    power::{NativeDramPowerReader, PowerReader, PowerTrace},
    record::{MeasurementRecord, RunFailure, RunOutcome},
    region::MemoryRegion,
    throughput::{ThroughputAggregation, DEFAULT_AGGREGATION},
};

pub struct BenchmarkManager {
    plan: RunPlan,
    timer: Arc<dyn Timer>,
    regions: Vec<MemoryRegion>,
    readers: Vec<PowerReader>,
    seed: u64,
    aggregation: ThroughputAggregation,
}

impl BenchmarkManager {
    /// Detects the platform timer, allocates and primes the regions, and sets
    /// up one DRAM power reader per socket if the plan asks for power.
    pub fn new(plan: RunPlan) -> Result<Self> {
        let timer: Arc<dyn Timer> = Arc::new(PlatformTimer::detect()?);
        let readers = match plan.power_interval {
            Some(interval) => NativeDramPowerReader::for_all_sockets(interval, Arc::clone(&timer)),
            None => Vec::new(),
        };
        Self::with_timer(plan, timer, readers)
    }

    /// Like [`BenchmarkManager::new`], with an explicit timer and readers.
    pub fn with_timer(plan: RunPlan, timer: Arc<dyn Timer>, readers: Vec<PowerReader>) -> Result<Self> {
        let seed = match plan.seed {
            0 => timer.now() | 1,
            seed => seed,
        };
        let mut regions = Vec::new();
        for node in plan.region_nodes() {
            let mut region = if plan.large_pages {
                MemoryRegion::allocate_large(plan.region_size, node)?
            } else {
                MemoryRegion::allocate(plan.region_size, node)?
            };
            region.prime(seed);
            info!(
                "region of {} MiB ready{}{}",
                plan.region_size / crate::MIB,
                node.map(|node| format!(" on NUMA node {node}")).unwrap_or_default(),
                if region.uses_large_pages() { " on huge pages" } else { "" }
            );
            regions.push(region);
        }
        info!("seed {seed}, {} power reader(s)", readers.len());
        Ok(Self { plan, timer, regions, readers, seed, aggregation: DEFAULT_AGGREGATION })
    }

    pub fn with_aggregation(mut self, aggregation: ThroughputAggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn timer(&self) -> &Arc<dyn Timer> {
        &self.timer
    }

    /// Runs every entry once per placement, placements in order. A failing
    /// run becomes a [`RunOutcome::Failed`] and the plan continues; only
    /// plan-fatal errors are returned.
    pub fn run_all(&mut self) -> Result<Vec<RunOutcome>> {
        let entries = self.plan.entries.clone();
        let placements = self.plan.placements();
        let total = entries.len() * placements.len();
        let mut outcomes = Vec::with_capacity(total);
        for placement in placements {
            for entry in &entries {
                let index = outcomes.len();
                let config = placement.apply(entry);
                let label = match placement.describe() {
                    Some(nodes) => format!("{} ({nodes})", config.name),
                    None => config.name.clone(),
                };
                info!("[{}/{total}] {label}: {}", index + 1, config.describe());
                match self.run_entry(index, &config, placement) {
                    Ok(record) => {
                        info!("{label}: {:.3} {}", record.metric(), record.unit().symbol());
                        if record.warning() {
                            warn!("{label}: timing looked unreliable; the result may be inaccurate");
                        }
                        outcomes.push(RunOutcome::Completed(record.placed(placement)));
                    }
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        warn!("{label}: {err}");
                        let failure = RunFailure::new(index, &config, placement, &err);
                        outcomes.push(RunOutcome::Failed(failure));
                    }
                }
            }
        }
        Ok(outcomes)
    }

    fn run_entry(
        &mut self,
        index: usize,
        config: &RunConfig,
        placement: Placement,
    ) -> Result<MeasurementRecord> {
        let position = self
            .regions
            .iter()
            .position(|region| region.numa_node() == placement.memory_node)
            .ok_or_else(|| Error::execution("no region was allocated for the requested memory node"))?;

        let mut started = Vec::with_capacity(self.readers.len());
        for reader_position in 0..self.readers.len() {
            let reader = &mut self.readers[reader_position];
            match reader.start() {
                Ok(()) => started.push(reader_position),
                Err(err) if !err.is_fatal() => {
                    warn!("{err}; no power data from {} for this run", reader.name());
                }
                Err(err) => {
                    self.stop_readers(&started)?;
                    return Err(err);
                }
            }
        }

        let mut benchmark =
            Benchmark::for_kind(config.kind, Arc::clone(&self.timer)).with_aggregation(self.aggregation);
        if let Some(bytes) = self.plan.worker_stack_size {
            benchmark = benchmark.with_worker_stack_size(bytes);
        }
        let measured =
            benchmark.run(&mut self.regions[position], config, self.seed.wrapping_add(index as u64));
        let traces = self.stop_readers(&started)?;
        Ok(measured?.with_power(traces))
    }

    /// Stops the given readers, collects their traces and readies them for
    /// the next run. A reader that fails without a plan-fatal error only
    /// loses its trace.
    fn stop_readers(&mut self, started: &[usize]) -> Result<Vec<PowerTrace>> {
        let mut traces = Vec::with_capacity(started.len());
        for &position in started {
            let reader = &mut self.readers[position];
            let collected = reader.stop().and_then(|()| reader.trace());
            match collected {
                Ok(trace) => traces.push(trace),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!("{err}; dropping power data from {}", reader.name()),
            }
            reader.reset()?;
        }
        Ok(traces)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use googletest::prelude::*;
    use memprobe_time::MonotonicTimer;

    use super::*;
    use crate::{
        config::{BenchmarkKind, RunLength, WorkerAffinity},
        error::FailureKind,
        power::source::MockTelemetrySource,
    };

    fn timer() -> Arc<dyn Timer> {
        Arc::new(MonotonicTimer::new().expect("monotonic clock"))
    }

    fn plan(entries: Vec<RunConfig>) -> RunPlan {
        RunPlan { region_size: 1 << 20, seed: 5, entries, ..RunPlan::default() }
    }

    fn quick(name: &str) -> RunConfig {
        RunConfig { length: RunLength::Passes(2), ..RunConfig::throughput(name) }
    }

    #[googletest::test]
    fn failing_entry_does_not_stop_the_plan() {
        let entries = vec![RunConfig { workers: 0, ..quick("empty") }, quick("one")];
        let mut manager = BenchmarkManager::with_timer(plan(entries), timer(), Vec::new()).expect("manager");
        let outcomes = manager.run_all().expect("plan ran");
        assert_that!(outcomes.len(), eq(2));
        let failure = outcomes[0].failure().expect("first entry failed");
        expect_that!(failure.kind, eq(FailureKind::BenchmarkExecutionFailure));
        expect_that!(failure.index, eq(0));
        expect_that!(outcomes[1].record().map(|record| record.kind()), some(eq(BenchmarkKind::Throughput)));
    }

    #[googletest::test]
    fn zero_seed_is_derived_from_the_timer() {
        let unseeded = RunPlan { seed: 0, ..plan(Vec::new()) };
        let manager = BenchmarkManager::with_timer(unseeded, timer(), Vec::new()).expect("manager");
        expect_that!(manager.seed(), ne(0));
    }

    #[googletest::test]
    fn unavailable_telemetry_is_skipped() {
        let mut source = MockTelemetrySource::new();
        source.expect_name().return_const("dram-socket0".to_string());
        source.expect_open().returning(|| {
            Err(Error::TelemetryUnavailable {
                source_name: "dram-socket0".to_string(),
                reason: "no RAPL".to_string(),
            })
        });
        let reader = PowerReader::new(Box::new(source), Duration::from_millis(5), timer());
        let mut manager =
            BenchmarkManager::with_timer(plan(vec![quick("bw")]), timer(), vec![reader]).expect("manager");
        let outcomes = manager.run_all().expect("plan ran");
        let record = outcomes[0].record().expect("run completed");
        expect_that!(record.power_traces().len(), eq(0));
    }

    #[googletest::test]
    fn power_traces_are_attached_to_each_record() {
        let mut source = MockTelemetrySource::new();
        source.expect_name().return_const("dram-socket0".to_string());
        source.expect_open().returning(|| Ok(()));
        source.expect_read_watts().returning(|| Ok(2.5));
        let reader = PowerReader::new(Box::new(source), Duration::from_millis(1), timer());
        let entries = vec![
            RunConfig { length: RunLength::Duration(Duration::from_millis(20)), ..quick("a") },
            RunConfig { length: RunLength::Duration(Duration::from_millis(20)), ..quick("b") },
        ];
        let mut manager = BenchmarkManager::with_timer(plan(entries), timer(), vec![reader]).expect("manager");
        let outcomes = manager.run_all().expect("plan ran");
        for outcome in &outcomes {
            let record = outcome.record().expect("run completed");
            assert_that!(record.power_traces().len(), eq(1));
            expect_that!(record.power_traces()[0].samples.len(), ge(1));
            expect_that!(record.power_traces()[0].mean_watts(), some(approx_eq(2.5)));
        }
    }

    #[cfg(target_os = "linux")]
    #[googletest::test]
    fn refused_sampling_thread_leaves_the_run_without_power() {
        let mut source = MockTelemetrySource::new();
        source.expect_name().return_const("dram-socket0".to_string());
        source.expect_open().returning(|| Ok(()));
        source.expect_read_watts().returning(|| Ok(1.0));
        let reader =
            PowerReader::new(Box::new(source), Duration::from_millis(1), timer()).with_stack_size(1 << 62);
        let mut manager =
            BenchmarkManager::with_timer(plan(vec![quick("a"), quick("b")]), timer(), vec![reader])
                .expect("manager");
        let outcomes = manager.run_all().expect("plan ran");
        assert_that!(outcomes.len(), eq(2));
        for outcome in &outcomes {
            let record = outcome.record().expect("run completed");
            expect_that!(record.power_traces().len(), eq(0));
        }
    }

    #[googletest::test]
    fn every_entry_runs_once_per_memory_node() {
        // Nodes this large do not exist; priming falls back to the local node.
        let nodes =
            RunPlan { memory_nodes: vec![u32::MAX, u32::MAX - 1], ..plan(vec![quick("a"), quick("b")]) };
        let mut manager = BenchmarkManager::with_timer(nodes, timer(), Vec::new()).expect("manager");
        let outcomes = manager.run_all().expect("plan ran");
        assert_that!(outcomes.len(), eq(4));
        let placed: Vec<_> = outcomes
            .iter()
            .map(|outcome| outcome.record().expect("run completed").placement().memory_node)
            .collect();
        expect_that!(
            placed,
            eq(&vec![Some(u32::MAX), Some(u32::MAX), Some(u32::MAX - 1), Some(u32::MAX - 1)])
        );
        let names: Vec<_> = outcomes
            .iter()
            .map(|outcome| outcome.record().expect("run completed").config().name.clone())
            .collect();
        expect_that!(names, elements_are![eq("a"), eq("b"), eq("a"), eq("b")]);
    }

    #[googletest::test]
    fn missing_cpu_node_fails_only_its_runs() {
        let nodes = RunPlan { cpu_nodes: vec![u32::MAX], ..plan(vec![quick("a")]) };
        let mut manager = BenchmarkManager::with_timer(nodes, timer(), Vec::new()).expect("manager");
        let outcomes = manager.run_all().expect("plan ran");
        assert_that!(outcomes.len(), eq(1));
        let failure = outcomes[0].failure().expect("run failed");
        expect_that!(failure.kind, eq(FailureKind::BenchmarkExecutionFailure));
        expect_that!(failure.placement.cpu_node, some(eq(u32::MAX)));
        expect_that!(failure.config.affinity, eq(&WorkerAffinity::NumaNode(u32::MAX)));
    }

    #[googletest::test]
    fn large_page_plan_runs_with_or_without_huge_pages() {
        let large = RunPlan { region_size: 2 * crate::MIB, large_pages: true, ..plan(vec![quick("bw")]) };
        let mut manager = BenchmarkManager::with_timer(large, timer(), Vec::new()).expect("manager");
        let outcomes = manager.run_all().expect("plan ran");
        expect_that!(outcomes[0].record().is_some(), eq(true));
    }

    #[cfg(target_os = "linux")]
    #[googletest::test]
    fn worker_stack_size_reaches_the_workers() {
        let huge_stacks = RunPlan { worker_stack_size: Some(1 << 62), ..plan(vec![quick("bw")]) };
        let mut manager = BenchmarkManager::with_timer(huge_stacks, timer(), Vec::new()).expect("manager");
        let outcomes = manager.run_all().expect("plan ran");
        let failure = outcomes[0].failure().expect("run failed");
        expect_that!(failure.kind, eq(FailureKind::ThreadSpawnFailure));
    }
}
