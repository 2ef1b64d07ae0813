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

//! Results produced by benchmark runs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    config::{BenchmarkKind, Placement, RunConfig},
    error::{Error, FailureKind},
    measure::Timing,
    power::PowerTrace,
    stats::Summary,
};

/// What one worker thread did during one repetition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub index: usize,
    pub bytes_moved: u64,
    pub accesses: u64,
    pub passes: u64,
    pub elapsed_ticks: u64,
    pub overhead_ticks: u64,
    /// Measured time with the loop overhead removed.
    pub elapsed: Duration,
    pub warning: bool,
    /// Why the worker could not measure, if it failed.
    pub failure: Option<String>,
}

impl WorkerResult {
    pub fn measured(
        index: usize,
        timing: Timing,
        accesses_per_pass: u64,
        bytes_per_pass: u64,
        elapsed: Duration,
    ) -> Self {
        Self {
            index,
            bytes_moved: timing.passes * bytes_per_pass,
            accesses: timing.passes * accesses_per_pass,
            passes: timing.passes,
            elapsed_ticks: timing.elapsed_ticks,
            overhead_ticks: timing.overhead_ticks,
            elapsed,
            warning: timing.is_suspect(),
            failure: None,
        }
    }

    pub fn failed(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            bytes_moved: 0,
            accesses: 0,
            passes: 0,
            elapsed_ticks: 0,
            overhead_ticks: 0,
            elapsed: Duration::ZERO,
            warning: false,
            failure: Some(reason.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    NanosPerAccess,
    MebibytesPerSecond,
}

impl MetricUnit {
    pub fn for_kind(kind: BenchmarkKind) -> Self {
        match kind {
            BenchmarkKind::Latency => Self::NanosPerAccess,
            BenchmarkKind::Throughput => Self::MebibytesPerSecond,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::NanosPerAccess => "ns/access",
            Self::MebibytesPerSecond => "MiB/s",
        }
    }
}

/// One complete measurement of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repetition {
    pub metric: f64,
    /// Wall time of the slowest worker.
    pub elapsed: Duration,
    pub workers: Vec<WorkerResult>,
    /// Throughput of the background load workers of a loaded latency run.
    pub load_mib_per_second: Option<f64>,
}

/// The outcome of one successful benchmark run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    kind: BenchmarkKind,
    config: RunConfig,
    placement: Placement,
    unit: MetricUnit,
    repetitions: Vec<Repetition>,
    summary: Summary,
    warning: bool,
    power: Vec<PowerTrace>,
}

impl MeasurementRecord {
    pub(crate) fn new(config: &RunConfig, repetitions: Vec<Repetition>) -> Result<Self, Error> {
        let metrics: Vec<f64> = repetitions.iter().map(|repetition| repetition.metric).collect();
        let summary = Summary::from_samples(&metrics)
            .ok_or_else(|| Error::execution("run produced no repetitions"))?;
        let warning = repetitions
            .iter()
            .flat_map(|repetition| &repetition.workers)
            .any(|worker| worker.warning);
        Ok(Self {
            kind: config.kind,
            config: config.clone(),
            placement: Placement::default(),
            unit: MetricUnit::for_kind(config.kind),
            repetitions,
            summary,
            warning,
            power: Vec::new(),
        })
    }

    pub(crate) fn with_power(mut self, power: Vec<PowerTrace>) -> Self {
        self.power = power;
        self
    }

    pub(crate) fn placed(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn kind(&self) -> BenchmarkKind {
        self.kind
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// The memory and CPU nodes the run was placed on.
    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn unit(&self) -> MetricUnit {
        self.unit
    }

    /// Mean of the per-repetition metrics.
    pub fn metric(&self) -> f64 {
        self.summary.mean
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    /// Total measured time across repetitions.
    pub fn elapsed(&self) -> Duration {
        self.repetitions.iter().map(|repetition| repetition.elapsed).sum()
    }

    pub fn repetitions(&self) -> &[Repetition] {
        &self.repetitions
    }

    /// Worker results of the last repetition.
    pub fn worker_results(&self) -> &[WorkerResult] {
        self.repetitions.last().map_or(&[], |repetition| &repetition.workers)
    }

    /// Whether any worker flagged its timing as unreliable.
    pub fn warning(&self) -> bool {
        self.warning
    }

    pub fn power_traces(&self) -> &[PowerTrace] {
        &self.power
    }
}

/// Marker for a plan entry that did not produce a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    /// Position of the entry in the plan.
    pub index: usize,
    pub config: RunConfig,
    #[serde(default)]
    pub placement: Placement,
    pub kind: FailureKind,
    pub message: String,
}

impl RunFailure {
    pub fn new(index: usize, config: &RunConfig, placement: Placement, error: &Error) -> Self {
        Self {
            index,
            config: config.clone(),
            placement,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(MeasurementRecord),
    Failed(RunFailure),
}

impl RunOutcome {
    pub fn record(&self) -> Option<&MeasurementRecord> {
        match self {
            Self::Completed(record) => Some(record),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match self {
            Self::Completed(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }
}
