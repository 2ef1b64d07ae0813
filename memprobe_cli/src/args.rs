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

use std::path::PathBuf;

use clap::Parser;
use memprobe::{AccessPattern, BenchmarkKind, Operation, ThroughputAggregation};

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindArg {
    Latency,
    Throughput,
}

impl From<KindArg> for BenchmarkKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Latency => Self::Latency,
            KindArg::Throughput => Self::Throughput,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternArg {
    Sequential,
    Random,
}

impl From<PatternArg> for AccessPattern {
    fn from(pattern: PatternArg) -> Self {
        match pattern {
            PatternArg::Sequential => Self::Sequential,
            PatternArg::Random => Self::Random,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationArg {
    Read,
    Write,
    Copy,
}

impl From<OperationArg> for Operation {
    fn from(operation: OperationArg) -> Self {
        match operation {
            OperationArg::Read => Self::Read,
            OperationArg::Write => Self::Write,
            OperationArg::Copy => Self::Copy,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AggregationArg {
    /// Total bytes over the slowest worker's time.
    #[default]
    Slowest,
    /// Total bytes over the mean worker time.
    Mean,
    /// Sum of the individual worker rates.
    SumOfRates,
}

impl From<AggregationArg> for ThroughputAggregation {
    fn from(aggregation: AggregationArg) -> Self {
        match aggregation {
            AggregationArg::Slowest => Self::SlowestWorker,
            AggregationArg::Mean => Self::MeanElapsed,
            AggregationArg::SumOfRates => Self::SumOfWorkerRates,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "memprobe")]
#[command(about = "Measure memory latency and throughput")]
pub struct Args {
    /// Benchmark kinds to run.
    #[arg(long, value_enum, value_delimiter = ',', default_value = "throughput")]
    pub kinds: Vec<KindArg>,

    /// Access patterns to run.
    #[arg(long, value_enum, value_delimiter = ',', default_value = "sequential")]
    pub patterns: Vec<PatternArg>,

    /// Operations to run.
    #[arg(long, value_enum, value_delimiter = ',', default_value = "read")]
    pub operations: Vec<OperationArg>,

    /// Access widths in bits (8, 16, 32, 64, 128, 256 or 512).
    #[arg(long, value_delimiter = ',', default_value = "64")]
    pub chunk_bits: Vec<u32>,

    /// Strides in chunks for sequential patterns. Negative strides walk
    /// backwards.
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true, default_value = "1")]
    pub strides: Vec<i32>,

    /// Worker thread counts.
    #[arg(long, value_delimiter = ',', default_value = "1")]
    pub threads: Vec<usize>,

    /// Target duration of each measurement, in milliseconds.
    #[arg(long, default_value = "1000")]
    pub duration_ms: u64,

    /// Measure this many passes over the working set instead of a duration.
    #[arg(long, conflicts_with = "duration_ms")]
    pub passes: Option<u64>,

    /// Times each measurement is repeated.
    #[arg(long, default_value = "1")]
    pub repetitions: u32,

    /// Working set per worker in KiB (default: an equal share of the region).
    #[arg(long)]
    pub working_set_kib: Option<usize>,

    /// Size of the memory region in MiB.
    #[arg(long, default_value = "256")]
    pub region_mib: usize,

    /// Repeat the plan with the region on each of these NUMA nodes.
    #[arg(long, value_delimiter = ',')]
    pub memory_nodes: Vec<u32>,

    /// Repeat the plan with the workers on each of these NUMA nodes.
    #[arg(long, value_delimiter = ',', conflicts_with = "cpus")]
    pub cpu_nodes: Vec<u32>,

    /// Use every NUMA node of the machine for both memory and workers.
    #[arg(long, conflicts_with_all = ["memory_nodes", "cpu_nodes", "cpus"])]
    pub all_nodes: bool,

    /// Back the regions with huge pages where the system has them.
    #[arg(long)]
    pub large_pages: bool,

    /// Stack size of each worker thread, in KiB.
    #[arg(long)]
    pub worker_stack_kib: Option<usize>,

    /// Pin worker `i` to the `i`-th CPU of this list, wrapping around.
    #[arg(long, value_delimiter = ',')]
    pub cpus: Vec<usize>,

    /// Sample DRAM power through RAPL while each run executes.
    #[arg(long)]
    pub measure_power: bool,

    /// Interval between power samples, in milliseconds.
    #[arg(long, default_value = "50")]
    pub power_interval_ms: u64,

    /// How worker throughputs are combined.
    #[arg(long, value_enum, default_value = "slowest")]
    pub aggregation: AggregationArg,

    /// Seed for random chains (0 = derived from the timer).
    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// Load the plan from a JSON file instead of building it from flags.
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Output format.
    #[arg(long, value_enum, default_value = "human")]
    pub output: OutputFormat,

    /// Write the report to this file instead of stdout.
    #[arg(long)]
    pub output_file: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short)]
    pub verbose: bool,
}
