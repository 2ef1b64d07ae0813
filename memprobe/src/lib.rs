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

//! Memory latency and throughput measurement engine.
//!
//! A [`BenchmarkManager`] owns one memory region per memory node for the
//! lifetime of a [`RunPlan`] and runs the plan's entries in order on every
//! [`Placement`], producing one [`RunOutcome`] per run.
//!
//! # Organization
//!
//! - `benchmark`: validation, partitioning and dispatch by benchmark kind
//! - `latency`: pointer chasing, optionally under background load
//! - `throughput`: multi-threaded streaming kernels and their aggregation
//! - `kernels`: volatile access loops per chunk width
//! - `permutation`: chain construction for pointer chasing
//! - `measure`: the warm-up, timed and overhead sections shared by workers
//! - `gate`: the start gate releasing all workers together
//! - `power`: concurrent DRAM power sampling
//! - `region`, `topology`, `thread`: memory, placement and thread plumbing

pub mod benchmark;
pub mod config;
pub mod error;
pub mod gate;
pub mod kernels;
pub mod latency;
pub mod manager;
pub mod measure;
pub mod permutation;
pub mod power;
pub mod record;
pub mod region;
pub mod stats;
pub mod thread;
pub mod throughput;
pub mod topology;

// Re-exports for convenience.
pub use benchmark::Benchmark;
pub use config::{
    AccessPattern, BenchmarkKind, ChunkSize, Operation, Placement, RunConfig, RunLength, RunPlan,
    WorkerAffinity,
};
pub use error::{Error, FailureKind, Result};
pub use manager::BenchmarkManager;
pub use memprobe_time::{PlatformTimer, Timer};
pub use power::{NativeDramPowerReader, PowerReader, PowerSample, PowerTrace, TelemetrySource};
pub use record::{MeasurementRecord, MetricUnit, Repetition, RunFailure, RunOutcome, WorkerResult};
pub use region::MemoryRegion;
pub use stats::Summary;
pub use throughput::{ThroughputAggregation, DEFAULT_AGGREGATION};

/// Bytes in a mebibyte.
pub const MIB: usize = 1 << 20;

/// Multiplier of the 64-bit LCG used to fill the region (Knuth's MMIX
/// constant).
pub const LCG_MULTIPLIER: u64 = 6364136223846793005;
