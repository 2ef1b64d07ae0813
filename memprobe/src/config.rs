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

//! Run parameters and the plan that sequences them.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    topology::NodeTopology,
};

/// Default region size for a plan (256 MiB).
pub const DEFAULT_REGION_SIZE: usize = 256 * 1024 * 1024;

/// Default interval between power samples.
pub const DEFAULT_POWER_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkKind {
    Latency,
    Throughput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPattern {
    Sequential,
    Random,
}

/// Direction of the memory traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Read,
    Write,
    Copy,
}

/// Width of a single access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSize {
    Bits8,
    Bits16,
    Bits32,
    Bits64,
    Bits128,
    Bits256,
    Bits512,
}

impl ChunkSize {
    pub const ALL: [ChunkSize; 7] = [
        Self::Bits8,
        Self::Bits16,
        Self::Bits32,
        Self::Bits64,
        Self::Bits128,
        Self::Bits256,
        Self::Bits512,
    ];

    pub fn from_bits(bits: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|chunk| chunk.bits() == bits)
    }

    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    pub fn bytes(self) -> usize {
        match self {
            Self::Bits8 => 1,
            Self::Bits16 => 2,
            Self::Bits32 => 4,
            Self::Bits64 => 8,
            Self::Bits128 => 16,
            Self::Bits256 => 32,
            Self::Bits512 => 64,
        }
    }

    /// Whether a slot of this width can hold a chain link.
    pub fn holds_pointer(self) -> bool {
        self >= Self::Bits64
    }
}

impl fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// When a worker stops measuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunLength {
    /// Measure for at least this long.
    Duration(Duration),
    /// Measure exactly this many complete passes over the working set.
    Passes(u64),
}

/// Placement of worker threads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerAffinity {
    #[default]
    Unpinned,
    /// Worker `i` runs on the `i`-th CPU of the node, wrapping around.
    NumaNode(u32),
    /// Worker `i` runs on `cpus[i % cpus.len()]`.
    Cpus(Vec<usize>),
}

impl WorkerAffinity {
    /// Resolves the placement into one optional CPU per worker.
    pub fn resolve(&self, workers: usize, topology: &NodeTopology) -> Result<Vec<Option<usize>>> {
        let cpus = match self {
            Self::Unpinned => return Ok(vec![None; workers]),
            Self::NumaNode(node) => topology.node_cpus(*node).map_err(|err| {
                Error::execution(format!("cannot read CPUs of NUMA node {node}: {err}"))
            })?,
            Self::Cpus(cpus) => cpus.clone(),
        };
        if cpus.is_empty() {
            return Err(Error::execution("affinity names no CPUs"));
        }
        Ok((0..workers).map(|worker| Some(cpus[worker % cpus.len()])).collect())
    }
}

/// Parameters of a single benchmark invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub name: String,
    pub kind: BenchmarkKind,
    pub pattern: AccessPattern,
    pub operation: Operation,
    pub chunk: ChunkSize,
    /// Distance between consecutive accesses, in chunks. Negative strides walk
    /// the working set backwards. Only sequential patterns use it.
    pub stride: i32,
    /// Worker threads. For latency runs, workers beyond the first generate
    /// background load.
    pub workers: usize,
    pub length: RunLength,
    pub repetitions: u32,
    /// Bytes each worker touches. Defaults to an equal share of the region.
    pub working_set_per_worker: Option<usize>,
    #[serde(default)]
    pub affinity: WorkerAffinity,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: "throughput".to_string(),
            kind: BenchmarkKind::Throughput,
            pattern: AccessPattern::Sequential,
            operation: Operation::Read,
            chunk: ChunkSize::Bits64,
            stride: 1,
            workers: 1,
            length: RunLength::Duration(Duration::from_secs(1)),
            repetitions: 1,
            working_set_per_worker: None,
            affinity: WorkerAffinity::Unpinned,
        }
    }
}

impl RunConfig {
    /// Default single-threaded pointer-chasing run.
    pub fn latency(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: BenchmarkKind::Latency,
            pattern: AccessPattern::Random,
            ..Self::default()
        }
    }

    pub fn throughput(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Human readable summary, e.g. `throughput sequential read 64-bit x4`.
    pub fn describe(&self) -> String {
        let kind = match self.kind {
            BenchmarkKind::Latency => "latency",
            BenchmarkKind::Throughput => "throughput",
        };
        let pattern = match self.pattern {
            AccessPattern::Sequential => format!("sequential(stride {})", self.stride),
            AccessPattern::Random => "random".to_string(),
        };
        let operation = match self.operation {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Copy => "copy",
        };
        format!("{kind} {pattern} {operation} {} x{}", self.chunk, self.workers)
    }
}

/// The NUMA nodes one pass over the plan entries is placed on. `None` leaves
/// the choice to the entry and the operating system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    pub memory_node: Option<u32>,
    pub cpu_node: Option<u32>,
}

impl Placement {
    /// `config` with its workers moved onto the CPU node, if there is one.
    pub fn apply(&self, config: &RunConfig) -> RunConfig {
        match self.cpu_node {
            Some(node) => RunConfig { affinity: WorkerAffinity::NumaNode(node), ..config.clone() },
            None => config.clone(),
        }
    }

    /// e.g. `memory node 0, cpu node 1`; `None` when nothing was placed.
    pub fn describe(&self) -> Option<String> {
        match (self.memory_node, self.cpu_node) {
            (None, None) => None,
            (Some(memory), None) => Some(format!("memory node {memory}")),
            (None, Some(cpu)) => Some(format!("cpu node {cpu}")),
            (Some(memory), Some(cpu)) => Some(format!("memory node {memory}, cpu node {cpu}")),
        }
    }
}

fn distinct_nodes(nodes: &[u32]) -> Vec<Option<u32>> {
    if nodes.is_empty() {
        return vec![None];
    }
    let mut distinct = Vec::with_capacity(nodes.len());
    for &node in nodes {
        if !distinct.contains(&Some(node)) {
            distinct.push(Some(node));
        }
    }
    distinct
}

/// Ordered list of runs, repeated for every memory and CPU node pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    /// Bytes of each region.
    pub region_size: usize,
    /// One region is placed on each of these nodes. Empty allocates a single
    /// region wherever the allocator puts it.
    #[serde(default)]
    pub memory_nodes: Vec<u32>,
    /// Every entry runs once with its workers on each of these nodes. Empty
    /// keeps each entry's own affinity.
    #[serde(default)]
    pub cpu_nodes: Vec<u32>,
    /// Back regions with huge pages where the system has them reserved.
    #[serde(default)]
    pub large_pages: bool,
    /// Stack size of worker threads. The platform default when unset.
    #[serde(default)]
    pub worker_stack_size: Option<usize>,
    /// Seed for random chains. Zero derives one from the timer.
    #[serde(default)]
    pub seed: u64,
    /// Sample DRAM power at this interval while each run executes.
    #[serde(default)]
    pub power_interval: Option<Duration>,
    pub entries: Vec<RunConfig>,
}

impl Default for RunPlan {
    fn default() -> Self {
        Self {
            region_size: DEFAULT_REGION_SIZE,
            memory_nodes: Vec::new(),
            cpu_nodes: Vec::new(),
            large_pages: false,
            worker_stack_size: None,
            seed: 0,
            power_interval: None,
            entries: Vec::new(),
        }
    }
}

impl RunPlan {
    /// Nodes that get a region, without duplicates.
    pub fn region_nodes(&self) -> Vec<Option<u32>> {
        distinct_nodes(&self.memory_nodes)
    }

    /// Every memory node paired with every CPU node, memory node major.
    pub fn placements(&self) -> Vec<Placement> {
        let cpu_nodes = distinct_nodes(&self.cpu_nodes);
        self.region_nodes()
            .into_iter()
            .flat_map(|memory_node| {
                cpu_nodes.iter().map(move |&cpu_node| Placement { memory_node, cpu_node })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[googletest::test]
    fn chunk_sizes_round_trip_through_bits() {
        for chunk in ChunkSize::ALL {
            assert_that!(ChunkSize::from_bits(chunk.bits()), some(eq(chunk)));
        }
        expect_that!(ChunkSize::from_bits(24), none());
        expect_that!(ChunkSize::Bits32.holds_pointer(), eq(false));
        expect_that!(ChunkSize::Bits64.holds_pointer(), eq(true));
        expect_that!(ChunkSize::Bits512.bytes(), eq(64));
    }

    #[googletest::test]
    fn cpu_affinity_wraps_around_the_list() {
        let placement = WorkerAffinity::Cpus(vec![2, 5])
            .resolve(3, &NodeTopology::default())
            .expect("resolved");
        assert_that!(placement.len(), eq(3));
        expect_that!(placement[0], some(eq(2)));
        expect_that!(placement[1], some(eq(5)));
        expect_that!(placement[2], some(eq(2)));
    }

    #[googletest::test]
    fn numa_affinity_uses_node_cpus() {
        let root = tempfile::tempdir().expect("tempdir");
        let node = root.path().join("node1");
        std::fs::create_dir(&node).expect("node dir");
        std::fs::write(node.join("cpulist"), "8-9\n").expect("cpulist");

        let placement = WorkerAffinity::NumaNode(1)
            .resolve(2, &NodeTopology::new(root.path()))
            .expect("resolved");
        expect_that!(placement[1], some(eq(9)));
        expect_that!(
            WorkerAffinity::NumaNode(7).resolve(1, &NodeTopology::new(root.path())),
            err(matches_pattern!(Error::BenchmarkExecutionFailure { .. }))
        );
    }

    #[googletest::test]
    fn empty_cpu_list_is_rejected() {
        expect_that!(
            WorkerAffinity::Cpus(Vec::new()).resolve(1, &NodeTopology::default()),
            err(matches_pattern!(Error::BenchmarkExecutionFailure { .. }))
        );
    }

    #[googletest::test]
    fn describes_the_run() {
        let config = RunConfig { workers: 4, ..RunConfig::throughput("bw") };
        assert_that!(config.describe(), eq("throughput sequential(stride 1) read 64-bit x4"));
    }

    #[googletest::test]
    fn plan_deserializes_from_json() {
        let json = r#"{
            "region_size": 1048576,
            "entries": [{
                "name": "lat",
                "kind": "latency",
                "pattern": "random",
                "operation": "read",
                "chunk": "bits64",
                "stride": 1,
                "workers": 1,
                "length": {"passes": 3},
                "repetitions": 2,
                "working_set_per_worker": null
            }]
        }"#;
        let plan: RunPlan = serde_json::from_str(json).expect("valid plan");
        assert_that!(plan.entries.len(), eq(1));
        expect_that!(plan.entries[0].kind, eq(BenchmarkKind::Latency));
        expect_that!(plan.entries[0].length, eq(RunLength::Passes(3)));
        expect_that!(plan.seed, eq(0));
        expect_that!(plan.large_pages, eq(false));
        expect_that!(plan.placements().len(), eq(1));
    }

    #[googletest::test]
    fn placements_pair_every_memory_node_with_every_cpu_node() {
        let plan = RunPlan { memory_nodes: vec![0, 1, 1], cpu_nodes: vec![1, 0], ..RunPlan::default() };
        expect_that!(plan.region_nodes().len(), eq(2));
        let placements = plan.placements();
        assert_that!(placements.len(), eq(4));
        expect_that!(placements[0], eq(Placement { memory_node: Some(0), cpu_node: Some(1) }));
        expect_that!(placements[1], eq(Placement { memory_node: Some(0), cpu_node: Some(0) }));
        expect_that!(placements[3], eq(Placement { memory_node: Some(1), cpu_node: Some(0) }));

        let memory_only = RunPlan { memory_nodes: vec![2], ..RunPlan::default() }.placements();
        assert_that!(memory_only.len(), eq(1));
        expect_that!(memory_only[0].cpu_node, none());
        expect_that!(memory_only[0].describe(), some(eq("memory node 2")));
        expect_that!(Placement::default().describe(), none());
    }

    #[googletest::test]
    fn cpu_node_placement_overrides_the_entry_affinity() {
        let config = RunConfig { affinity: WorkerAffinity::Cpus(vec![3]), ..RunConfig::throughput("bw") };
        let placed = Placement { memory_node: None, cpu_node: Some(1) }.apply(&config);
        expect_that!(placed.affinity == WorkerAffinity::NumaNode(1), eq(true));
        let kept = Placement { memory_node: Some(0), cpu_node: None }.apply(&config);
        expect_that!(kept.affinity == WorkerAffinity::Cpus(vec![3]), eq(true));
    }
}
