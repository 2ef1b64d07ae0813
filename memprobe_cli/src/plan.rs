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

//! Builds, loads and validates run plans.

use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use log::debug;
use memprobe::{
    benchmark::{validate, worker_share},
    topology::NodeTopology,
    AccessPattern, ChunkSize, RunConfig, RunLength, RunPlan, WorkerAffinity, MIB,
};

use crate::args::Args;

fn chunk_sizes(bits: &[u32]) -> Result<Vec<ChunkSize>> {
    bits.iter()
        .map(|&bits| ChunkSize::from_bits(bits).ok_or_else(|| anyhow!("unsupported chunk width: {bits} bits")))
        .collect()
}

fn affinity(args: &Args) -> WorkerAffinity {
    if args.cpus.is_empty() {
        WorkerAffinity::Unpinned
    } else {
        WorkerAffinity::Cpus(args.cpus.clone())
    }
}

/// Memory and CPU node lists, with `--all-nodes` expanded from `topology`.
fn node_lists(args: &Args, topology: &NodeTopology) -> Result<(Vec<u32>, Vec<u32>)> {
    if !args.all_nodes {
        return Ok((args.memory_nodes.clone(), args.cpu_nodes.clone()));
    }
    let nodes = topology.nodes().context("failed to list the NUMA nodes")?;
    if nodes.is_empty() {
        return Err(anyhow!("no NUMA nodes found"));
    }
    Ok((nodes.clone(), nodes))
}

/// The cross product of the selected kinds, patterns, operations, chunk
/// widths, strides and thread counts. Combinations no benchmark can run are
/// left out.
pub fn build_plan(args: &Args) -> Result<RunPlan> {
    build_plan_on(args, &NodeTopology::default())
}

fn build_plan_on(args: &Args, topology: &NodeTopology) -> Result<RunPlan> {
    let chunks = chunk_sizes(&args.chunk_bits)?;
    let length = match args.passes {
        Some(passes) => RunLength::Passes(passes),
        None => RunLength::Duration(Duration::from_millis(args.duration_ms)),
    };
    let affinity = affinity(args);

    let mut entries = Vec::new();
    for &kind in &args.kinds {
        for &pattern in &args.patterns {
            for &operation in &args.operations {
                for &chunk in &chunks {
                    for (stride_index, &stride) in args.strides.iter().enumerate() {
                        // Random chains ignore the stride.
                        if AccessPattern::from(pattern) == AccessPattern::Random && stride_index > 0 {
                            continue;
                        }
                        for &workers in &args.threads {
                            let mut config = RunConfig {
                                name: String::new(),
                                kind: kind.into(),
                                pattern: pattern.into(),
                                operation: operation.into(),
                                chunk,
                                stride,
                                workers,
                                length,
                                repetitions: args.repetitions,
                                working_set_per_worker: args.working_set_kib.map(|kib| kib * 1024),
                                affinity: affinity.clone(),
                            };
                            if let Err(err) = validate(&config) {
                                debug!("skipping {}: {err}", config.describe());
                                continue;
                            }
                            config.name = format!("run{}", entries.len() + 1);
                            entries.push(config);
                        }
                    }
                }
            }
        }
    }

    let (memory_nodes, cpu_nodes) = node_lists(args, topology)?;
    Ok(RunPlan {
        region_size: args.region_mib * MIB,
        memory_nodes,
        cpu_nodes,
        large_pages: args.large_pages,
        worker_stack_size: args.worker_stack_kib.map(|kib| kib * 1024),
        seed: args.seed,
        power_interval: args
            .measure_power
            .then(|| Duration::from_millis(args.power_interval_ms)),
        entries,
    })
}

pub fn load_plan(path: &Path) -> Result<RunPlan> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read plan {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse plan {}", path.display()))
}

/// Checks every entry against the plan's region before anything is
/// allocated.
pub fn validate_plan(plan: &RunPlan) -> Result<()> {
    if plan.entries.is_empty() {
        return Err(anyhow!("the plan has no runnable entries"));
    }
    if plan.region_size == 0 {
        return Err(anyhow!("the memory region must not be empty"));
    }
    if plan.power_interval.is_some_and(|interval| interval.is_zero()) {
        return Err(anyhow!("the power sampling interval must be positive"));
    }
    for (index, config) in plan.entries.iter().enumerate() {
        validate(config)
            .and_then(|()| worker_share(plan.region_size, config).map(|_| ()))
            .with_context(|| format!("invalid plan entry {index} ({})", config.name))?;
    }
    Ok(())
}
