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

//! Memory latency and throughput benchmark runner.
//!
//! Builds a run plan from the command line (or loads one from JSON), runs it
//! over one memory region per selected NUMA node and prints one line per run.

mod args;
mod plan;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use memprobe::BenchmarkManager;

use crate::args::Args;

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .try_init()?;

    let plan = match &args.plan {
        Some(path) => plan::load_plan(path)?,
        None => plan::build_plan(&args)?,
    };
    plan::validate_plan(&plan)?;
    info!(
        "running {} benchmark(s) on {} placement(s)",
        plan.entries.len(),
        plan.placements().len()
    );

    let mut manager = BenchmarkManager::new(plan)
        .context("failed to set up the benchmark run")?
        .with_aggregation(args.aggregation.into());
    let outcomes = manager.run_all().context("benchmark plan aborted")?;

    let report = report::render(&outcomes, manager.seed(), args.output)?;
    report::write(&report, args.output_file.as_deref())
}
