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

//! Formats run outcomes for people or for other programs.

use std::{fmt::Write as _, fs, io::Write as _, path::Path};

use anyhow::{Context, Result};
use memprobe::{MeasurementRecord, Placement, RunConfig, RunFailure, RunOutcome};
use serde::Serialize;

use crate::args::OutputFormat;

#[derive(Serialize)]
struct JsonReport<'a> {
    seed: u64,
    outcomes: &'a [RunOutcome],
}

pub fn render(outcomes: &[RunOutcome], seed: u64, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Human => Ok(render_human(outcomes)),
        OutputFormat::Json => {
            let mut text = serde_json::to_string_pretty(&JsonReport { seed, outcomes })
                .context("failed to serialize the report")?;
            text.push('\n');
            Ok(text)
        }
    }
}

fn render_human(outcomes: &[RunOutcome]) -> String {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "{:<10} {:<48} {:>14} {:<10} {:>12} {:>12} {:>12}",
        "name", "run", "mean", "unit", "min", "median", "max"
    );
    for outcome in outcomes {
        match outcome {
            RunOutcome::Completed(record) => completed_line(&mut text, record),
            RunOutcome::Failed(failure) => failed_line(&mut text, failure),
        }
    }
    text
}

/// The run description, followed by its nodes when it was placed on any.
fn run_column(config: &RunConfig, placement: Placement) -> String {
    match placement.describe() {
        Some(nodes) => format!("{} [{nodes}]", config.describe()),
        None => config.describe(),
    }
}

fn completed_line(text: &mut String, record: &MeasurementRecord) {
    let summary = record.summary();
    let _ = writeln!(
        text,
        "{:<10} {:<48} {:>14.3} {:<10} {:>12.3} {:>12.3} {:>12.3}{}",
        record.config().name,
        run_column(record.config(), record.placement()),
        summary.mean,
        record.unit().symbol(),
        summary.min,
        summary.median,
        summary.max,
        if record.warning() { "  [warning: timing unreliable]" } else { "" }
    );
    for repetition in record.repetitions() {
        if let Some(load) = repetition.load_mib_per_second {
            let _ = writeln!(text, "{:<10} background load {load:.3} MiB/s", "");
        }
    }
    for trace in record.power_traces() {
        let _ = writeln!(
            text,
            "{:<10} power {}: mean {:.2} W, peak {:.2} W, {:.3} J over {} samples",
            "",
            trace.reader,
            trace.mean_watts().unwrap_or_default(),
            trace.peak_watts().unwrap_or_default(),
            trace.energy_joules(),
            trace.samples.len()
        );
    }
}

fn failed_line(text: &mut String, failure: &RunFailure) {
    let _ = writeln!(
        text,
        "{:<10} {:<48} FAILED ({:?}): {}",
        failure.config.name,
        run_column(&failure.config, failure.placement),
        failure.kind,
        failure.message
    );
}

/// Writes the report to `path`, or to stdout when there is none.
pub fn write(report: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => fs::write(path, report)
            .with_context(|| format!("failed to write report to {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(report.as_bytes()).context("failed to write report to stdout")?;
            stdout.flush().context("failed to flush stdout")
        }
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;
    use memprobe::Error;

    use super::*;

    fn failed() -> RunOutcome {
        let config = RunConfig { workers: 0, ..RunConfig::throughput("broken") };
        let error = Error::BenchmarkExecutionFailure { reason: "run needs at least one worker".to_string() };
        let placement = Placement { memory_node: Some(1), cpu_node: None };
        RunOutcome::Failed(RunFailure::new(0, &config, placement, &error))
    }

    #[googletest::test]
    fn human_report_lists_failures() {
        let text = render(&[failed()], 1, OutputFormat::Human).expect("render");
        expect_that!(text.lines().count(), eq(2));
        expect_that!(text.contains("broken"), eq(true));
        expect_that!(text.contains("FAILED (BenchmarkExecutionFailure)"), eq(true));
        expect_that!(text.contains("[memory node 1]"), eq(true));
    }

    #[googletest::test]
    fn json_report_round_trips_through_serde_json() {
        let text = render(&[failed()], 77, OutputFormat::Json).expect("render");
        let value: serde_json::Value = serde_json::from_str(&text).expect("valid json");
        expect_that!(value["seed"].as_u64(), some(eq(77)));
        expect_that!(value["outcomes"][0]["failed"]["kind"].as_str(), some(eq("benchmark_execution_failure")));
        expect_that!(value["outcomes"][0]["failed"]["placement"]["memory_node"].as_u64(), some(eq(1)));
    }

    #[googletest::test]
    fn report_is_written_to_a_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.txt");
        write("hello\n", Some(&path)).expect("write");
        expect_that!(fs::read_to_string(&path).expect("read back").as_str(), eq("hello\n"));
    }
}
