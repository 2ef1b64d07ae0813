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

//! Summary statistics over the repetitions of a run.

use serde::{Deserialize, Serialize};

/// Statistics over per-repetition metrics.
///
/// Percentiles use the nearest-rank method on the sorted samples, so every
/// reported value is one that was actually measured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; zero for a single sample.
    pub stddev: f64,
    pub min: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl Summary {
    /// Returns `None` for an empty sample set.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let count = samples.len();
        if count == 0 {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable_by(f64::total_cmp);

        let mean = sorted.iter().sum::<f64>() / count as f64;
        let stddev = if count > 1 {
            let squares: f64 = sorted.iter().map(|sample| (sample - mean).powi(2)).sum();
            (squares / (count - 1) as f64).sqrt()
        } else {
            0.0
        };

        let rank = |percent: usize| sorted[(count * percent).div_ceil(100).max(1) - 1];
        Some(Self {
            count,
            mean,
            stddev,
            min: sorted[0],
            p25: rank(25),
            median: rank(50),
            p75: rank(75),
            p95: rank(95),
            p99: rank(99),
            max: sorted[count - 1],
        })
    }

    /// Standard deviation relative to the mean.
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.mean == 0.0 {
            0.0
        } else {
            self.stddev / self.mean
        }
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[googletest::test]
    fn empty_samples_have_no_summary() {
        assert_that!(Summary::from_samples(&[]).is_none(), eq(true));
    }

    #[googletest::test]
    fn single_sample_is_every_statistic() {
        let summary = Summary::from_samples(&[4.5]).expect("summary");
        expect_that!(summary.min, eq(4.5));
        expect_that!(summary.p99, eq(4.5));
        expect_that!(summary.max, eq(4.5));
        expect_that!(summary.stddev, eq(0.0));
    }

    #[googletest::test]
    fn nearest_rank_percentiles() {
        let samples: Vec<f64> = (1..=100).rev().map(f64::from).collect();
        let summary = Summary::from_samples(&samples).expect("summary");
        expect_that!(summary.count, eq(100));
        expect_that!(summary.min, eq(1.0));
        expect_that!(summary.p25, eq(25.0));
        expect_that!(summary.median, eq(50.0));
        expect_that!(summary.p75, eq(75.0));
        expect_that!(summary.p95, eq(95.0));
        expect_that!(summary.p99, eq(99.0));
        expect_that!(summary.max, eq(100.0));
        expect_that!(summary.mean, eq(50.5));
    }

    #[googletest::test]
    fn median_of_two_is_the_lower_sample() {
        let summary = Summary::from_samples(&[2.0, 1.0]).expect("summary");
        expect_that!(summary.median, eq(1.0));
        expect_that!(summary.p25, eq(1.0));
        expect_that!(summary.p75, eq(2.0));
    }

    #[googletest::test]
    fn spread_is_relative_to_the_mean() {
        let summary = Summary::from_samples(&[9.0, 10.0, 11.0]).expect("summary");
        expect_that!(summary.stddev, approx_eq(1.0));
        expect_that!(summary.coefficient_of_variation(), approx_eq(0.1));
    }
}
