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

//! Concurrent power sampling.
//!
//! A [`PowerReader`] polls a [`TelemetrySource`] on its own thread while a
//! benchmark runs. The samples are handed back when the reader is stopped and
//! end up in the run's record as a [`PowerTrace`].

use serde::{Deserialize, Serialize};

pub mod rapl;
pub mod reader;
pub mod source;

pub use rapl::{RaplDramSource, POWERCAP_ROOT};
pub use reader::{NativeDramPowerReader, PowerReader, ReaderState};
pub use source::TelemetrySource;

/// One power reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
    /// Nanoseconds since the reader started sampling.
    pub timestamp_ns: u64,
    pub watts: f64,
}

/// The samples one reader collected during one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerTrace {
    pub reader: String,
    pub samples: Vec<PowerSample>,
}

impl PowerTrace {
    pub fn mean_watts(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().map(|sample| sample.watts).sum::<f64>() / self.samples.len() as f64)
    }

    pub fn peak_watts(&self) -> Option<f64> {
        self.samples.iter().map(|sample| sample.watts).reduce(f64::max)
    }

    /// Energy in joules, integrated with the trapezoidal rule. Zero with fewer
    /// than two samples.
    pub fn energy_joules(&self) -> f64 {
        self.samples
            .windows(2)
            .map(|pair| {
                let seconds =
                    pair[1].timestamp_ns.saturating_sub(pair[0].timestamp_ns) as f64 / 1e9;
                (pair[0].watts + pair[1].watts) / 2.0 * seconds
            })
            .sum()
    }
}
