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

use crate::error::Result;

/// A platform telemetry channel reporting instantaneous power.
#[cfg_attr(test, mockall::automock)]
pub trait TelemetrySource: Send {
    /// Label used in logs and traces.
    fn name(&self) -> String;

    /// Prepares the source for reading. Fails with `TelemetryUnavailable`
    /// when the platform does not expose the counter.
    fn open(&mut self) -> Result<()>;

    /// Power drawn since the previous reading (or since `open`), in watts.
    fn read_watts(&mut self) -> Result<f64>;
}
