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

use memprobe_time::TimerError;
use serde::{Deserialize, Serialize};

use crate::power::ReaderState;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("high-resolution clock unavailable: {reason}")]
    ClockUnavailable { reason: String },
    #[error("failed to spawn thread {name}: {source}")]
    ThreadSpawnFailure {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("thread {name} panicked")]
    ThreadPanicked { name: String },
    #[error("telemetry unavailable from {source_name}: {reason}")]
    TelemetryUnavailable { source_name: String, reason: String },
    #[error("benchmark execution failed: {reason}")]
    BenchmarkExecutionFailure { reason: String },
    #[error("power reader {reader} is {found}, expected {expected}")]
    InvalidPowerReaderState { reader: String, expected: ReaderState, found: ReaderState },
}

impl Error {
    pub(crate) fn execution(reason: impl Into<String>) -> Self {
        Self::BenchmarkExecutionFailure { reason: reason.into() }
    }

    /// Whether the error aborts the remainder of a plan rather than a single
    /// run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ClockUnavailable { .. } | Self::InvalidPowerReaderState { .. })
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ClockUnavailable { .. } => FailureKind::ClockUnavailable,
            Self::ThreadSpawnFailure { .. } => FailureKind::ThreadSpawnFailure,
            Self::ThreadPanicked { .. } => FailureKind::ThreadPanicked,
            Self::TelemetryUnavailable { .. } => FailureKind::TelemetryUnavailable,
            Self::BenchmarkExecutionFailure { .. } => FailureKind::BenchmarkExecutionFailure,
            Self::InvalidPowerReaderState { .. } => FailureKind::InvalidPowerReaderState,
        }
    }
}

impl From<TimerError> for Error {
    fn from(err: TimerError) -> Self {
        match err {
            TimerError::ClockUnavailable { reason } => Self::ClockUnavailable { reason },
        }
    }
}

/// Serializable classification of an [`Error`], carried in failure markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ClockUnavailable,
    ThreadSpawnFailure,
    ThreadPanicked,
    TelemetryUnavailable,
    BenchmarkExecutionFailure,
    InvalidPowerReaderState,
}
