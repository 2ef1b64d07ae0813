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

use std::{
    fmt,
    path::Path,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    time::{Duration, Instant},
};

use log::{debug, warn};
use memprobe_time::Timer;
use serde::{Deserialize, Serialize};

use super::{
    rapl::{rapl_sockets, RaplDramSource},
    PowerSample, PowerTrace, TelemetrySource, POWERCAP_ROOT,
};
use crate::{
    error::{Error, Result},
    thread::{Runnable, Thread, ThreadBuilder},
};

/// Lifecycle of a [`PowerReader`]: `Idle -> Sampling -> Stopped`, and back to
/// `Idle` through [`PowerReader::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderState {
    Idle,
    Sampling,
    Stopped,
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Sampling => "sampling",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// The loop run on the sampling thread. Receives the source once the thread
/// is running and hands it back through `join()`.
struct Sampler {
    name: String,
    handoff: Receiver<Box<dyn TelemetrySource>>,
    source: Option<Box<dyn TelemetrySource>>,
    timer: Arc<dyn Timer>,
    interval: Duration,
    stop: Receiver<()>,
    samples: Vec<PowerSample>,
}

impl Runnable for Sampler {
    fn run(&mut self) {
        let Ok(mut source) = self.handoff.recv() else {
            return;
        };
        let origin = self.timer.now();
        // Every reading covers at least one full interval since the previous
        // one, the first included.
        let mut wait = self.interval;
        loop {
            match self.stop.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            let started = Instant::now();
            match source.read_watts() {
                Ok(watts) => {
                    let timestamp_ns = self.timer.elapsed_nanos(origin, self.timer.now());
                    self.samples.push(PowerSample { timestamp_ns, watts });
                }
                Err(err) => warn!("{}: skipping sample: {err}", self.name),
            }
            wait = self.interval.saturating_sub(started.elapsed());
        }
        self.source = Some(source);
    }
}

struct Sampling {
    thread: Thread<'static, Sampler>,
    stop: Sender<()>,
}

/// Samples a telemetry source on a dedicated thread between `start()` and
/// `stop()`.
pub struct PowerReader {
    name: String,
    interval: Duration,
    timer: Arc<dyn Timer>,
    stack_size: Option<usize>,
    state: ReaderState,
    source: Option<Box<dyn TelemetrySource>>,
    sampling: Option<Sampling>,
    samples: Vec<PowerSample>,
}

impl PowerReader {
    pub fn new(source: Box<dyn TelemetrySource>, interval: Duration, timer: Arc<dyn Timer>) -> Self {
        Self {
            name: source.name(),
            interval,
            timer,
            stack_size: None,
            state: ReaderState::Idle,
            source: Some(source),
            sampling: None,
            samples: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Runs the sampling loop on a thread with a stack of `bytes`.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    fn expect_state(&self, expected: ReaderState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidPowerReaderState {
                reader: self.name.clone(),
                expected,
                found: self.state,
            })
        }
    }

    /// Opens the source and begins sampling.
    ///
    /// On failure the reader stays idle, keeps its source and can be retried.
    pub fn start(&mut self) -> Result<()> {
        self.expect_state(ReaderState::Idle)?;
        let mut source = self.source.take().ok_or_else(|| Error::TelemetryUnavailable {
            source_name: self.name.clone(),
            reason: "source was lost by a sampling thread that panicked".to_string(),
        })?;
        if let Err(err) = source.open() {
            self.source = Some(source);
            return Err(match err {
                err @ Error::TelemetryUnavailable { .. } => err,
                other => Error::TelemetryUnavailable {
                    source_name: self.name.clone(),
                    reason: other.to_string(),
                },
            });
        }

        let (stop, stop_signal) = mpsc::channel();
        let (handoff, handed) = mpsc::channel();
        let sampler = Sampler {
            name: self.name.clone(),
            handoff: handed,
            source: None,
            timer: Arc::clone(&self.timer),
            interval: self.interval,
            stop: stop_signal,
            samples: Vec::new(),
        };
        let builder = ThreadBuilder::new(format!("power-{}", self.name));
        let builder = match self.stack_size {
            Some(bytes) => builder.stack_size(bytes),
            None => builder,
        };
        let thread = match builder.spawn(sampler) {
            Ok(thread) => thread,
            Err(err) => {
                self.source = Some(source);
                return Err(err);
            }
        };
        if let Err(mpsc::SendError(source)) = handoff.send(source) {
            self.source = Some(source);
            let _ = thread.join();
            return Err(Error::TelemetryUnavailable {
                source_name: self.name.clone(),
                reason: "sampling thread exited before it started".to_string(),
            });
        }
        debug!("{}: sampling every {:?}", self.name, self.interval);
        self.sampling = Some(Sampling { thread, stop });
        self.state = ReaderState::Sampling;
        Ok(())
    }

    /// Signals the sampling loop, joins it and freezes the samples.
    pub fn stop(&mut self) -> Result<()> {
        self.expect_state(ReaderState::Sampling)?;
        self.state = ReaderState::Stopped;
        let Some(Sampling { thread, stop: signal }) = self.sampling.take() else {
            return Ok(());
        };
        // A send error means the loop already exited.
        let _ = signal.send(());
        let sampler = thread.join()?;
        self.samples = sampler.samples;
        self.source = sampler.source;
        debug!("{}: collected {} samples", self.name, self.samples.len());
        Ok(())
    }

    /// The samples of the last sampling period. Only valid once stopped.
    pub fn samples(&self) -> Result<&[PowerSample]> {
        self.expect_state(ReaderState::Stopped)?;
        Ok(&self.samples)
    }

    pub fn trace(&self) -> Result<PowerTrace> {
        Ok(PowerTrace { reader: self.name.clone(), samples: self.samples()?.to_vec() })
    }

    /// Discards the samples so the reader can start again.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == ReaderState::Sampling {
            return self.expect_state(ReaderState::Stopped);
        }
        self.samples.clear();
        self.state = ReaderState::Idle;
        Ok(())
    }
}

impl Drop for PowerReader {
    fn drop(&mut self) {
        if let Some(Sampling { thread, stop: signal }) = self.sampling.take() {
            let _ = signal.send(());
            if let Err(err) = thread.join() {
                warn!("{}: {err}", self.name);
            }
        }
    }
}

/// Constructors for readers of DRAM power from the platform energy counters.
pub struct NativeDramPowerReader;

impl NativeDramPowerReader {
    pub fn for_socket(socket: u32, interval: Duration, timer: Arc<dyn Timer>) -> PowerReader {
        PowerReader::new(Box::new(RaplDramSource::for_socket(socket)), interval, timer)
    }

    /// One reader per socket exposing a RAPL package. Empty when the powercap
    /// tree is missing.
    pub fn for_all_sockets(interval: Duration, timer: Arc<dyn Timer>) -> Vec<PowerReader> {
        let sockets = match rapl_sockets(Path::new(POWERCAP_ROOT)) {
            Ok(sockets) => sockets,
            Err(err) => {
                warn!("cannot enumerate RAPL sockets under {POWERCAP_ROOT}: {err}");
                Vec::new()
            }
        };
        sockets
            .into_iter()
            .map(|socket| Self::for_socket(socket, interval, Arc::clone(&timer)))
            .collect()
    }
}
