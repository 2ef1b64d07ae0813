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

//! DRAM power from the Linux powercap (RAPL) interface.
//!
//! Each package `intel-rapl:N` may carry a `dram` subzone `intel-rapl:N:M`
//! whose `energy_uj` counter accumulates microjoules and wraps at
//! `max_energy_range_uj`. Power is the counter delta over wall time between
//! two readings.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Instant,
};

use log::debug;

use super::TelemetrySource;
use crate::error::{Error, Result};

pub const POWERCAP_ROOT: &str = "/sys/class/powercap";

const PACKAGE_PREFIX: &str = "intel-rapl:";
const DRAM_DOMAIN: &str = "dram";

/// Counter increase from `previous` to `current`, accounting for one wrap at
/// `max_range` (zero when the range is unknown).
pub fn energy_delta(previous: u64, current: u64, max_range: u64) -> u64 {
    if current >= previous {
        current - previous
    } else if max_range > previous {
        max_range - previous + current
    } else {
        current
    }
}

fn read_counter(path: &Path) -> io::Result<u64> {
    let text = fs::read_to_string(path)?;
    text.trim().parse().map_err(|err| {
        io::Error::new(io::ErrorKind::InvalidData, format!("{}: {err}", path.display()))
    })
}

/// Sockets with a RAPL package zone under `root`, in ascending order.
pub fn rapl_sockets(root: &Path) -> io::Result<Vec<u32>> {
    let mut sockets: Vec<u32> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.strip_prefix(PACKAGE_PREFIX)?.parse().ok())
        .collect();
    sockets.sort_unstable();
    Ok(sockets)
}

#[derive(Debug)]
pub struct RaplDramSource {
    root: PathBuf,
    socket: u32,
    domain: Option<PathBuf>,
    max_range_uj: u64,
    last: Option<(u64, Instant)>,
}

impl RaplDramSource {
    pub fn for_socket(socket: u32) -> Self {
        Self::with_root(POWERCAP_ROOT, socket)
    }

    /// Reads the powercap tree under `root` instead of the system one.
    pub fn with_root(root: impl AsRef<Path>, socket: u32) -> Self {
        Self { root: root.as_ref().to_path_buf(), socket, domain: None, max_range_uj: 0, last: None }
    }

    fn unavailable(&self, reason: impl Into<String>) -> Error {
        Error::TelemetryUnavailable { source_name: self.name(), reason: reason.into() }
    }

    /// Finds `intel-rapl:<socket>:*` whose `name` is `dram`.
    fn find_domain(&self) -> io::Result<Option<PathBuf>> {
        let prefix = format!("{PACKAGE_PREFIX}{}:", self.socket);
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_subzone = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&prefix));
            if !is_subzone {
                continue;
            }
            if let Ok(name) = fs::read_to_string(path.join("name")) {
                if name.trim() == DRAM_DOMAIN {
                    return Ok(Some(path));
                }
            }
        }
        Ok(None)
    }
}

impl TelemetrySource for RaplDramSource {
    fn name(&self) -> String {
        format!("dram-socket{}", self.socket)
    }

    fn open(&mut self) -> Result<()> {
        let domain = self
            .find_domain()
            .map_err(|err| self.unavailable(format!("cannot list {}: {err}", self.root.display())))?
            .ok_or_else(|| self.unavailable("no RAPL dram domain"))?;
        self.max_range_uj = read_counter(&domain.join("max_energy_range_uj")).unwrap_or(0);
        let energy = read_counter(&domain.join("energy_uj"))
            .map_err(|err| self.unavailable(format!("cannot read energy counter: {err}")))?;
        debug!("{}: opened {}", self.name(), domain.display());
        self.last = Some((energy, Instant::now()));
        self.domain = Some(domain);
        Ok(())
    }

    fn read_watts(&mut self) -> Result<f64> {
        let (Some(domain), Some((previous, since))) = (&self.domain, self.last) else {
            return Err(self.unavailable("source has not been opened"));
        };
        let energy = read_counter(&domain.join("energy_uj"))
            .map_err(|err| self.unavailable(format!("cannot read energy counter: {err}")))?;
        let now = Instant::now();
        let seconds = now.duration_since(since).as_secs_f64();
        if seconds <= 0.0 {
            return Err(self.unavailable("no time elapsed since the previous reading"));
        }
        self.last = Some((energy, now));
        let joules = energy_delta(previous, energy, self.max_range_uj) as f64 / 1e6;
        Ok(joules / seconds)
    }
}
