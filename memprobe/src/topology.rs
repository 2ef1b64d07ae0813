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

//! NUMA node discovery and thread placement.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Where Linux exposes the NUMA node tree.
pub const NODE_ROOT: &str = "/sys/devices/system/node";

/// Parses a kernel CPU list such as `0-3,8,10-11`.
pub fn parse_cpu_list(list: &str) -> Option<Vec<usize>> {
    let mut cpus = Vec::new();
    for part in list.trim().split(',').filter(|part| !part.is_empty()) {
        match part.split_once('-') {
            Some((first, last)) => {
                let first: usize = first.trim().parse().ok()?;
                let last: usize = last.trim().parse().ok()?;
                if last < first {
                    return None;
                }
                cpus.extend(first..=last);
            }
            None => cpus.push(part.trim().parse().ok()?),
        }
    }
    Some(cpus)
}

/// Reads the NUMA node tree rooted at a sysfs directory.
#[derive(Debug, Clone)]
pub struct NodeTopology {
    root: PathBuf,
}

impl Default for NodeTopology {
    fn default() -> Self {
        Self::new(NODE_ROOT)
    }
}

impl NodeTopology {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    /// CPUs belonging to `node`, in ascending order.
    pub fn node_cpus(&self, node: u32) -> io::Result<Vec<usize>> {
        let path = self.root.join(format!("node{node}")).join("cpulist");
        let list = fs::read_to_string(&path)?;
        parse_cpu_list(&list).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed cpu list in {}: {list:?}", path.display()),
            )
        })
    }

    /// NUMA nodes present on the machine, in ascending order.
    pub fn nodes(&self) -> io::Result<Vec<u32>> {
        let mut nodes: Vec<u32> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.strip_prefix("node")?.parse().ok())
            .collect();
        nodes.sort_unstable();
        Ok(nodes)
    }
}

/// Restricts the calling thread to a single CPU.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpu: usize) -> io::Result<()> {
    use nix::{
        sched::{sched_setaffinity, CpuSet},
        unistd::Pid,
    };

    let mut set = CpuSet::new();
    set.set(cpu)?;
    sched_setaffinity(Pid::from_raw(0), &set)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_cpu: usize) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "thread affinity is only supported on Linux"))
}
