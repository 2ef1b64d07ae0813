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

//! The page-aligned memory region every run in a plan works on.
//!
//! Pages are placed on a NUMA node by first touch: when the region is bound
//! to a node, priming happens on a thread pinned to one of the node's CPUs.
//! On Linux a region can also be backed by huge pages from the kernel's
//! reserved pool.

use std::{
    alloc::{self, Layout},
    ptr::NonNull,
    slice,
};

use log::{debug, warn};

use crate::{
    error::{Error, Result},
    thread::{Runnable, ThreadBuilder},
    topology::{pin_current_thread, NodeTopology},
    LCG_MULTIPLIER,
};

pub const PAGE_SIZE: usize = 4096;

/// Huge page size requested for large-page regions.
pub const LARGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Fills `bytes` with a deterministic non-repeating pattern so no page is
/// left untouched or trivially compressible.
fn fill_pattern(bytes: &mut [u8], seed: u64) {
    let mut state = seed;
    for chunk in bytes.chunks_mut(8) {
        state = state.wrapping_mul(LCG_MULTIPLIER).wrapping_add(1);
        chunk.copy_from_slice(&state.to_ne_bytes()[..chunk.len()]);
    }
}

struct FirstTouch<'a> {
    bytes: &'a mut [u8],
    seed: u64,
    cpu: usize,
    pinned: Option<std::io::Result<()>>,
}

impl Runnable for FirstTouch<'_> {
    fn run(&mut self) {
        let pinned = pin_current_thread(self.cpu);
        if pinned.is_ok() {
            fill_pattern(self.bytes, self.seed);
        }
        self.pinned = Some(pinned);
    }
}

#[derive(Debug, Clone, Copy)]
enum Backing {
    Heap(Layout),
    #[cfg(target_os = "linux")]
    HugePages { mapped: usize },
}

#[cfg(target_os = "linux")]
fn map_huge_pages(len: usize) -> nix::Result<(NonNull<u8>, usize)> {
    use std::num::NonZeroUsize;

    use nix::{
        errno::Errno,
        sys::mman::{mmap_anonymous, MapFlags, ProtFlags},
    };

    let mapped = len.checked_next_multiple_of(LARGE_PAGE_SIZE).ok_or(Errno::ENOMEM)?;
    let length = NonZeroUsize::new(mapped).ok_or(Errno::EINVAL)?;
    // SAFETY: a new private anonymous mapping aliases no existing memory.
    let ptr = unsafe {
        mmap_anonymous(
            None,
            length,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_PRIVATE | MapFlags::MAP_HUGETLB,
        )
    }?;
    Ok((ptr.cast::<u8>(), mapped))
}

pub struct MemoryRegion {
    ptr: NonNull<u8>,
    len: usize,
    backing: Backing,
    numa_node: Option<u32>,
}

// SAFETY: the region exclusively owns its allocation and hands out access only
// through `&self` and `&mut self` borrows.
unsafe impl Send for MemoryRegion {}
// SAFETY: shared access is read-only through `as_slice`.
unsafe impl Sync for MemoryRegion {}

impl MemoryRegion {
    /// Allocates `len` zeroed bytes aligned to [`PAGE_SIZE`].
    pub fn allocate(len: usize, numa_node: Option<u32>) -> Result<Self> {
        if len == 0 {
            return Err(Error::execution("memory region must not be empty"));
        }
        let layout = Layout::from_size_align(len, PAGE_SIZE)
            .map_err(|err| Error::execution(format!("invalid region size {len}: {err}")))?;
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr)
            .ok_or_else(|| Error::execution(format!("cannot allocate {len} bytes")))?;
        debug!("allocated {len} byte region");
        Ok(Self { ptr, len, backing: Backing::Heap(layout), numa_node })
    }

    /// Allocates `len` zeroed bytes on huge pages, or on normal pages when
    /// none can be mapped.
    pub fn allocate_large(len: usize, numa_node: Option<u32>) -> Result<Self> {
        if len == 0 {
            return Err(Error::execution("memory region must not be empty"));
        }
        #[cfg(target_os = "linux")]
        {
            match map_huge_pages(len) {
                Ok((ptr, mapped)) => {
                    debug!("mapped {len} byte region on {mapped} bytes of huge pages");
                    return Ok(Self { ptr, len, backing: Backing::HugePages { mapped }, numa_node });
                }
                Err(err) => warn!("cannot map {len} bytes of huge pages ({err}); using normal pages"),
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            warn!("huge pages are only supported on Linux; using normal pages");
        }
        Self::allocate(len, numa_node)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn uses_large_pages(&self) -> bool {
        !matches!(self.backing, Backing::Heap(_))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn numa_node(&self) -> Option<u32> {
        self.numa_node
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the allocation is `len` initialized bytes owned by `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }

    /// Writes a pattern derived from `seed` over the whole region, from a
    /// thread on the region's NUMA node if it has one.
    pub fn prime(&mut self, seed: u64) {
        let Some(node) = self.numa_node else {
            fill_pattern(self.as_mut_slice(), seed);
            return;
        };
        if let Err(reason) = self.prime_on_node(node, seed) {
            warn!("priming on NUMA node {node} failed ({reason}); priming locally");
            fill_pattern(self.as_mut_slice(), seed);
        }
    }

    fn prime_on_node(&mut self, node: u32, seed: u64) -> std::result::Result<(), String> {
        let cpus = NodeTopology::default().node_cpus(node).map_err(|err| err.to_string())?;
        let cpu = *cpus.first().ok_or_else(|| format!("node {node} has no CPUs"))?;
        let bytes = self.as_mut_slice();
        let toucher = std::thread::scope(|scope| {
            let touch = FirstTouch { bytes, seed, cpu, pinned: None };
            ThreadBuilder::new(format!("first-touch-{node}"))
                .spawn_scoped(scope, touch)
                .and_then(|thread| thread.join())
        })
        .map_err(|err| err.to_string())?;
        match toucher.pinned {
            Some(Ok(())) => Ok(()),
            Some(Err(err)) => Err(format!("cannot pin to CPU {cpu}: {err}")),
            None => Err("first-touch thread did not run".to_string()),
        }
    }
}

impl Drop for MemoryRegion {
    fn drop(&mut self) {
        match self.backing {
            // SAFETY: `ptr` was returned by `alloc_zeroed` with this layout.
            Backing::Heap(layout) => unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) },
            #[cfg(target_os = "linux")]
            Backing::HugePages { mapped } => {
                // SAFETY: `ptr` is the start of a live mapping of `mapped` bytes
                // and no borrow of the region outlives `self`.
                if let Err(err) = unsafe { nix::sys::mman::munmap(self.ptr.cast(), mapped) } {
                    warn!("cannot unmap huge-page region: {err}");
                }
            }
        }
    }
}

impl std::fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("len", &self.len())
            .field("numa_node", &self.numa_node)
            .field("large_pages", &self.uses_large_pages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[googletest::test]
    fn region_is_page_aligned_and_zeroed() {
        let region = MemoryRegion::allocate(3 * PAGE_SIZE + 5, None).expect("region");
        expect_that!(region.len(), eq(3 * PAGE_SIZE + 5));
        expect_that!(region.as_slice().as_ptr() as usize % PAGE_SIZE, eq(0));
        expect_that!(region.as_slice().iter().all(|byte| *byte == 0), eq(true));
    }

    #[googletest::test]
    fn empty_region_is_rejected() {
        expect_that!(
            MemoryRegion::allocate(0, None).map(|_| ()),
            err(matches_pattern!(Error::BenchmarkExecutionFailure { .. }))
        );
    }

    #[googletest::test]
    fn large_page_region_is_usable_with_or_without_huge_pages() {
        let len = LARGE_PAGE_SIZE + PAGE_SIZE;
        let mut region = MemoryRegion::allocate_large(len, None).expect("region");
        expect_that!(region.len(), eq(len));
        expect_that!(region.as_slice().as_ptr() as usize % PAGE_SIZE, eq(0));
        expect_that!(region.as_slice().iter().all(|byte| *byte == 0), eq(true));
        region.prime(5);
        expect_that!(region.as_slice()[len - 8..].iter().any(|byte| *byte != 0), eq(true));
        expect_that!(
            MemoryRegion::allocate_large(0, None).map(|_| ()),
            err(matches_pattern!(Error::BenchmarkExecutionFailure { .. }))
        );
    }

    #[googletest::test]
    fn priming_is_deterministic() {
        let mut first = MemoryRegion::allocate(PAGE_SIZE + 3, None).expect("region");
        let mut second = MemoryRegion::allocate(PAGE_SIZE + 3, None).expect("region");
        first.prime(7);
        second.prime(7);
        expect_that!(first.as_slice() == second.as_slice(), eq(true));
        expect_that!(first.as_slice().iter().any(|byte| *byte != 0), eq(true));
        second.prime(8);
        expect_that!(first.as_slice() == second.as_slice(), eq(false));
    }

    #[googletest::test]
    fn priming_for_an_absent_node_falls_back_to_local() {
        let mut region = MemoryRegion::allocate(PAGE_SIZE, Some(u32::MAX)).expect("region");
        region.prime(1);
        expect_that!(region.numa_node(), some(eq(u32::MAX)));
        expect_that!(region.as_slice().iter().any(|byte| *byte != 0), eq(true));
    }
}
