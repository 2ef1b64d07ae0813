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

//! Pointer chains built in place inside the measured memory.
//!
//! Each slot stores the index of the slot visited after it. Both builders
//! produce a single cycle through every slot, so a chase never settles into a
//! short loop that fits in cache.

use rand::Rng;

use crate::kernels::Word;

/// Links the slots in strided order: `0, s, 2s, ..` then `1, 1 + s, ..` and
/// so on, closing the cycle back to the first slot. A negative stride walks
/// the same order from the last slot downwards.
pub fn link_sequential<W: Word>(slots: &mut [W], stride: isize) {
    let len = slots.len();
    if len == 0 {
        return;
    }
    let step = stride.unsigned_abs().clamp(1, len);
    let position = |rank: usize| {
        let forward = strided_index(rank, len, step);
        if stride < 0 {
            len - 1 - forward
        } else {
            forward
        }
    };

    let first = position(0);
    let mut previous = first;
    for rank in 1..len {
        let next = position(rank);
        slots[previous] = W::from_u64(next as u64);
        previous = next;
    }
    slots[previous] = W::from_u64(first as u64);
}

/// Maps the `rank`-th visit of a strided walk to a slot index.
fn strided_index(rank: usize, len: usize, step: usize) -> usize {
    // Lane `lane` holds the slots congruent to `lane` modulo `step`; the first
    // `len % step` lanes are one slot longer than the rest.
    let short = len / step;
    let long_lanes = len % step;
    let long_span = long_lanes * (short + 1);
    let (lane, offset) = if rank < long_span {
        (rank / (short + 1), rank % (short + 1))
    } else {
        let rest = rank - long_span;
        (long_lanes + rest / short, rest % short)
    };
    lane + offset * step
}

/// Links the slots into one uniformly random cycle (Sattolo's algorithm).
pub fn link_random<W: Word, R: Rng>(slots: &mut [W], rng: &mut R) {
    for (index, slot) in slots.iter_mut().enumerate() {
        *slot = W::from_u64(index as u64);
    }
    for index in (1..slots.len()).rev() {
        let other = rng.gen_range(0..index);
        slots.swap(index, other);
    }
}

/// Length of the cycle through `start`, or `None` if the chain leaves the
/// slice or does not return to `start` within `slots.len()` steps.
pub fn cycle_length<W: Word>(slots: &[W], start: usize) -> Option<usize> {
    let mut position = start;
    for length in 1..=slots.len() {
        position = slots.get(position)?.low_u64() as usize;
        if position == start {
            return Some(length);
        }
    }
    None
}
