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

//! Access kernels over slices of fixed-width words.
//!
//! Every load and store is volatile so the compiler cannot merge, hoist or
//! drop the memory traffic being measured. The `dummy_*` kernels perform the
//! same loop arithmetic without touching memory; their cost is subtracted from
//! the measured time.

use core::{hint::black_box, mem, ptr};

use static_assertions::const_assert_eq;

/// A plain-data access unit. Every bit pattern is a valid value.
pub trait Word: Copy + Send + Sync + 'static {
    /// Builds a word whose low 64 bits hold `value` (truncated for narrower
    /// words).
    fn from_u64(value: u64) -> Self;

    /// The low 64 bits of the word, zero-extended for narrower words.
    fn low_u64(self) -> u64;
}

macro_rules! impl_word {
    ($($ty:ty),*) => {
        $(
            impl Word for $ty {
                #[inline(always)]
                fn from_u64(value: u64) -> Self {
                    value as $ty
                }

                #[inline(always)]
                fn low_u64(self) -> u64 {
                    self as u64
                }
            }
        )*
    };
}

impl_word!(u8, u16, u32, u64, u128);

/// A 256-bit access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(32))]
pub struct W256(pub [u64; 4]);

/// A 512-bit access, one cache line on most parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(64))]
pub struct W512(pub [u64; 8]);

const_assert_eq!(mem::size_of::<W256>(), 32);
const_assert_eq!(mem::align_of::<W256>(), 32);
const_assert_eq!(mem::size_of::<W512>(), 64);
const_assert_eq!(mem::align_of::<W512>(), 64);

impl Word for W256 {
    #[inline(always)]
    fn from_u64(value: u64) -> Self {
        Self([value, 0, 0, 0])
    }

    #[inline(always)]
    fn low_u64(self) -> u64 {
        self.0[0]
    }
}

impl Word for W512 {
    #[inline(always)]
    fn from_u64(value: u64) -> Self {
        Self([value, 0, 0, 0, 0, 0, 0, 0])
    }

    #[inline(always)]
    fn low_u64(self) -> u64 {
        self.0[0]
    }
}

/// Reinterprets a byte slice as words.
///
/// Returns `None` unless the slice is aligned for `W` and its length is a
/// multiple of the word size.
pub fn as_words_mut<W: Word>(bytes: &mut [u8]) -> Option<&mut [W]> {
    // SAFETY: `Word` types are plain data without padding for which every bit
    // pattern is valid, so viewing initialized bytes as words is sound.
    let (prefix, words, suffix) = unsafe { bytes.align_to_mut::<W>() };
    (prefix.is_empty() && suffix.is_empty()).then_some(words)
}

#[inline(always)]
fn load<W: Word>(word: &W) -> W {
    // SAFETY: `word` is a valid, aligned reference.
    unsafe { ptr::read_volatile(word) }
}

#[inline(always)]
fn store<W: Word>(word: &mut W, value: W) {
    // SAFETY: `word` is a valid, aligned, exclusive reference.
    unsafe { ptr::write_volatile(word, value) }
}

fn step(stride: isize) -> usize {
    stride.unsigned_abs().max(1)
}

/// Accesses performed by one strided pass over `len` words.
pub fn accesses_per_pass(len: usize, stride: isize) -> usize {
    len.div_ceil(step(stride))
}

/// One strided pass of loads. Returns a fold of the loaded values.
pub fn read_pass<W: Word>(words: &[W], stride: isize) -> u64 {
    let mut acc = 0u64;
    if stride >= 0 {
        for word in words.iter().step_by(step(stride)) {
            acc ^= load(word).low_u64();
        }
    } else {
        for word in words.iter().rev().step_by(step(stride)) {
            acc ^= load(word).low_u64();
        }
    }
    acc
}

/// One strided pass of stores of `value`.
pub fn write_pass<W: Word>(words: &mut [W], stride: isize, value: W) -> u64 {
    if stride >= 0 {
        for word in words.iter_mut().step_by(step(stride)) {
            store(word, value);
        }
    } else {
        for word in words.iter_mut().rev().step_by(step(stride)) {
            store(word, value);
        }
    }
    value.low_u64()
}

/// One strided pass copying `src` into `dst`.
pub fn copy_pass<W: Word>(src: &[W], dst: &mut [W], stride: isize) -> u64 {
    let mut last = 0u64;
    if stride >= 0 {
        for (to, from) in dst.iter_mut().zip(src).step_by(step(stride)) {
            let value = load(from);
            store(to, value);
            last = value.low_u64();
        }
    } else {
        for (to, from) in dst.iter_mut().zip(src).rev().step_by(step(stride)) {
            let value = load(from);
            store(to, value);
            last = value.low_u64();
        }
    }
    last
}

/// The loop structure of a strided pass, without the memory accesses.
pub fn dummy_pass(len: usize, stride: isize) -> u64 {
    let mut acc = 0u64;
    for index in (0..len).step_by(step(stride)) {
        acc ^= black_box(index) as u64;
    }
    acc
}

/// Follows `steps` links of a chain starting at slot `start`. Each slot holds
/// the index of its successor. Returns the slot reached.
pub fn chase_read<W: Word>(slots: &[W], start: usize, steps: u64) -> usize {
    let mut position = start;
    for _ in 0..steps {
        position = load(&slots[position]).low_u64() as usize;
    }
    position
}

/// Like [`chase_read`], but stores every link back after loading it, which
/// leaves the chain intact while generating write traffic.
pub fn chase_write<W: Word>(slots: &mut [W], start: usize, steps: u64) -> usize {
    let mut position = start;
    for _ in 0..steps {
        let slot = &mut slots[position];
        let link = load(slot);
        store(slot, link);
        position = link.low_u64() as usize;
    }
    position
}

/// The loop structure of a chase over `len` slots, without the memory
/// accesses.
pub fn dummy_chase(len: usize, start: usize, steps: u64) -> usize {
    let mut position = start;
    for _ in 0..steps {
        position = black_box(position + 1);
        if position >= len {
            position = 0;
        }
    }
    position
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[googletest::test]
    fn word_views_require_alignment_and_whole_words() {
        let mut backing = vec![0u64; 16];
        // SAFETY: u64 has no padding; the view covers the same allocation.
        let bytes = unsafe {
            core::slice::from_raw_parts_mut(backing.as_mut_ptr().cast::<u8>(), 128)
        };
        expect_that!(as_words_mut::<u64>(bytes).map(|words| words.len()), some(eq(16)));
        expect_that!(as_words_mut::<u64>(&mut bytes[1..9]).is_none(), eq(true));
        expect_that!(as_words_mut::<u32>(&mut bytes[..6]).is_none(), eq(true));
    }

    #[googletest::test]
    fn wide_words_carry_links_in_the_low_lane() {
        expect_that!(W512::from_u64(42).low_u64(), eq(42));
        expect_that!(W256::from_u64(7).0[1], eq(0));
        expect_that!(u8::from_u64(0x1ff).low_u64(), eq(0xff));
    }

    #[googletest::test]
    fn strided_passes_touch_every_stride_th_word() {
        let mut words = vec![0u32; 10];
        write_pass(&mut words, 3, 1);
        let touched: Vec<usize> =
            words.iter().enumerate().filter(|(_, w)| **w == 1).map(|(i, _)| i).collect();
        assert_that!(touched.len(), eq(accesses_per_pass(10, 3)));
        assert_that!(touched[1], eq(3));

        let mut reversed = vec![0u32; 10];
        write_pass(&mut reversed, -3, 1);
        expect_that!(reversed[9], eq(1));
        expect_that!(reversed[6], eq(1));
        expect_that!(reversed[0], eq(1));
        expect_that!(reversed[8], eq(0));
    }

    #[googletest::test]
    fn read_pass_folds_loaded_values() {
        let words = vec![1u64, 2, 4, 8];
        expect_that!(read_pass(&words, 1), eq(15));
        expect_that!(read_pass(&words, 2), eq(5));
        expect_that!(read_pass(&words, -2), eq(10));
    }

    #[googletest::test]
    fn copy_pass_mirrors_source() {
        let src = vec![5u16, 6, 7, 8];
        let mut dst = vec![0u16; 4];
        copy_pass(&src, &mut dst, 1);
        assert_that!(dst[3], eq(8));
        assert_that!(dst[0], eq(5));
    }

    #[googletest::test]
    fn chase_follows_links_and_preserves_them() {
        let mut slots: Vec<u64> = vec![2, 0, 3, 1];
        expect_that!(chase_read(&slots, 0, 4), eq(0));
        expect_that!(chase_read(&slots, 0, 3), eq(1));
        expect_that!(chase_write(&mut slots, 0, 2), eq(3));
        expect_that!(slots[2], eq(3));
    }

    #[googletest::test]
    fn dummy_chase_wraps() {
        expect_that!(dummy_chase(4, 3, 1), eq(0));
        expect_that!(dummy_chase(4, 0, 6), eq(2));
        expect_that!(dummy_pass(8, 2), eq(2 ^ 4 ^ 6));
    }
}
