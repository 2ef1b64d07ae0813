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

//! Dedicated OS threads that each run one [`Runnable`] to completion.
//!
//! A runnable records its own outcome; the owner reads it back after
//! [`Thread::join`] returns the runnable. Scoped threads let benchmark workers
//! borrow their slice of the memory region directly.

use std::thread::{Builder, JoinHandle, Scope, ScopedJoinHandle};

use crate::error::{Error, Result};

/// A unit of work executed on a dedicated thread.
pub trait Runnable: Send {
    /// Runs the work to completion. Failures are stored in the runnable's own
    /// state rather than returned.
    fn run(&mut self);
}

enum Handle<'scope, R> {
    Owned(JoinHandle<R>),
    Scoped(ScopedJoinHandle<'scope, R>),
}

/// Configuration for a thread before it is spawned.
#[derive(Debug, Clone)]
pub struct ThreadBuilder {
    name: String,
    stack_size: Option<usize>,
}

impl ThreadBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), stack_size: None }
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    fn builder(&self) -> Builder {
        let builder = Builder::new().name(self.name.clone());
        match self.stack_size {
            Some(bytes) => builder.stack_size(bytes),
            None => builder,
        }
    }

    fn spawn_failure(&self, source: std::io::Error) -> Error {
        Error::ThreadSpawnFailure { name: self.name.clone(), source }
    }

    /// Spawns a detached-lifetime thread running `runnable`.
    pub fn spawn<R: Runnable + 'static>(self, mut runnable: R) -> Result<Thread<'static, R>> {
        let handle = self
            .builder()
            .spawn(move || {
                runnable.run();
                runnable
            })
            .map_err(|err| self.spawn_failure(err))?;
        Ok(Thread { name: self.name, handle: Handle::Owned(handle) })
    }

    /// Spawns a thread inside `scope`, so `runnable` may borrow from the
    /// enclosing stack frame.
    pub fn spawn_scoped<'scope, 'env, R: Runnable + 'scope>(
        self,
        scope: &'scope Scope<'scope, 'env>,
        mut runnable: R,
    ) -> Result<Thread<'scope, R>> {
        let handle = self
            .builder()
            .spawn_scoped(scope, move || {
                runnable.run();
                runnable
            })
            .map_err(|err| self.spawn_failure(err))?;
        Ok(Thread { name: self.name, handle: Handle::Scoped(handle) })
    }
}

/// An OS thread running exactly one [`Runnable`].
pub struct Thread<'scope, R> {
    name: String,
    handle: Handle<'scope, R>,
}

impl<R: Runnable + 'static> Thread<'static, R> {
    pub fn start(name: impl Into<String>, runnable: R) -> Result<Self> {
        ThreadBuilder::new(name).spawn(runnable)
    }
}

impl<'scope, R: Runnable + 'scope> Thread<'scope, R> {
    pub fn start_scoped<'env>(
        scope: &'scope Scope<'scope, 'env>,
        name: impl Into<String>,
        runnable: R,
    ) -> Result<Self> {
        ThreadBuilder::new(name).spawn_scoped(scope, runnable)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks until `run()` returns and hands the runnable back.
    pub fn join(self) -> Result<R> {
        let joined = match self.handle {
            Handle::Owned(handle) => handle.join(),
            Handle::Scoped(handle) => handle.join(),
        };
        joined.map_err(|_| Error::ThreadPanicked { name: self.name })
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    struct Counter {
        limit: u64,
        total: u64,
    }

    impl Runnable for Counter {
        fn run(&mut self) {
            self.total = (1..=self.limit).sum();
        }
    }

    struct Fill<'a> {
        bytes: &'a mut [u8],
        value: u8,
    }

    impl Runnable for Fill<'_> {
        fn run(&mut self) {
            self.bytes.fill(self.value);
        }
    }

    #[derive(Debug)]
    struct Panics;

    impl Runnable for Panics {
        fn run(&mut self) {
            panic!("worker blew up");
        }
    }

    #[googletest::test]
    fn join_returns_the_runnable_with_its_result() {
        let thread = Thread::start("counter", Counter { limit: 100, total: 0 }).expect("spawn");
        assert_that!(thread.name(), eq("counter"));
        let counter = thread.join().expect("join");
        assert_that!(counter.total, eq(5050));
    }

    #[googletest::test]
    fn scoped_threads_borrow_disjoint_slices() {
        let mut buffer = vec![0u8; 64];
        std::thread::scope(|scope| {
            let (left, right) = buffer.split_at_mut(32);
            let a = Thread::start_scoped(scope, "left", Fill { bytes: left, value: 1 })
                .expect("spawn left");
            let b = Thread::start_scoped(scope, "right", Fill { bytes: right, value: 2 })
                .expect("spawn right");
            a.join().expect("join left");
            b.join().expect("join right");
        });
        assert_that!(buffer[0], eq(1));
        assert_that!(buffer[63], eq(2));
    }

    #[googletest::test]
    fn panicking_runnable_is_reported_on_join() {
        let thread = Thread::start("panics", Panics).expect("spawn");
        assert_that!(thread.join(), err(matches_pattern!(Error::ThreadPanicked { .. })));
    }

    #[cfg(target_os = "linux")]
    #[googletest::test]
    fn refused_spawn_is_a_synchronous_failure() {
        let result = ThreadBuilder::new("huge").stack_size(1 << 62).spawn(Panics);
        assert_that!(result.map(|_| ()), err(matches_pattern!(Error::ThreadSpawnFailure { .. })));
    }
}
