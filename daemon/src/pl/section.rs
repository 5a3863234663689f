// This file is part of fabricd, an application to reconfigure FPGA fabric and drive the IO processors inside it.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// fabricd is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// fabricd is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! The reconfiguration section.
//!
//! Every [`PlState`](crate::pl::PlState) owns one [`FabricGate`]: a generation counter plus
//! a reader/writer lock. Register access through a [`PlToken`] holds the read side for as
//! long as the returned [`FabricAccess`] lives, and a reconfiguration holds the write side
//! from its first check until its commit. A download therefore never overlaps an access to
//! the fabric it replaces.
//!
//! Read sections nest within a thread. A thread already inside the section of a gate is not
//! made to lock it again, so a reconfiguration queued between the outer and inner entry
//! cannot deadlock it. Entering the write side while inside the read side on the same thread
//! deadlocks.

use log::trace;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

thread_local! {
    static ENTERED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Default)]
pub(crate) struct FabricGate {
    generation: AtomicU64,
    section: RwLock<()>,
}

impl FabricGate {
    fn id(&self) -> usize {
        self as *const FabricGate as usize
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Move to the next generation. Callers hold the write side.
    pub(crate) fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Wait for every reader to leave, then keep them out until the guard is dropped.
    pub(crate) fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.section.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn shared(&self) -> FabricAccess<'_> {
        let id = self.id();
        if ENTERED.with(|entered| entered.borrow().contains(&id)) {
            return FabricAccess { id, guard: None };
        }
        let guard = self.section.read().unwrap_or_else(|e| e.into_inner());
        ENTERED.with(|entered| entered.borrow_mut().push(id));
        FabricAccess {
            id,
            guard: Some(guard),
        }
    }
}

/// The read side of the reconfiguration section.
///
/// Reconfiguration of the fabric waits until every outstanding access has been dropped.
#[must_use = "the section is left as soon as the access is dropped"]
pub struct FabricAccess<'a> {
    id: usize,
    guard: Option<RwLockReadGuard<'a, ()>>,
}

impl FabricAccess<'_> {
    /// An access that holds nothing, for windows not tied to any bitstream.
    pub(crate) fn unguarded() -> FabricAccess<'static> {
        FabricAccess { id: 0, guard: None }
    }
}

impl Drop for FabricAccess<'_> {
    fn drop(&mut self) {
        if self.guard.is_some() {
            ENTERED.with(|entered| {
                let mut entered = entered.borrow_mut();
                if let Some(pos) = entered.iter().rposition(|id| *id == self.id) {
                    entered.swap_remove(pos);
                }
            });
        }
    }
}

/// Generation marker carried by register windows created from a
/// [`PlSnapshot`](crate::pl::PlSnapshot).
#[derive(Debug, Clone)]
pub struct PlToken {
    generation: u64,
    gate: Arc<FabricGate>,
}

impl PlToken {
    pub(crate) fn new(generation: u64, gate: Arc<FabricGate>) -> PlToken {
        PlToken { generation, gate }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.gate.generation() == self.generation
    }

    /// Enter the read side of the section, unless the token is already outdated.
    ///
    /// # Returns: `Option<FabricAccess>`
    /// * `Some(FabricAccess)` - The bitstream is still loaded and stays loaded until the
    ///   access is dropped
    /// * `None` - A reconfiguration has replaced the bitstream
    pub fn enter(&self) -> Option<FabricAccess<'_>> {
        let access = self.gate.shared();
        if !self.is_current() {
            trace!("Refusing entry for outdated generation {}", self.generation);
            return None;
        }
        Some(access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[gtest]
    fn tokens_go_stale_when_the_generation_advances() {
        let gate = Arc::new(FabricGate::default());
        let token = PlToken::new(gate.generation(), gate.clone());
        assert!(token.enter().is_some());
        {
            let _writer = gate.exclusive();
            gate.advance();
        }
        assert!(!token.is_current());
        assert!(token.enter().is_none());
    }

    #[gtest]
    fn writer_waits_for_readers() {
        let gate = Arc::new(FabricGate::default());
        let token = PlToken::new(0, gate.clone());
        let access = token.enter().expect("token is current");

        let (done_tx, done_rx) = mpsc::channel();
        let writer_gate = gate.clone();
        let writer = thread::spawn(move || {
            let _writer = writer_gate.exclusive();
            writer_gate.advance();
            done_tx.send(()).expect("send");
        });
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(access);
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("writer should finish once the reader leaves");
        writer.join().expect("writer panicked");
        assert!(!token.is_current());
    }

    #[gtest]
    fn nested_entries_do_not_block_behind_a_queued_writer() {
        let gate = Arc::new(FabricGate::default());
        let token = PlToken::new(0, gate.clone());
        let outer = token.enter().expect("token is current");

        let writer_gate = gate.clone();
        let writer = thread::spawn(move || {
            let _writer = writer_gate.exclusive();
            writer_gate.advance();
        });
        thread::sleep(Duration::from_millis(50));
        let inner = token.enter();
        assert!(inner.is_some());
        drop(inner);
        drop(outer);
        writer.join().expect("writer panicked");
        assert!(token.enter().is_none());
    }
}
