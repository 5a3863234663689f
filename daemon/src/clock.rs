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

//! Time sources and bounded polling.
//!
//! Every blocking wait in fabricd (mailbox status polling, waiting for the fabric to report
//! configuration done) goes through [`poll_until`] with an explicit [`PollPolicy`]. The time
//! source is a [`Clock`] trait object so tests can inject a [`ManualClock`] instead of
//! sleeping on the wall clock.

use crate::error::FabricError;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A monotonic time source which can also block the caller.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// The wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            std::hint::spin_loop();
        } else {
            std::thread::sleep(duration);
        }
    }
}

/// A clock which only moves when slept on, or by `tick` on every call to [`Clock::now`].
///
/// With a non-zero tick, zero-interval spin loops still reach their deadline.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    tick: Duration,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::with_tick(Duration::ZERO)
    }

    pub fn with_tick(tick: Duration) -> Self {
        ManualClock {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            tick,
        }
    }

    /// Time this clock has advanced since it was created.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += self.tick;
        self.origin + *elapsed
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Bound and cadence of a polling loop.
///
/// An `interval` of zero means a busy spin with no backoff, which is what the mailbox
/// handshake uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollPolicy {
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        PollPolicy { timeout, interval }
    }

    /// Busy-spin for at most `timeout`.
    pub const fn spin(timeout: Duration) -> Self {
        PollPolicy {
            timeout,
            interval: Duration::ZERO,
        }
    }
}

/// Evaluate `condition` until it returns `true` or the policy's deadline passes.
///
/// The condition is always evaluated at least once, and once more after the deadline is
/// observed so a condition met during the final sleep is not reported as a timeout.
///
/// # Returns: `Result<bool, FabricError>`
/// * `Ok(true)` - The condition was met
/// * `Ok(false)` - The deadline passed first
/// * `Err(FabricError)` - The condition itself failed
pub fn poll_until<F>(
    clock: &dyn Clock,
    policy: PollPolicy,
    mut condition: F,
) -> Result<bool, FabricError>
where
    F: FnMut() -> Result<bool, FabricError>,
{
    let deadline = clock.now() + policy.timeout;
    loop {
        if condition()? {
            return Ok(true);
        }
        if clock.now() >= deadline {
            return condition();
        }
        clock.sleep(policy.interval);
    }
}
