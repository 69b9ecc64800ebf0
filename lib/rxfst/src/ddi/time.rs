// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Moments, periodics, etc.

use super::sync::KCondvar;
use super::sync::KMutex;
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use core::marker::PhantomData;
use core::ops::Add;
use core::time::Duration;
use std::thread;
use std::thread::JoinHandle;
use std::time::Instant;

/// The number of milliseconds in a second.
pub const MILLIS: u64 = 1_000;
/// The number of nanoseconds in a second.
pub const NANOS: u64 = 1_000_000_000;
/// The conversion from nanoseconds to milliseconds.
pub const NANOS_TO_MILLIS: u64 = 1_000_000;

/// A moment in time.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Moment {
    inner: Instant,
}

impl Add<Duration> for Moment {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Moment { inner: self.inner + rhs }
    }
}

impl Moment {
    /// Compute the delta between `self - earlier` and return as
    /// milliseconds.
    pub fn delta_as_millis(&self, earlier: Moment) -> u64 {
        let delta = self.inner.duration_since(earlier.inner);
        delta.as_secs() * MILLIS + u64::from(delta.subsec_millis())
    }

    pub fn now() -> Self {
        Self { inner: Instant::now() }
    }
}

impl Default for Moment {
    fn default() -> Self {
        Self::now()
    }
}

// The kernel periodic this abstraction is modeled on only arms at an
// even multiple of 10ms; the system silently rounds anything finer.
// Enforce that contract here so a developer finds out at construction
// rather than by measuring.
const SYSTEM_PERIODIC_RESOLUTION_IN_NANOS: u64 = 10_000_000;

/// An interval designed specifically for a [`Periodic`].
///
/// Ensures that an interval value is always a multiple of 10ms as
/// dictated by the periodic timer API this abstraction is built upon.
#[derive(Clone, Copy, Debug)]
pub struct Interval(u64);

impl Interval {
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.0)
    }

    pub const fn from_duration(dur: Duration) -> Self {
        let secs = dur.as_secs();
        let nanos = dur.subsec_nanos() as u64;

        assert!(
            nanos % SYSTEM_PERIODIC_RESOLUTION_IN_NANOS == 0,
            "interval is not multiple of 10ms"
        );

        Self((secs * NANOS) + nanos)
    }

    /// Build an interval from a millisecond count, refusing values the
    /// periodic cannot honor.
    pub fn try_from_millis(ms: u64) -> Option<Self> {
        let nanos = ms.checked_mul(NANOS_TO_MILLIS)?;
        if nanos == 0 || nanos % SYSTEM_PERIODIC_RESOLUTION_IN_NANOS != 0 {
            return None;
        }
        Some(Self(nanos))
    }
}

struct PeriodicCtl {
    stopped: KMutex<bool>,
    cv: KCondvar,
}

/// Execute a callback periodically.
///
/// The `Box<T>` is owned by the periodic itself and the callback is
/// passed an `&mut T`. Dropping the periodic cancels it synchronously:
/// the worker is joined before drop returns, so once the owner is gone
/// the callback can never fire again. The flow table's bundling timer
/// relies on that to never outlive the shared memory it flushes.
///
/// NOTE: A periodic **cannot** implement `Clone` as it represents a
/// unique resource on the system.
pub struct Periodic<T: Send + 'static> {
    #[allow(dead_code)]
    name: String,
    ctl: Arc<PeriodicCtl>,
    thread: Option<JoinHandle<()>>,
    _marker: PhantomData<T>,
}

impl<T: Send + 'static> Periodic<T> {
    /// Create a new periodic firing every `interval`.
    pub fn new(
        name: &str,
        cb: fn(&mut T),
        arg: Box<T>,
        interval: Interval,
    ) -> Self {
        Self::with_initial_delay(name, cb, arg, interval, interval)
    }

    /// Create a periodic whose first firing comes after `first` and
    /// which then fires every `interval`.
    pub fn with_initial_delay(
        name: &str,
        cb: fn(&mut T),
        arg: Box<T>,
        first: Interval,
        interval: Interval,
    ) -> Self {
        let ctl = Arc::new(PeriodicCtl {
            stopped: KMutex::new(false),
            cv: KCondvar::new(),
        });
        let worker_ctl = Arc::clone(&ctl);
        let period = interval.as_duration();
        let mut wait = first.as_duration();

        let thread = thread::Builder::new()
            .name(format!("periodic-{name}"))
            .spawn(move || {
                let mut arg = arg;
                loop {
                    let deadline = Instant::now() + wait;
                    let mut stopped = worker_ctl.stopped.lock();
                    loop {
                        if *stopped {
                            return;
                        }
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        let (guard, _) = worker_ctl
                            .cv
                            .wait_timeout(stopped, deadline - now);
                        stopped = guard;
                    }
                    drop(stopped);
                    cb(&mut arg);
                    wait = period;
                }
            })
            .expect("periodic worker creation cannot fail");

        Self {
            name: String::from(name),
            ctl,
            thread: Some(thread),
            _marker: PhantomData,
        }
    }
}

impl<T: Send + 'static> Drop for Periodic<T> {
    fn drop(&mut self) {
        *self.ctl.stopped.lock() = true;
        self.ctl.cv.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
