//! Clock readers, in whole seconds.
//!
//! The monotonic clock measures durations inside one boot session; the wall
//! clock records when a group epoch happened and detects reboots and clock
//! jumps. Both are read through [`Clock`] so the coordinator can be driven
//! deterministically in tests.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{BootError, Result};

pub trait Clock: Send + Sync {
    /// Seconds on a clock that never jumps (`CLOCK_MONOTONIC_RAW`).
    fn monotonic(&self) -> Result<i64>;

    /// Seconds since the Unix epoch (`CLOCK_REALTIME`).
    fn realtime(&self) -> Result<i64>;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn monotonic(&self) -> Result<i64> {
        (**self).monotonic()
    }

    fn realtime(&self) -> Result<i64> {
        (**self).realtime()
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn monotonic(&self) -> Result<i64> {
        (**self).monotonic()
    }

    fn realtime(&self) -> Result<i64> {
        (**self).realtime()
    }
}

/// The host clocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    fn read(id: libc::clockid_t) -> Result<i64> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
        let rc = unsafe { libc::clock_gettime(id, &mut ts) };
        if rc < 0 {
            return Err(BootError::Clock(std::io::Error::last_os_error()));
        }
        Ok(ts.tv_sec as i64)
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> Result<i64> {
        Self::read(libc::CLOCK_MONOTONIC_RAW)
    }

    fn realtime(&self) -> Result<i64> {
        Self::read(libc::CLOCK_REALTIME)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    monotonic: AtomicI64,
    realtime: AtomicI64,
}

impl ManualClock {
    pub fn new(monotonic: i64, realtime: i64) -> Self {
        Self {
            monotonic: AtomicI64::new(monotonic),
            realtime: AtomicI64::new(realtime),
        }
    }

    /// Move both clocks forward by the same amount.
    pub fn advance(&self, secs: i64) {
        self.monotonic.fetch_add(secs, Ordering::SeqCst);
        self.realtime.fetch_add(secs, Ordering::SeqCst);
    }

    /// Step the wall clock alone, as an NTP correction or RTC reset would.
    pub fn set_realtime(&self, secs: i64) {
        self.realtime.store(secs, Ordering::SeqCst);
    }

    pub fn set_monotonic(&self, secs: i64) {
        self.monotonic.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> Result<i64> {
        Ok(self.monotonic.load(Ordering::SeqCst))
    }

    fn realtime(&self) -> Result<i64> {
        Ok(self.realtime.load(Ordering::SeqCst))
    }
}
