//! Blocking until a card's saved state has been restored.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::coordinator::{BootCoordinator, Validity};
use crate::element::{self, validate_boot_time, CardBackend, CardControl, OpenMode};
use crate::error::Result;

/// Window used when neither the caller nor the group names one.
pub const DEFAULT_SYNC_TIME: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOutcome {
    /// `restore_time` became set while waiting.
    Restored,
    /// Already restored when checked up front.
    AlreadyRestored,
    /// No live boot epoch covers the card.
    NotParticipating,
    /// The card has no `.Boot` element.
    NoElement,
    TimedOut,
    /// The card's boot time fell outside the window.
    BootExpired,
}

impl WaitOutcome {
    pub fn is_restored(self) -> bool {
        matches!(self, WaitOutcome::Restored | WaitOutcome::AlreadyRestored)
    }
}

/// Event subscription that is switched off again on drop.
struct Subscription {
    ctl: Box<dyn CardControl>,
}

impl Subscription {
    fn new(mut ctl: Box<dyn CardControl>) -> Result<Self> {
        ctl.subscribe(true)?;
        Ok(Self { ctl })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Err(e) = self.ctl.subscribe(false) {
            debug!(card = self.ctl.card(), error = %e, "unsubscribe failed");
        }
    }
}

pub struct BootWaiter<'a, B, C> {
    coordinator: &'a BootCoordinator<B, C>,
    default_timeout: i64,
}

impl<'a, B: CardBackend, C: Clock> BootWaiter<'a, B, C> {
    pub fn new(coordinator: &'a BootCoordinator<B, C>) -> Self {
        Self {
            coordinator,
            default_timeout: DEFAULT_SYNC_TIME,
        }
    }

    pub fn with_default_timeout(mut self, secs: i64) -> Self {
        self.default_timeout = secs;
        self
    }

    /// Wait for `card` to report a restore.
    ///
    /// With `timeout <= 0` the group's window (or the default) is used, and
    /// a card that is already restored or not in a valid epoch returns at
    /// once. The effective timeout shrinks to the card's own `sync_time`
    /// when that is shorter.
    pub fn wait_for_card(&self, timeout: i64, card: i32) -> Result<WaitOutcome> {
        let mut timeout = timeout;

        if timeout <= 0 {
            let validity = match self.coordinator.check_validity(card, -1) {
                Ok(validity) => validity,
                Err(e) => {
                    debug!(card, error = %e, "validity check failed");
                    Validity::default()
                }
            };
            timeout = validity
                .synctime
                .filter(|&s| s > 0)
                .unwrap_or(self.default_timeout);
            if validity.restored {
                debug!(card, "already restored");
                return Ok(WaitOutcome::AlreadyRestored);
            }
            if !validity.valid {
                debug!(card, "no valid boot epoch, not waiting");
                return Ok(WaitOutcome::NotParticipating);
            }
        }

        let ctl = self
            .coordinator
            .backend()
            .open(card, OpenMode::ReadOnly)?;
        match ctl.boot_shape()? {
            Some(shape) => shape.check(card)?,
            None => {
                debug!(card, "boot element not present");
                return Ok(WaitOutcome::NoElement);
            }
        }

        let mut subscription = Subscription::new(ctl)?;
        let clock = self.coordinator.clock();
        let start = clock.monotonic()?;
        info!(card, timeout, "waiting for restore");

        loop {
            let now = clock.monotonic()?;
            let Some(params) = element::read(subscription.ctl.as_ref())? else {
                warn!(card, "boot element vanished while waiting");
                return Ok(WaitOutcome::NoElement);
            };

            if params.is_restored() {
                info!(card, restore_time = params.restore_time, "card restored");
                return Ok(WaitOutcome::Restored);
            }

            let elapsed = now.saturating_sub(start);
            if elapsed > timeout.saturating_add(1) {
                info!(card, elapsed, "timed out waiting for restore");
                return Ok(WaitOutcome::TimedOut);
            }
            let mut remaining = timeout.saturating_sub(elapsed);

            if params.sync_time > 0 && params.sync_time < timeout {
                timeout = params.sync_time;
            }
            if !validate_boot_time(params.boot_time, now, timeout) {
                info!(card, boot_time = params.boot_time, "boot time outside window");
                return Ok(WaitOutcome::BootExpired);
            }

            let age = now.saturating_sub(params.boot_time);
            remaining = remaining.min(timeout.saturating_sub(age)).max(1);

            debug!(card, remaining, "waiting for control events");
            if !subscription
                .ctl
                .wait(Duration::from_secs(remaining.unsigned_abs()))?
            {
                continue;
            }

            while let Some(event) = subscription.ctl.read_event()? {
                if event.is_boot_value_change() {
                    debug!(card, "boot element changed");
                    break;
                }
            }
        }
    }
}
