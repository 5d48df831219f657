//! The `.Boot` control element and the per-card control interface.
//!
//! Every participating card carries one card-scope element named `.Boot`,
//! index 0, holding four 64-bit integers:
//!
//! ```text
//! [boot_time, sync_time, restore_time, primary_card]
//! ```
//!
//! Each slot is `-1` while unset. The element survives process restarts but
//! not a card reset. It is created on first write as an inactive user element
//! so the generic state save/restore path skips it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BootError, Result};

pub const BOOT_ELEMENT_NAME: &str = ".Boot";
pub const BOOT_ELEMENT_INDEX: u32 = 0;
pub const BOOT_VALUE_COUNT: u32 = 4;
pub const BOOT_VALUE_MIN: i64 = -1;
pub const BOOT_VALUE_MAX: i64 = i64::MAX;

/// Boot synchronization state stored on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootParams {
    /// Monotonic anchor of the group epoch this card joined.
    pub boot_time: i64,
    /// Synchronization window in seconds.
    pub sync_time: i64,
    /// When saved control state was actually re-applied.
    pub restore_time: i64,
    pub primary_card: i64,
}

impl BootParams {
    pub const UNSET: BootParams = BootParams {
        boot_time: -1,
        sync_time: -1,
        restore_time: -1,
        primary_card: -1,
    };

    pub fn from_values(values: [i64; 4]) -> Self {
        Self {
            boot_time: values[0],
            sync_time: values[1],
            restore_time: values[2],
            primary_card: values[3],
        }
    }

    pub fn values(&self) -> [i64; 4] {
        [
            self.boot_time,
            self.sync_time,
            self.restore_time,
            self.primary_card,
        ]
    }

    pub fn is_restored(&self) -> bool {
        self.restore_time > 0
    }
}

impl Default for BootParams {
    fn default() -> Self {
        Self::UNSET
    }
}

/// Value type of a control element, as far as `.Boot` cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Integer64,
    Other(String),
}

/// Type and value count of an existing `.Boot` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementShape {
    pub kind: ElementKind,
    pub count: u32,
}

impl ElementShape {
    pub fn boot() -> Self {
        Self {
            kind: ElementKind::Integer64,
            count: BOOT_VALUE_COUNT,
        }
    }

    /// Reject anything that is not exactly 4 x int64.
    pub fn check(&self, card: i32) -> Result<()> {
        match &self.kind {
            ElementKind::Integer64 if self.count == BOOT_VALUE_COUNT => Ok(()),
            ElementKind::Integer64 => Err(BootError::ElementShape {
                card,
                expected: "4 x INTEGER64",
                found: format!("{} x INTEGER64", self.count),
            }),
            ElementKind::Other(name) => Err(BootError::ElementShape {
                card,
                expected: "4 x INTEGER64",
                found: format!("{} x {}", self.count, name),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Element interface of a control event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventIface {
    Card,
    Mixer,
    Other,
}

/// One notification read from a subscribed control interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    pub value_changed: bool,
    pub iface: EventIface,
    pub name: String,
    pub index: u32,
}

impl ControlEvent {
    pub fn boot_value_change() -> Self {
        Self {
            value_changed: true,
            iface: EventIface::Card,
            name: BOOT_ELEMENT_NAME.to_string(),
            index: BOOT_ELEMENT_INDEX,
        }
    }

    pub fn is_boot_value_change(&self) -> bool {
        self.value_changed
            && self.iface == EventIface::Card
            && self.index == BOOT_ELEMENT_INDEX
            && self.name == BOOT_ELEMENT_NAME
    }
}

/// An open control interface of one card.
pub trait CardControl {
    fn card(&self) -> i32;

    /// Shape of the `.Boot` element, or `None` if the card has none.
    fn boot_shape(&self) -> Result<Option<ElementShape>>;

    fn read_boot_values(&self) -> Result<[i64; 4]>;

    /// Create `.Boot` as an inactive read/write 4 x int64 user element
    /// bounded to `[-1, i64::MAX]`.
    fn create_boot(&mut self) -> Result<()>;

    fn write_boot_values(&mut self, values: [i64; 4]) -> Result<()>;

    fn subscribe(&mut self, enable: bool) -> Result<()>;

    /// Block until an event is pending or `timeout` elapses.
    /// Returns `true` when events are pending.
    fn wait(&mut self, timeout: Duration) -> Result<bool>;

    /// Next pending event, without blocking.
    fn read_event(&mut self) -> Result<Option<ControlEvent>>;
}

/// Opens cards by index.
pub trait CardBackend {
    fn open(&self, card: i32, mode: OpenMode) -> Result<Box<dyn CardControl>>;
}

impl<B: CardBackend + ?Sized> CardBackend for &B {
    fn open(&self, card: i32, mode: OpenMode) -> Result<Box<dyn CardControl>> {
        (**self).open(card, mode)
    }
}

/// Read the card's boot parameters. `None` when the element does not exist.
pub fn read(ctl: &dyn CardControl) -> Result<Option<BootParams>> {
    let Some(shape) = ctl.boot_shape()? else {
        return Ok(None);
    };
    shape.check(ctl.card())?;

    let params = BootParams::from_values(ctl.read_boot_values()?);
    debug!(
        card = ctl.card(),
        boot_time = params.boot_time,
        sync_time = params.sync_time,
        restore_time = params.restore_time,
        primary_card = params.primary_card,
        "read boot params"
    );
    Ok(Some(params))
}

/// Write the card's boot parameters, creating the element if needed.
pub fn write(ctl: &mut dyn CardControl, params: &BootParams) -> Result<()> {
    let shape = match ctl.boot_shape()? {
        Some(shape) => shape,
        None => {
            debug!(card = ctl.card(), "'.Boot' not found, creating user element");
            ctl.create_boot()?;
            ctl.boot_shape()?.ok_or_else(|| BootError::Control {
                card: ctl.card(),
                op: "create '.Boot'",
                message: "element missing after creation".to_string(),
            })?
        }
    };
    shape.check(ctl.card())?;

    debug!(
        card = ctl.card(),
        boot_time = params.boot_time,
        sync_time = params.sync_time,
        restore_time = params.restore_time,
        primary_card = params.primary_card,
        "write boot params"
    );
    ctl.write_boot_values(params.values())
}

/// Whether `boot_time` is set, not in the future, and (for a positive
/// `window`) younger than `window` seconds at `now`.
pub fn validate_boot_time(boot_time: i64, now: i64, window: i64) -> bool {
    if boot_time <= 0 {
        return false;
    }

    let Some(age) = now.checked_sub(boot_time) else {
        return false;
    };
    if age < 0 {
        return false;
    }

    if window > 0 && age >= window {
        return false;
    }

    true
}
