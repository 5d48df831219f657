//! bootsync - boot synchronization for groups of ALSA cards
//!
//! Cards that belong together (several interfaces of one device, or a
//! linked set of devices) come up independently, each through its own
//! short-lived process. This crate lets those processes agree on a shared
//! boot epoch so that saved control state is restored against the right
//! boot, and so that anything waiting on a card can tell when restore
//! has happened.
//!
//! Two stores carry the state:
//! - the `.Boot` user element on each card ([`element`]), which tracks the
//!   card's hardware lifetime
//! - the group file ([`groups`]), which survives reboots and lists the
//!   members and time anchors of each group
//!
//! [`BootCoordinator`] ties the two together; [`BootWaiter`] blocks on a
//! card until its restore is reported.

pub mod backend;
pub mod clock;
pub mod coordinator;
pub mod element;
pub mod error;
pub mod groups;
pub mod lock;
pub mod wait;

pub use backend::{AlsaBackend, MemoryBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{
    BootCoordinator, GroupPhase, GroupStatus, UpdateOutcome, Validity, CLOCK_SKEW_LIMIT,
};
pub use element::{BootParams, CardBackend, CardControl, OpenMode};
pub use error::{BootError, Result};
pub use groups::{CardGroup, GroupField, GroupSnapshot, GroupStore};
pub use lock::GroupLock;
pub use wait::{BootWaiter, WaitOutcome, DEFAULT_SYNC_TIME};
