//! Boot epoch coordination across the cards of a group.
//!
//! A group moves through these phases:
//!
//! ```text
//! UNINITIALIZED -> BOOTING (primary + anchors set) -> SETTLED (restore_time set)
//!                      \-> STALE (window passed without a restore)
//! any phase -> torn down (entry deleted)
//! ```
//!
//! The first card to register in a group becomes its primary and anchors the
//! epoch: `boot_realtime` (wall clock) and `boot_monotonic` (monotonic
//! clock) are taken at that moment. Every other member adopts those anchors
//! and writes `boot_monotonic` into its own `.Boot` element, so a later check
//! can tell whether the card still belongs to the same epoch.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::element::{self, validate_boot_time, BootParams, CardBackend, OpenMode};
use crate::error::{BootError, Result};
use crate::groups::{CardGroup, GroupField, GroupSnapshot, GroupStore};

/// Wall/monotonic drift, in seconds, beyond which a group counts as obsolete.
pub const CLOCK_SKEW_LIMIT: i64 = 30;

/// Result of [`BootCoordinator::check_validity`].
///
/// The default value is the neutral "not participating" answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Validity {
    pub group: Option<String>,
    pub valid: bool,
    pub in_sync: bool,
    pub restored: bool,
    pub primary_card: Option<i64>,
    pub synctime: Option<i64>,
}

/// Result of [`BootCoordinator::update_boot_params`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub group: String,
    pub primary_card: i32,
    /// What was written to the card's `.Boot` element.
    pub params: BootParams,
    /// Peers whose `restore_time` was carried along by the primary.
    pub linked: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPhase {
    Uninitialized,
    Booting,
    Settled,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStatus {
    #[serde(flatten)]
    pub group: CardGroup,
    pub phase: GroupPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pruned {
    Unchanged,
    Members(usize),
    GroupDeleted,
}

pub struct BootCoordinator<B, C> {
    backend: B,
    clock: C,
    store: GroupStore,
}

impl<B: CardBackend, C: Clock> BootCoordinator<B, C> {
    pub fn new(backend: B, clock: C, store: GroupStore) -> Self {
        Self {
            backend,
            clock,
            store,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn store(&self) -> &GroupStore {
        &self.store
    }

    /// Decide whether `card` still belongs to a live boot epoch.
    ///
    /// A card without a `.Boot` element, with an unset `boot_time`, or not
    /// listed in any group gets the neutral answer. A `boot_synctime` that
    /// disagrees with `expected_synctime` (when positive) or with the
    /// card's own `sync_time` (when positive) is an error.
    pub fn check_validity(&self, card: i32, expected_synctime: i64) -> Result<Validity> {
        let ctl = self.backend.open(card, OpenMode::ReadOnly)?;
        let Some(params) = element::read(ctl.as_ref())? else {
            debug!(card, "boot element not present");
            return Ok(Validity::default());
        };
        drop(ctl);

        if params.boot_time <= 0 {
            debug!(card, boot_time = params.boot_time, "boot_time not set");
            return Ok(Validity::default());
        }

        let snapshot = self.store.load()?;
        let Some(group) = snapshot.freshest_for(card) else {
            debug!(card, "card not found in any group");
            return Ok(Validity::default());
        };

        let (Some(boot_realtime), Some(boot_monotonic), Some(boot_synctime)) =
            (group.boot_realtime, group.boot_monotonic, group.boot_synctime)
        else {
            debug!(card, group = %group.name, "group anchors incomplete");
            return Ok(Validity::default());
        };

        if expected_synctime > 0 && boot_synctime != expected_synctime {
            return Err(BootError::SyncTimeMismatch {
                source_name: "requested",
                value: expected_synctime,
                group_value: boot_synctime,
            });
        }
        if params.sync_time > 0 && boot_synctime != params.sync_time {
            return Err(BootError::SyncTimeMismatch {
                source_name: "element",
                value: params.sync_time,
                group_value: boot_synctime,
            });
        }

        let now_wall = self.clock.realtime()?;
        let now_mono = self.clock.monotonic()?;
        let out_of_range = |field: GroupField, value: i64| {
            BootError::malformed(&group.name, field.key(), format!("{} is out of range", value))
        };
        let diff_monotonic = now_mono
            .checked_sub(boot_monotonic)
            .ok_or_else(|| out_of_range(GroupField::BootMonotonic, boot_monotonic))?;
        let diff_realtime = now_wall
            .checked_sub(boot_realtime)
            .ok_or_else(|| out_of_range(GroupField::BootRealtime, boot_realtime))?;
        let diff = diff_realtime.saturating_sub(diff_monotonic);
        debug!(
            card,
            group = %group.name,
            diff_monotonic,
            diff_realtime,
            diff,
            "group sync diffs"
        );

        // NOTE: true for every diff; a symmetric bound would read
        // `diff.abs() < CLOCK_SKEW_LIMIT`. Existing groups depend on this.
        #[allow(clippy::overly_complex_bool_expr)]
        let valid = diff < CLOCK_SKEW_LIMIT || diff > -CLOCK_SKEW_LIMIT;
        if !valid {
            return Ok(Validity::default());
        }

        let validity = Validity {
            group: Some(group.name.clone()),
            valid,
            in_sync: diff_realtime < boot_synctime,
            restored: params.is_restored(),
            primary_card: Some(params.primary_card),
            synctime: Some(boot_synctime),
        };
        debug!(card, ?validity, "validity checked");
        Ok(validity)
    }

    /// Register `card` in `group_name` and write its `.Boot` element.
    ///
    /// With `valid == false` the card's old membership in `group_name` is
    /// pruned first (see [`Self::remove_card`]). `restored` may only be set
    /// by the path that actually re-applied the card's saved state.
    pub fn update_boot_params(
        &self,
        card: i32,
        group_name: &str,
        valid: bool,
        restored: bool,
        synctime: i64,
    ) -> Result<UpdateOutcome> {
        if group_name.is_empty() {
            return Err(BootError::InvalidArgument(
                "boot group name is required".to_string(),
            ));
        }
        if synctime <= 0 {
            return Err(BootError::InvalidArgument(format!(
                "synchronization time window must be positive, got {}",
                synctime
            )));
        }

        let mut snapshot = self.store.load()?;

        if !valid {
            if let Some(group) = snapshot.get_mut(group_name) {
                if self.prune_group(group, card)? == Pruned::GroupDeleted {
                    snapshot.remove_group(group_name);
                }
            }
        }

        let now_wall = self.clock.realtime()?;
        let now_mono = self.clock.monotonic()?;

        let group = snapshot.find_or_create_group(group_name);
        let primary = match group.primary() {
            Some(primary) => primary,
            None => {
                debug!(card, group = group_name, "no primary yet, electing this card");
                card
            }
        };
        group.find_or_create_member(card);

        let boot_monotonic = if primary != card || valid {
            adopt_anchor(group, GroupField::BootRealtime, now_wall);
            adopt_anchor(group, GroupField::BootMonotonic, now_mono)
        } else {
            info!(card, group = group_name, now_wall, now_mono, "primary re-anchoring group epoch");
            group.set(GroupField::BootRealtime, now_wall);
            group.set(GroupField::BootMonotonic, now_mono);
            now_mono
        };
        group.set(GroupField::BootSynctime, synctime);
        group.set(GroupField::BootLastUpdate, now_wall);
        let members = group.members.clone();

        self.store.save(&snapshot)?;

        let params = BootParams {
            boot_time: boot_monotonic,
            sync_time: synctime,
            restore_time: if restored { now_wall } else { -1 },
            primary_card: i64::from(primary),
        };
        let mut ctl = self.backend.open(card, OpenMode::ReadWrite)?;
        element::write(ctl.as_mut(), &params)?;
        drop(ctl);

        let linked = if primary == card {
            self.fan_out_restore(&members, card, &params)
        } else {
            Vec::new()
        };

        info!(
            card,
            group = group_name,
            primary,
            restored,
            linked = linked.len(),
            "boot params updated"
        );
        Ok(UpdateOutcome {
            group: group_name.to_string(),
            primary_card: primary,
            params,
            linked,
        })
    }

    /// Remove `card` from every group, pruning peers that no longer hold a
    /// valid boot time. Removing a primary tears its whole group down.
    ///
    /// Returns whether the group file changed. A card that is not listed
    /// anywhere is not an error.
    pub fn remove_card(&self, card: i32) -> Result<bool> {
        let mut snapshot = self.store.load()?;
        let mut changed = 0usize;

        for name in snapshot.groups_containing(card) {
            let Some(group) = snapshot.get_mut(&name) else {
                continue;
            };
            match self.prune_group(group, card)? {
                Pruned::Unchanged => {}
                Pruned::Members(count) => {
                    debug!(card, group = %name, removed = count, "pruned group members");
                    changed += 1;
                }
                Pruned::GroupDeleted => {
                    snapshot.remove_group(&name);
                    changed += 1;
                }
            }
        }

        if changed == 0 {
            debug!(card, "card not found in any group");
            return Ok(false);
        }

        info!(card, groups = changed, "updating groups after card removal");
        self.store.save(&snapshot)?;
        Ok(true)
    }

    /// Every persisted group with its current phase.
    pub fn group_status(&self) -> Result<Vec<GroupStatus>> {
        let snapshot: GroupSnapshot = self.store.load()?;
        let now_wall = self.clock.realtime()?;

        Ok(snapshot
            .groups()
            .iter()
            .map(|group| GroupStatus {
                phase: self.phase_of(group, now_wall),
                group: group.clone(),
            })
            .collect())
    }

    fn phase_of(&self, group: &CardGroup, now_wall: i64) -> GroupPhase {
        let (Some(primary), Some(boot_realtime), Some(boot_monotonic)) =
            (group.primary(), group.boot_realtime, group.boot_monotonic)
        else {
            return GroupPhase::Uninitialized;
        };

        let settled = self
            .backend
            .open(primary, OpenMode::ReadOnly)
            .and_then(|ctl| element::read(ctl.as_ref()))
            .ok()
            .flatten()
            .is_some_and(|p| p.boot_time == boot_monotonic && p.is_restored());
        if settled {
            return GroupPhase::Settled;
        }

        match group.boot_synctime {
            Some(window) if now_wall.saturating_sub(boot_realtime) >= window => GroupPhase::Stale,
            _ => GroupPhase::Booting,
        }
    }

    /// Drop `card` from `group`, then every peer whose boot time is gone.
    fn prune_group(&self, group: &mut CardGroup, card: i32) -> Result<Pruned> {
        let primary = group.primary();
        if primary == Some(card) {
            info!(card, group = %group.name, "removing group (primary card)");
            return Ok(Pruned::GroupDeleted);
        }

        if !group.remove_member(card) {
            return Ok(Pruned::Unchanged);
        }
        debug!(card, group = %group.name, "removed card from group");
        let mut removed = 1;

        let mut now_mono = None;
        for peer in group.members.clone() {
            if self.peer_still_booted(peer, &mut now_mono)? {
                continue;
            }
            if Some(peer) == primary {
                info!(peer, group = %group.name, "primary card invalid, removing group");
                return Ok(Pruned::GroupDeleted);
            }
            debug!(peer, group = %group.name, "removing stale peer");
            group.remove_member(peer);
            removed += 1;
        }

        if group.is_empty() {
            info!(group = %group.name, "no cards left, removing group");
            return Ok(Pruned::GroupDeleted);
        }
        Ok(Pruned::Members(removed))
    }

    /// Check a peer's boot time. Unreachable peers and peers without a valid
    /// boot time are gone; peers whose element cannot be read are kept.
    fn peer_still_booted(&self, peer: i32, now_mono: &mut Option<i64>) -> Result<bool> {
        let ctl = match self.backend.open(peer, OpenMode::ReadOnly) {
            Ok(ctl) => ctl,
            Err(e) => {
                debug!(peer, error = %e, "unable to open peer");
                return Ok(false);
            }
        };

        let boot_time = match element::read(ctl.as_ref()) {
            Ok(params) => params.map_or(-1, |p| p.boot_time),
            Err(e) => {
                warn!(peer, error = %e, "unable to read peer boot params, keeping it");
                return Ok(true);
            }
        };

        let now = match *now_mono {
            Some(now) => now,
            None => {
                let now = self.clock.monotonic()?;
                *now_mono = Some(now);
                now
            }
        };
        Ok(validate_boot_time(boot_time, now, 0))
    }

    /// Carry the primary's `restore_time` to members of the same epoch.
    fn fan_out_restore(&self, members: &[i32], primary: i32, params: &BootParams) -> Vec<i32> {
        let mut linked = Vec::new();

        for &peer in members.iter().filter(|&&c| c != primary) {
            let mut ctl = match self.backend.open(peer, OpenMode::ReadWrite) {
                Ok(ctl) => ctl,
                Err(e) => {
                    debug!(peer, error = %e, "unable to open peer");
                    continue;
                }
            };

            let current = match element::read(ctl.as_ref()) {
                Ok(Some(current)) => current,
                Ok(None) => {
                    debug!(peer, "peer has no boot element");
                    continue;
                }
                Err(e) => {
                    debug!(peer, error = %e, "unable to read peer boot params");
                    continue;
                }
            };

            if current.boot_time != params.boot_time {
                debug!(
                    peer,
                    expected = params.boot_time,
                    found = current.boot_time,
                    "boot time mismatch"
                );
                continue;
            }
            if current.primary_card != params.primary_card {
                debug!(
                    peer,
                    expected = params.primary_card,
                    found = current.primary_card,
                    "primary card mismatch"
                );
                continue;
            }

            let updated = BootParams {
                restore_time: params.restore_time,
                ..current
            };
            if let Err(e) = element::write(ctl.as_mut(), &updated) {
                warn!(peer, error = %e, "unable to update peer boot params");
                continue;
            }
            linked.push(peer);
        }

        linked
    }
}

/// Keep an existing anchor, or set it to `now` when the group has none.
fn adopt_anchor(group: &mut CardGroup, field: GroupField, now: i64) -> i64 {
    match group.get(field) {
        Some(existing) => {
            debug!(group = %group.name, field = field.key(), existing, "preserving anchor");
            existing
        }
        None => {
            debug!(group = %group.name, field = field.key(), now, "setting anchor");
            group.set(field, now);
            now
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::clock::ManualClock;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        backend: MemoryBackend,
        clock: Arc<ManualClock>,
        coordinator: BootCoordinator<MemoryBackend, Arc<ManualClock>>,
    }

    fn fixture(cards: &[i32]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let backend = MemoryBackend::new();
        for &card in cards {
            backend.add_card(card);
        }
        let clock = Arc::new(ManualClock::new(500, 1000));
        let coordinator = BootCoordinator::new(
            backend.clone(),
            Arc::clone(&clock),
            GroupStore::new(dir.path().join("groups.toml")),
        );
        Fixture {
            _dir: dir,
            backend,
            clock,
            coordinator,
        }
    }

    #[test]
    fn test_update_rejects_bad_arguments() {
        let f = fixture(&[0]);
        assert!(matches!(
            f.coordinator.update_boot_params(0, "", true, false, 30),
            Err(BootError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.coordinator.update_boot_params(0, "g", true, false, 0),
            Err(BootError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_first_card_becomes_primary() -> Result<()> {
        let f = fixture(&[3, 1]);
        let first = f.coordinator.update_boot_params(3, "g", false, false, 30)?;
        let second = f.coordinator.update_boot_params(1, "g", true, false, 30)?;

        assert_eq!(first.primary_card, 3);
        assert_eq!(second.primary_card, 3);
        assert_eq!(f.backend.boot_params(1).unwrap().primary_card, 3);

        let snapshot = f.coordinator.store().load()?;
        assert_eq!(snapshot.get("g").unwrap().members, vec![3, 1]);
        Ok(())
    }

    #[test]
    fn test_device_params_follow_anchor() -> Result<()> {
        let f = fixture(&[0]);
        let outcome = f.coordinator.update_boot_params(0, "g", false, true, 30)?;

        assert_eq!(
            outcome.params,
            BootParams {
                boot_time: 500,
                sync_time: 30,
                restore_time: 1000,
                primary_card: 0,
            }
        );
        assert_eq!(f.backend.boot_params(0), Some(outcome.params));

        let group = f.coordinator.store().load()?.get("g").cloned().unwrap();
        assert_eq!(group.boot_realtime, Some(1000));
        assert_eq!(group.boot_monotonic, Some(500));
        assert_eq!(group.boot_synctime, Some(30));
        assert_eq!(group.boot_last_update, Some(1000));
        Ok(())
    }

    #[test]
    fn test_last_update_tracks_wall_clock() -> Result<()> {
        let f = fixture(&[0, 1]);
        f.coordinator.update_boot_params(0, "g", false, false, 30)?;
        f.clock.advance(7);
        f.coordinator.update_boot_params(1, "g", true, false, 30)?;

        let group = f.coordinator.store().load()?.get("g").cloned().unwrap();
        assert_eq!(group.boot_realtime, Some(1000));
        assert_eq!(group.boot_last_update, Some(1007));
        Ok(())
    }

    #[test]
    fn test_primary_fans_out_restore_time() -> Result<()> {
        let f = fixture(&[0, 1, 2]);
        f.coordinator.update_boot_params(0, "g", false, false, 30)?;
        f.coordinator.update_boot_params(1, "g", true, false, 30)?;
        f.coordinator.update_boot_params(2, "g", true, false, 30)?;

        // Card 2 moved on to another epoch after a reset
        f.backend.set_boot_params(
            2,
            BootParams {
                boot_time: 900,
                sync_time: 30,
                restore_time: -1,
                primary_card: 0,
            },
        );

        f.clock.advance(3);
        let outcome = f.coordinator.update_boot_params(0, "g", true, true, 30)?;

        assert_eq!(outcome.linked, vec![1]);
        assert_eq!(f.backend.boot_params(1).unwrap().restore_time, 1003);
        assert_eq!(f.backend.boot_params(2).unwrap().restore_time, -1);
        Ok(())
    }

    #[test]
    fn test_fan_out_skips_unplugged_peer() -> Result<()> {
        let f = fixture(&[0, 1]);
        f.coordinator.update_boot_params(0, "g", false, false, 30)?;
        f.coordinator.update_boot_params(1, "g", true, false, 30)?;
        f.backend.remove_card(1);

        let outcome = f.coordinator.update_boot_params(0, "g", true, true, 30)?;
        assert!(outcome.linked.is_empty());
        Ok(())
    }

    #[test]
    fn test_non_primary_does_not_fan_out() -> Result<()> {
        let f = fixture(&[0, 1]);
        f.coordinator.update_boot_params(0, "g", false, false, 30)?;
        let outcome = f.coordinator.update_boot_params(1, "g", true, true, 30)?;

        assert!(outcome.linked.is_empty());
        assert_eq!(f.backend.boot_params(0).unwrap().restore_time, -1);
        Ok(())
    }

    #[test]
    fn test_invalid_primary_reanchors() -> Result<()> {
        let f = fixture(&[0]);
        f.coordinator.update_boot_params(0, "g", false, false, 30)?;
        f.clock.advance(100);
        let outcome = f.coordinator.update_boot_params(0, "g", false, false, 30)?;

        assert_eq!(outcome.params.boot_time, 600);
        let group = f.coordinator.store().load()?.get("g").cloned().unwrap();
        assert_eq!(group.boot_realtime, Some(1100));
        assert_eq!(group.boot_monotonic, Some(600));
        Ok(())
    }

    #[test]
    fn test_check_without_element_is_neutral() -> Result<()> {
        let f = fixture(&[4]);
        assert_eq!(f.coordinator.check_validity(4, -1)?, Validity::default());
        Ok(())
    }

    #[test]
    fn test_check_unlisted_card_is_neutral() -> Result<()> {
        let f = fixture(&[4]);
        f.backend.set_boot_params(
            4,
            BootParams {
                boot_time: 10,
                sync_time: 30,
                restore_time: -1,
                primary_card: 4,
            },
        );
        assert_eq!(f.coordinator.check_validity(4, -1)?, Validity::default());
        Ok(())
    }

    #[test]
    fn test_check_rejects_synctime_mismatch() -> Result<()> {
        let f = fixture(&[0]);
        f.coordinator.update_boot_params(0, "g", false, false, 30)?;

        let err = f.coordinator.check_validity(0, 45).unwrap_err();
        assert!(matches!(
            err,
            BootError::SyncTimeMismatch {
                source_name: "requested",
                value: 45,
                group_value: 30
            }
        ));

        let mut params = f.backend.boot_params(0).unwrap();
        params.sync_time = 60;
        f.backend.set_boot_params(0, params);
        let err = f.coordinator.check_validity(0, -1).unwrap_err();
        assert!(matches!(
            err,
            BootError::SyncTimeMismatch {
                source_name: "element",
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn test_remove_unknown_card_is_noop() -> Result<()> {
        let f = fixture(&[0]);
        f.coordinator.update_boot_params(0, "g", false, false, 30)?;
        assert!(!f.coordinator.remove_card(9)?);
        assert!(f.coordinator.store().load()?.get("g").is_some());
        Ok(())
    }

    #[test]
    fn test_remove_member_keeps_live_peers() -> Result<()> {
        let f = fixture(&[0, 1, 2]);
        f.coordinator.update_boot_params(0, "g", false, false, 30)?;
        f.coordinator.update_boot_params(1, "g", true, false, 30)?;
        f.coordinator.update_boot_params(2, "g", true, false, 30)?;

        assert!(f.coordinator.remove_card(1)?);
        let group = f.coordinator.store().load()?.get("g").cloned().unwrap();
        assert_eq!(group.members, vec![0, 2]);
        Ok(())
    }

    #[test]
    fn test_remove_prunes_dead_non_primary_peer() -> Result<()> {
        let f = fixture(&[0, 1, 2]);
        f.coordinator.update_boot_params(0, "g", false, false, 30)?;
        f.coordinator.update_boot_params(1, "g", true, false, 30)?;
        f.coordinator.update_boot_params(2, "g", true, false, 30)?;
        f.backend.remove_card(2);

        assert!(f.coordinator.remove_card(1)?);
        let group = f.coordinator.store().load()?.get("g").cloned().unwrap();
        assert_eq!(group.members, vec![0]);
        Ok(())
    }

    #[test]
    fn test_unreadable_peer_is_kept() -> Result<()> {
        let f = fixture(&[0, 1, 2]);
        f.coordinator.update_boot_params(0, "g", false, false, 30)?;
        f.coordinator.update_boot_params(1, "g", true, false, 30)?;
        f.coordinator.update_boot_params(2, "g", true, false, 30)?;
        f.backend.set_raw_values(2, vec![1, 2]);

        assert!(f.coordinator.remove_card(1)?);
        let group = f.coordinator.store().load()?.get("g").cloned().unwrap();
        assert_eq!(group.members, vec![0, 2]);
        Ok(())
    }

    #[test]
    fn test_group_phases() -> Result<()> {
        let f = fixture(&[0, 1]);
        f.coordinator.update_boot_params(0, "a", false, false, 30)?;
        f.coordinator.update_boot_params(1, "b", false, true, 30)?;

        let status = f.coordinator.group_status()?;
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].phase, GroupPhase::Booting);
        assert_eq!(status[1].phase, GroupPhase::Settled);

        f.clock.advance(30);
        let status = f.coordinator.group_status()?;
        assert_eq!(status[0].phase, GroupPhase::Stale);
        assert_eq!(status[1].phase, GroupPhase::Settled);
        Ok(())
    }

    fn corrupt_anchor(f: &Fixture, field: GroupField, value: i64) -> Result<()> {
        let mut snapshot = f.coordinator.store().load()?;
        snapshot.get_mut("g").unwrap().set(field, value);
        f.coordinator.store().save(&snapshot)
    }

    #[test]
    fn test_out_of_range_anchor_is_malformed() -> Result<()> {
        let f = fixture(&[0]);
        f.coordinator.update_boot_params(0, "g", false, false, 30)?;

        corrupt_anchor(&f, GroupField::BootMonotonic, i64::MIN)?;
        match f.coordinator.check_validity(0, -1) {
            Err(BootError::MalformedGroup { group, field, .. }) => {
                assert_eq!(group, "g");
                assert_eq!(field, "boot_monotonic");
            }
            other => panic!("expected a malformed group, got {:?}", other),
        }

        corrupt_anchor(&f, GroupField::BootMonotonic, 500)?;
        corrupt_anchor(&f, GroupField::BootRealtime, i64::MIN)?;
        assert!(matches!(
            f.coordinator.check_validity(0, -1),
            Err(BootError::MalformedGroup { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_status_with_extreme_anchor() -> Result<()> {
        let f = fixture(&[0]);
        f.coordinator.update_boot_params(0, "g", false, false, 30)?;
        corrupt_anchor(&f, GroupField::BootRealtime, i64::MIN)?;

        let status = f.coordinator.group_status()?;
        assert_eq!(status[0].phase, GroupPhase::Stale);
        Ok(())
    }
}
