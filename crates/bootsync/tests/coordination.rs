//! End-to-end coordination across several simulated cards sharing one
//! group file.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bootsync::element::validate_boot_time;
use bootsync::{
    BootCoordinator, BootParams, BootWaiter, GroupField, GroupSnapshot, GroupStore, ManualClock,
    MemoryBackend, WaitOutcome,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

struct Rig {
    _dir: TempDir,
    backend: MemoryBackend,
    clock: Arc<ManualClock>,
    coordinator: BootCoordinator<MemoryBackend, Arc<ManualClock>>,
}

impl Rig {
    fn new(cards: &[i32], monotonic: i64, realtime: i64) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let backend = MemoryBackend::new();
        for &card in cards {
            backend.add_card(card);
        }
        let clock = Arc::new(ManualClock::new(monotonic, realtime));
        let coordinator = BootCoordinator::new(
            backend.clone(),
            Arc::clone(&clock),
            GroupStore::new(dir.path().join("alsa").join("card-groups.toml")),
        );
        Self {
            _dir: dir,
            backend,
            clock,
            coordinator,
        }
    }

    fn snapshot(&self) -> GroupSnapshot {
        self.coordinator.store().load().expect("load groups")
    }

    fn anchors(&self, group: &str) -> (Option<i64>, Option<i64>) {
        let snapshot = self.snapshot();
        let group = snapshot.get(group).expect("group exists");
        (group.boot_realtime, group.boot_monotonic)
    }
}

#[test]
fn test_boot_time_validation_rules() {
    for now in [-5, 0, 10, 1_000_000] {
        assert!(!validate_boot_time(0, now, 30));
        assert!(!validate_boot_time(-1, now, 0));
    }
    assert!(!validate_boot_time(101, 100, 0));
    assert!(!validate_boot_time(101, 100, 30));

    assert!(validate_boot_time(1, 1_000_000, 0));
    assert!(validate_boot_time(100, 100, -7));

    assert!(validate_boot_time(100, 129, 30));
    assert!(!validate_boot_time(100, 130, 30));
}

#[test]
fn test_update_then_check_is_valid_and_in_sync() {
    let rig = Rig::new(&[3, 1], 500, 1000);
    rig.coordinator
        .update_boot_params(3, "usb-pair", false, false, 30)
        .unwrap();
    rig.coordinator
        .update_boot_params(1, "usb-pair", true, false, 30)
        .unwrap();

    for card in [3, 1] {
        let validity = rig.coordinator.check_validity(card, 30).unwrap();
        assert!(validity.valid, "card {} should be valid", card);
        assert!(validity.in_sync, "card {} should be in sync", card);
        assert!(!validity.restored);
        assert_eq!(validity.primary_card, Some(3));
        assert_eq!(validity.group.as_deref(), Some("usb-pair"));
    }
}

#[test]
fn test_non_primary_update_keeps_anchors() {
    let rig = Rig::new(&[0, 1], 500, 1000);
    rig.coordinator
        .update_boot_params(0, "g", false, false, 30)
        .unwrap();
    let before = rig.anchors("g");

    rig.clock.advance(12);
    rig.backend.set_boot_params(1, BootParams::UNSET);
    rig.coordinator
        .update_boot_params(1, "g", false, false, 30)
        .unwrap();

    assert_eq!(rig.anchors("g"), before);
    assert_eq!(rig.backend.boot_params(1).unwrap().boot_time, 500);
}

#[test]
fn test_invalid_reregistration_drops_vanished_peer() {
    let rig = Rig::new(&[0, 1, 2], 500, 1000);
    for card in [0, 1, 2] {
        rig.coordinator
            .update_boot_params(card, "g", card != 0, false, 30)
            .unwrap();
    }
    let before = rig.anchors("g");

    // Card 2 was unplugged; card 1 comes back without a valid epoch
    rig.backend.remove_card(2);
    rig.clock.advance(5);
    let outcome = rig
        .coordinator
        .update_boot_params(1, "g", false, false, 30)
        .unwrap();

    assert_eq!(outcome.primary_card, 0);
    assert_eq!(rig.snapshot().get("g").unwrap().members, vec![0, 1]);
    assert_eq!(rig.anchors("g"), before);
    assert_eq!(rig.backend.boot_params(1).unwrap().boot_time, 500);
}

#[test]
fn test_removing_primary_deletes_group() {
    let rig = Rig::new(&[0, 1, 2], 500, 1000);
    for card in [0, 1, 2] {
        rig.coordinator
            .update_boot_params(card, "g", card != 0, false, 30)
            .unwrap();
    }

    assert!(rig.coordinator.remove_card(0).unwrap());
    let snapshot = rig.snapshot();
    for card in [0, 1, 2] {
        assert!(snapshot.groups_containing(card).is_empty());
    }
}

#[test]
fn test_removal_cascades_through_invalid_primary() {
    let rig = Rig::new(&[0, 1], 500, 1000);
    rig.coordinator
        .update_boot_params(0, "g", false, false, 30)
        .unwrap();
    rig.coordinator
        .update_boot_params(1, "g", true, false, 30)
        .unwrap();

    // Primary was reset and lost its boot time
    rig.backend.set_boot_params(0, BootParams::UNSET);

    assert!(rig.coordinator.remove_card(1).unwrap());
    assert!(rig.snapshot().is_empty());
}

#[test]
fn test_removal_only_touches_groups_listing_card() {
    let rig = Rig::new(&[0, 1, 2], 500, 1000);
    rig.coordinator
        .update_boot_params(0, "a", false, false, 30)
        .unwrap();
    rig.coordinator
        .update_boot_params(1, "a", true, false, 30)
        .unwrap();
    rig.coordinator
        .update_boot_params(2, "b", false, false, 30)
        .unwrap();

    assert!(rig.coordinator.remove_card(1).unwrap());
    let snapshot = rig.snapshot();
    assert_eq!(snapshot.get("a").unwrap().members, vec![0]);
    assert_eq!(snapshot.get("b").unwrap().members, vec![2]);
}

fn seed_scenario(rig: &Rig) {
    let mut snapshot = GroupSnapshot::new();
    let group = snapshot.find_or_create_group("A");
    group.find_or_create_member(2);
    group.find_or_create_member(5);
    group.set(GroupField::BootRealtime, 1000);
    group.set(GroupField::BootMonotonic, 500);
    group.set(GroupField::BootSynctime, 30);
    group.set(GroupField::BootLastUpdate, 1000);
    rig.coordinator.store().save(&snapshot).unwrap();

    let params = BootParams {
        boot_time: 500,
        sync_time: 30,
        restore_time: -1,
        primary_card: 2,
    };
    rig.backend.set_boot_params(2, params);
    rig.backend.set_boot_params(5, params);
}

#[test]
fn test_scenario_inside_window() {
    let rig = Rig::new(&[2, 5], 515, 1015);
    seed_scenario(&rig);

    let validity = rig.coordinator.check_validity(5, -1).unwrap();
    assert!(validity.valid);
    assert!(validity.in_sync);
    assert_eq!(validity.primary_card, Some(2));
    assert_eq!(validity.synctime, Some(30));
}

#[test]
fn test_scenario_past_window() {
    let rig = Rig::new(&[2, 5], 540, 1040);
    seed_scenario(&rig);

    let validity = rig.coordinator.check_validity(5, -1).unwrap();
    assert!(validity.valid);
    assert!(!validity.in_sync);
}

#[test]
fn test_validity_accepts_any_clock_drift() {
    // Wall clock jumped far relative to the monotonic clock. The skew
    // check in use accepts every drift, in both directions.
    for monotonic in [5_000, 40, 520] {
        let rig = Rig::new(&[2, 5], monotonic, 1040);
        seed_scenario(&rig);

        let validity = rig.coordinator.check_validity(5, -1).unwrap();
        assert!(validity.valid, "drift with monotonic {} rejected", monotonic);
    }
}

#[test]
fn test_wait_without_element_does_not_block() {
    let rig = Rig::new(&[7], 500, 1000);
    let waiter = BootWaiter::new(&rig.coordinator);

    let started = std::time::Instant::now();
    assert_eq!(waiter.wait_for_card(30, 7).unwrap(), WaitOutcome::NoElement);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_wait_returns_on_restore_before_timeout() {
    let rig = Rig::new(&[0, 1], 500, 1000);
    rig.coordinator
        .update_boot_params(0, "g", false, false, 30)
        .unwrap();
    rig.coordinator
        .update_boot_params(1, "g", true, false, 30)
        .unwrap();

    let backend = rig.backend.clone();
    let store = rig.coordinator.store().clone();
    let clock = Arc::clone(&rig.clock);
    let restorer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        let coordinator = BootCoordinator::new(backend, clock, store);
        coordinator
            .update_boot_params(0, "g", true, true, 30)
            .expect("primary restore")
    });

    let waiter = BootWaiter::new(&rig.coordinator);
    let started = std::time::Instant::now();
    assert_eq!(waiter.wait_for_card(0, 1).unwrap(), WaitOutcome::Restored);
    assert!(started.elapsed() < Duration::from_secs(10));

    let outcome = restorer.join().unwrap();
    assert_eq!(outcome.linked, vec![1]);
}
