//! CLI command implementations

use std::time::Duration;

use anyhow::{Context, Result};
use bootconf::{BootConfig, ConfigSources};
use bootsync::{
    AlsaBackend, BootCoordinator, BootWaiter, GroupLock, GroupPhase, GroupStatus, GroupStore,
    SystemClock, UpdateOutcome, Validity, WaitOutcome,
};
use tracing::debug;

fn coordinator(config: &BootConfig) -> BootCoordinator<AlsaBackend, SystemClock> {
    BootCoordinator::new(
        AlsaBackend::new(),
        SystemClock,
        GroupStore::new(&config.paths.group_file),
    )
}

/// Hold the group file lock for the duration of `f`.
fn locked<T>(config: &BootConfig, f: impl FnOnce() -> bootsync::Result<T>) -> Result<T> {
    let path = config.paths.effective_lock_file();
    let timeout = Duration::from_secs(config.sync.lock_timeout_secs);
    let _lock = GroupLock::acquire(&path, timeout)
        .with_context(|| format!("Failed to lock {}", path.display()))?;
    Ok(f()?)
}

/// Report a card's validity
pub fn check(config: &BootConfig, card: i32, sync_time: Option<i64>, json: bool) -> Result<()> {
    let validity = coordinator(config)
        .check_validity(card, sync_time.unwrap_or(-1))
        .with_context(|| format!("Failed to check card {}", card))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&validity)?);
    } else {
        println!("{}", describe_validity(card, &validity));
    }
    Ok(())
}

/// Register a card's boot
pub fn update(
    config: &BootConfig,
    card: i32,
    group: &str,
    sync_time: Option<i64>,
    restored: bool,
    valid: bool,
) -> Result<()> {
    let sync_time = sync_time.unwrap_or(config.sync.default_sync_time);
    let coordinator = coordinator(config);
    let outcome = locked(config, || {
        coordinator.update_boot_params(card, group, valid, restored, sync_time)
    })
    .with_context(|| format!("Failed to update boot params for card {}", card))?;

    println!("{}", describe_update(card, &outcome));
    Ok(())
}

/// Remove a card from its groups
pub fn remove(config: &BootConfig, card: i32) -> Result<()> {
    let coordinator = coordinator(config);
    let changed = locked(config, || coordinator.remove_card(card))
        .with_context(|| format!("Failed to remove card {}", card))?;

    if changed {
        println!("card {}: removed from boot groups", card);
    } else {
        println!("card {}: not in any boot group", card);
    }
    Ok(())
}

/// Block until a card reports a restore
pub fn wait(config: &BootConfig, card: i32, timeout: i64) -> Result<()> {
    let coordinator = coordinator(config);
    let waiter = BootWaiter::new(&coordinator).with_default_timeout(config.sync.default_sync_time);
    let outcome = waiter
        .wait_for_card(timeout, card)
        .with_context(|| format!("Failed to wait for card {}", card))?;

    debug!(card, ?outcome, "wait finished");
    println!("card {}: {}", card, describe_wait(outcome));
    Ok(())
}

/// List persisted groups
pub fn groups(config: &BootConfig, json: bool) -> Result<()> {
    let status = coordinator(config)
        .group_status()
        .with_context(|| format!("Failed to read {}", config.paths.group_file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    if status.is_empty() {
        println!("No boot groups in {}", config.paths.group_file.display());
        return Ok(());
    }
    for entry in &status {
        println!("{}", describe_group(entry));
    }
    Ok(())
}

/// Print the effective configuration
pub fn show_config(config: &BootConfig, sources: Option<&ConfigSources>) {
    if let Some(sources) = sources {
        if sources.files.is_empty() {
            println!("# No config files found, using defaults");
        }
        for file in &sources.files {
            println!("# Loaded: {}", file.display());
        }
        for var in &sources.env_overrides {
            println!("# Env override: {}", var);
        }
        println!();
    }
    print!("{}", config.to_toml());
}

fn describe_validity(card: i32, validity: &Validity) -> String {
    let Some(group) = &validity.group else {
        return format!("card {}: not participating", card);
    };

    let mut out = format!(
        "card {}: group {}, {}, {}, {}",
        card,
        group,
        if validity.valid { "valid" } else { "invalid" },
        if validity.in_sync { "in sync" } else { "window passed" },
        if validity.restored { "restored" } else { "not restored" },
    );
    if let Some(primary) = validity.primary_card {
        out.push_str(&format!(" (primary card {}", primary));
        if let Some(window) = validity.synctime {
            out.push_str(&format!(", sync time {}s", window));
        }
        out.push(')');
    }
    out
}

fn describe_update(card: i32, outcome: &UpdateOutcome) -> String {
    let mut out = format!(
        "card {}: group {}, primary card {}, boot time {}",
        card, outcome.group, outcome.primary_card, outcome.params.boot_time
    );
    if outcome.params.is_restored() {
        out.push_str(", restored");
    }
    if !outcome.linked.is_empty() {
        let linked: Vec<String> = outcome.linked.iter().map(|c| c.to_string()).collect();
        out.push_str(&format!(", linked cards {}", linked.join(" ")));
    }
    out
}

fn describe_wait(outcome: WaitOutcome) -> &'static str {
    match outcome {
        WaitOutcome::Restored => "restored",
        WaitOutcome::AlreadyRestored => "already restored",
        WaitOutcome::NotParticipating => "not participating, nothing to wait for",
        WaitOutcome::NoElement => "no boot element, nothing to wait for",
        WaitOutcome::TimedOut => "timed out",
        WaitOutcome::BootExpired => "boot window expired",
    }
}

fn describe_group(entry: &GroupStatus) -> String {
    let phase = match entry.phase {
        GroupPhase::Uninitialized => "uninitialized",
        GroupPhase::Booting => "booting",
        GroupPhase::Settled => "settled",
        GroupPhase::Stale => "stale",
    };
    let members: Vec<String> = entry.group.members.iter().map(|c| c.to_string()).collect();
    let mut out = format!(
        "{}: {} [cards {}]",
        entry.group.name,
        phase,
        members.join(" ")
    );
    if let Some(window) = entry.group.boot_synctime {
        out.push_str(&format!(" sync time {}s", window));
    }
    out
}
