//! Persisted card groups.
//!
//! The group file is a TOML document with one table per group:
//!
//! ```toml
//! [speakers]
//! card = [2, 5]                  # first entry is the primary
//! boot_realtime = 1700000000     # CLOCK_REALTIME of the epoch anchor
//! boot_monotonic = 42            # CLOCK_MONOTONIC_RAW of the epoch anchor
//! boot_synctime = 30             # synchronization window, seconds
//! boot_last_update = 1700000003  # CLOCK_REALTIME of the last update
//! ```
//!
//! Older files stored the member list as a table keyed by slot number
//! (`card = { "0" = 2, "1" = 5 }`) and wide integers as decimal strings;
//! both are accepted on read and rewritten in the current form on save.
//!
//! The file is shared by independent short-lived processes. Nothing here
//! locks it; wrap each load-mutate-save cycle in a [`crate::GroupLock`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{BootError, Result};

/// Timestamp fields of a group record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    BootRealtime,
    BootMonotonic,
    BootSynctime,
    BootLastUpdate,
}

impl GroupField {
    pub const ALL: [GroupField; 4] = [
        GroupField::BootRealtime,
        GroupField::BootMonotonic,
        GroupField::BootSynctime,
        GroupField::BootLastUpdate,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            GroupField::BootRealtime => "boot_realtime",
            GroupField::BootMonotonic => "boot_monotonic",
            GroupField::BootSynctime => "boot_synctime",
            GroupField::BootLastUpdate => "boot_last_update",
        }
    }
}

const MEMBERS_KEY: &str = "card";

/// One boot group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardGroup {
    pub name: String,
    /// Ordered member set; the first member is the primary.
    pub members: Vec<i32>,
    pub boot_realtime: Option<i64>,
    pub boot_monotonic: Option<i64>,
    pub boot_synctime: Option<i64>,
    pub boot_last_update: Option<i64>,
}

impl CardGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            boot_realtime: None,
            boot_monotonic: None,
            boot_synctime: None,
            boot_last_update: None,
        }
    }

    pub fn get(&self, field: GroupField) -> Option<i64> {
        match field {
            GroupField::BootRealtime => self.boot_realtime,
            GroupField::BootMonotonic => self.boot_monotonic,
            GroupField::BootSynctime => self.boot_synctime,
            GroupField::BootLastUpdate => self.boot_last_update,
        }
    }

    pub fn set(&mut self, field: GroupField, value: i64) {
        let slot = match field {
            GroupField::BootRealtime => &mut self.boot_realtime,
            GroupField::BootMonotonic => &mut self.boot_monotonic,
            GroupField::BootSynctime => &mut self.boot_synctime,
            GroupField::BootLastUpdate => &mut self.boot_last_update,
        };
        *slot = Some(value);
    }

    pub fn primary(&self) -> Option<i32> {
        self.members.first().copied()
    }

    pub fn contains(&self, card: i32) -> bool {
        self.members.contains(&card)
    }

    /// Add `card` at the end of the member set unless already present.
    /// Returns its position.
    pub fn find_or_create_member(&mut self, card: i32) -> usize {
        if let Some(pos) = self.members.iter().position(|&c| c == card) {
            return pos;
        }
        self.members.push(card);
        self.members.len() - 1
    }

    pub fn remove_member(&mut self, card: i32) -> bool {
        let before = self.members.len();
        self.members.retain(|&c| c != card);
        self.members.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn from_toml(name: &str, table: &toml::Table) -> Result<Self> {
        let mut group = CardGroup::new(name);

        if let Some(value) = table.get(MEMBERS_KEY) {
            group.members = parse_members(name, value)?;
        }

        for field in GroupField::ALL {
            if let Some(value) = table.get(field.key()) {
                group.set(field, parse_i64(name, field.key(), value)?);
            }
        }

        Ok(group)
    }

    fn to_toml(&self) -> toml::Table {
        let mut table = toml::Table::new();
        table.insert(
            MEMBERS_KEY.to_string(),
            toml::Value::Array(
                self.members
                    .iter()
                    .map(|&c| toml::Value::Integer(i64::from(c)))
                    .collect(),
            ),
        );
        for field in GroupField::ALL {
            if let Some(value) = self.get(field) {
                table.insert(field.key().to_string(), toml::Value::Integer(value));
            }
        }
        table
    }
}

/// Read an integer field, widening legacy string-encoded values.
fn parse_i64(group: &str, field: &str, value: &toml::Value) -> Result<i64> {
    match value {
        toml::Value::Integer(v) => Ok(*v),
        toml::Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| BootError::malformed(group, field, format!("is not an integer: {:?}", s))),
        other => Err(BootError::malformed(
            group,
            field,
            format!("must be an integer, found {}", other.type_str()),
        )),
    }
}

fn parse_card(group: &str, value: &toml::Value) -> Result<i32> {
    let raw = parse_i64(group, MEMBERS_KEY, value)?;
    i32::try_from(raw)
        .ok()
        .filter(|c| *c >= 0)
        .ok_or_else(|| {
            BootError::malformed(group, MEMBERS_KEY, format!("invalid card number {}", raw))
        })
}

fn parse_members(group: &str, value: &toml::Value) -> Result<Vec<i32>> {
    let mut members = Vec::new();
    match value {
        toml::Value::Array(items) => {
            for item in items {
                let card = parse_card(group, item)?;
                if !members.contains(&card) {
                    members.push(card);
                }
            }
        }
        // Legacy slot-keyed compound, ordered by slot number
        toml::Value::Table(slots) => {
            let mut keyed = Vec::with_capacity(slots.len());
            for (slot, item) in slots {
                let slot: u32 = slot.parse().map_err(|_| {
                    BootError::malformed(group, MEMBERS_KEY, format!("invalid slot key {:?}", slot))
                })?;
                keyed.push((slot, parse_card(group, item)?));
            }
            keyed.sort_by_key(|(slot, _)| *slot);
            for (_, card) in keyed {
                if !members.contains(&card) {
                    members.push(card);
                }
            }
        }
        other => {
            return Err(BootError::malformed(
                group,
                MEMBERS_KEY,
                format!("must be an array of card numbers, found {}", other.type_str()),
            ))
        }
    }
    Ok(members)
}

/// In-memory copy of the whole group file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSnapshot {
    groups: Vec<CardGroup>,
}

impl GroupSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> &[CardGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&CardGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut CardGroup> {
        self.groups.iter_mut().find(|g| g.name == name)
    }

    pub fn find_or_create_group(&mut self, name: &str) -> &mut CardGroup {
        let pos = match self.groups.iter().position(|g| g.name == name) {
            Some(pos) => pos,
            None => {
                debug!(group = name, "creating group");
                self.groups.push(CardGroup::new(name));
                self.groups.len() - 1
            }
        };
        &mut self.groups[pos]
    }

    pub fn remove_group(&mut self, name: &str) -> Option<CardGroup> {
        let pos = self.groups.iter().position(|g| g.name == name)?;
        Some(self.groups.remove(pos))
    }

    /// Names of every group listing `card`, in file order.
    pub fn groups_containing(&self, card: i32) -> Vec<String> {
        self.groups
            .iter()
            .filter(|g| g.contains(card))
            .map(|g| g.name.clone())
            .collect()
    }

    /// Group to trust for `card`: among groups listing it that carry a
    /// `boot_realtime`, the one with the greatest value. Ties keep the
    /// earlier group.
    pub fn freshest_for(&self, card: i32) -> Option<&CardGroup> {
        let mut best: Option<&CardGroup> = None;
        for group in self.groups.iter().filter(|g| g.contains(card)) {
            let Some(realtime) = group.boot_realtime else {
                debug!(group = %group.name, "boot_realtime not set, skipping");
                continue;
            };
            if best.and_then(|b| b.boot_realtime).map_or(true, |r| realtime > r) {
                best = Some(group);
            }
        }
        best
    }

    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| BootError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut snapshot = GroupSnapshot::new();
        for (name, value) in &table {
            let Some(group_table) = value.as_table() else {
                debug!(group = %name, "not a group table, skipping");
                continue;
            };
            snapshot.groups.push(CardGroup::from_toml(name, group_table)?);
        }
        Ok(snapshot)
    }

    pub fn render(&self) -> Result<String> {
        let mut table = toml::Table::new();
        for group in &self.groups {
            table.insert(group.name.clone(), toml::Value::Table(group.to_toml()));
        }
        toml::to_string(&table).map_err(|e| BootError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })
    }
}

/// The group file on disk.
#[derive(Debug, Clone)]
pub struct GroupStore {
    path: PathBuf,
}

impl GroupStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file; a missing file is an empty snapshot.
    pub fn load(&self) -> Result<GroupSnapshot> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "group file not found");
                return Ok(GroupSnapshot::new());
            }
            Err(e) => return Err(BootError::io(&self.path, e)),
        };
        GroupSnapshot::parse(&contents, &self.path)
    }

    /// Save atomically: write `<path>.new`, then rename over the target.
    pub fn save(&self, snapshot: &GroupSnapshot) -> Result<()> {
        let rendered = snapshot.render()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| BootError::io(parent, e))?;
        }

        let mut temp = self.path.clone().into_os_string();
        temp.push(".new");
        let temp = PathBuf::from(temp);

        fs::write(&temp, rendered).map_err(|e| BootError::io(&temp, e))?;
        fs::rename(&temp, &self.path).map_err(|e| BootError::io(&self.path, e))?;
        debug!(path = %self.path.display(), groups = snapshot.groups.len(), "saved group file");
        Ok(())
    }
}
