//! In-process cards.
//!
//! Backs the test suite. State is shared between clones and across
//! threads, so one thread can block in [`CardControl::wait`] while another
//! writes the element.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::element::{
    BootParams, CardBackend, CardControl, ControlEvent, ElementKind, ElementShape, EventIface,
    OpenMode, BOOT_VALUE_COUNT,
};
use crate::error::{BootError, Result};

#[derive(Debug, Default)]
struct CardState {
    values: Option<Vec<i64>>,
    events: Vec<ControlEvent>,
}

#[derive(Debug, Default)]
struct Shared {
    cards: Mutex<BTreeMap<i32, CardState>>,
    changed: Condvar,
}

impl Shared {
    fn cards(&self) -> MutexGuard<'_, BTreeMap<i32, CardState>> {
        self.cards.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A set of simulated cards.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug in a card without a `.Boot` element.
    pub fn add_card(&self, card: i32) {
        self.shared.cards().entry(card).or_default();
    }

    /// Unplug a card; open handles start failing.
    pub fn remove_card(&self, card: i32) {
        self.shared.cards().remove(&card);
        self.shared.changed.notify_all();
    }

    /// Set the element directly, plugging the card in if needed.
    /// Subscribers see a value-change event.
    pub fn set_boot_params(&self, card: i32, params: BootParams) {
        let mut cards = self.shared.cards();
        let state = cards.entry(card).or_default();
        state.values = Some(params.values().to_vec());
        state.events.push(ControlEvent::boot_value_change());
        drop(cards);
        self.shared.changed.notify_all();
    }

    /// Install an element of arbitrary value count.
    pub fn set_raw_values(&self, card: i32, values: Vec<i64>) {
        self.shared.cards().entry(card).or_default().values = Some(values);
    }

    /// Emit an event for some other element on the card.
    pub fn notify_unrelated(&self, card: i32) {
        let mut cards = self.shared.cards();
        if let Some(state) = cards.get_mut(&card) {
            state.events.push(ControlEvent {
                value_changed: true,
                iface: EventIface::Mixer,
                name: "Master Playback Volume".to_string(),
                index: 0,
            });
        }
        drop(cards);
        self.shared.changed.notify_all();
    }

    pub fn boot_params(&self, card: i32) -> Option<BootParams> {
        let cards = self.shared.cards();
        let values = cards.get(&card)?.values.as_ref()?;
        let values: [i64; 4] = values.as_slice().try_into().ok()?;
        Some(BootParams::from_values(values))
    }

    pub fn cards(&self) -> Vec<i32> {
        self.shared.cards().keys().copied().collect()
    }
}

impl CardBackend for MemoryBackend {
    fn open(&self, card: i32, mode: OpenMode) -> Result<Box<dyn CardControl>> {
        let cards = self.shared.cards();
        let state = cards.get(&card).ok_or(BootError::NoSuchCard(card))?;
        let seen = state.events.len();
        drop(cards);

        Ok(Box::new(MemoryControl {
            card,
            mode,
            shared: Arc::clone(&self.shared),
            subscribed: false,
            seen,
        }))
    }
}

struct MemoryControl {
    card: i32,
    mode: OpenMode,
    shared: Arc<Shared>,
    subscribed: bool,
    seen: usize,
}

impl MemoryControl {
    fn with_state<T>(&self, f: impl FnOnce(&mut CardState) -> Result<T>) -> Result<T> {
        let mut cards = self.shared.cards();
        let state = cards
            .get_mut(&self.card)
            .ok_or(BootError::NoSuchCard(self.card))?;
        f(state)
    }

    fn writable(&self) -> Result<()> {
        match self.mode {
            OpenMode::ReadWrite => Ok(()),
            OpenMode::ReadOnly => Err(BootError::ReadOnly { card: self.card }),
        }
    }
}

impl CardControl for MemoryControl {
    fn card(&self) -> i32 {
        self.card
    }

    fn boot_shape(&self) -> Result<Option<ElementShape>> {
        self.with_state(|state| {
            Ok(state.values.as_ref().map(|values| ElementShape {
                kind: ElementKind::Integer64,
                count: values.len() as u32,
            }))
        })
    }

    fn read_boot_values(&self) -> Result<[i64; 4]> {
        let card = self.card;
        self.with_state(|state| {
            let values = state.values.as_ref().ok_or(BootError::Control {
                card,
                op: "read '.Boot'",
                message: "no such element".to_string(),
            })?;
            values
                .as_slice()
                .try_into()
                .map_err(|_| BootError::ElementShape {
                    card,
                    expected: "4 x INTEGER64",
                    found: format!("{} x INTEGER64", values.len()),
                })
        })
    }

    fn create_boot(&mut self) -> Result<()> {
        self.writable()?;
        self.with_state(|state| {
            if state.values.is_none() {
                state.values = Some(vec![-1; BOOT_VALUE_COUNT as usize]);
            }
            Ok(())
        })
    }

    fn write_boot_values(&mut self, values: [i64; 4]) -> Result<()> {
        self.writable()?;
        self.with_state(|state| {
            state.values = Some(values.to_vec());
            state.events.push(ControlEvent::boot_value_change());
            Ok(())
        })?;
        self.shared.changed.notify_all();
        Ok(())
    }

    fn subscribe(&mut self, enable: bool) -> Result<()> {
        let pending = self.with_state(|state| Ok(state.events.len()))?;
        self.subscribed = enable;
        self.seen = pending;
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<bool> {
        let seen = self.seen;
        let card = self.card;
        let subscribed = self.subscribed;
        let cards = self.shared.cards();
        let (cards, _timed_out) = self
            .shared
            .changed
            .wait_timeout_while(cards, timeout, |cards| match cards.get(&card) {
                Some(state) => !subscribed || state.events.len() <= seen,
                None => false,
            })
            .unwrap_or_else(|e| e.into_inner());

        match cards.get(&card) {
            Some(state) => Ok(subscribed && state.events.len() > seen),
            None => Err(BootError::NoSuchCard(card)),
        }
    }

    fn read_event(&mut self) -> Result<Option<ControlEvent>> {
        if !self.subscribed {
            return Ok(None);
        }
        let seen = self.seen;
        let event = self.with_state(|state| Ok(state.events.get(seen).cloned()))?;
        if event.is_some() {
            self.seen += 1;
        }
        Ok(event)
    }
}
