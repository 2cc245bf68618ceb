//! Generation-checked registry of live objects reachable from add-ons.
//!
//! Add-ons never see host pointers. They get an [`InstanceToken`] which the
//! host resolves here; a token whose slot was reused or never existed
//! resolves to `None`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceToken {
    slot: u32,
    generation: u32,
}

impl InstanceToken {
    pub fn as_u64(self) -> u64 {
        ((self.generation as u64) << 32) | self.slot as u64
    }

    pub fn from_u64(raw: u64) -> Self {
        Self {
            slot: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

impl std::fmt::Display for InstanceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.as_u64())
    }
}

struct Slot<T> {
    generation: u32,
    entry: Option<Weak<T>>,
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

pub struct Arena<T> {
    inner: Mutex<Slots<T>>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
            }),
        }
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a value that may still be under construction, e.g. from
    /// inside [`Arc::new_cyclic`].
    pub fn insert_weak(&self, weak: Weak<T>) -> InstanceToken {
        let mut inner = self.inner.lock();

        if let Some(slot) = inner.free.pop() {
            let entry = &mut inner.slots[slot as usize];
            entry.entry = Some(weak);
            return InstanceToken {
                slot,
                generation: entry.generation,
            };
        }

        let slot = inner.slots.len() as u32;
        inner.slots.push(Slot {
            generation: 1,
            entry: Some(weak),
        });
        InstanceToken {
            slot,
            generation: 1,
        }
    }

    pub fn get(&self, token: InstanceToken) -> Option<Arc<T>> {
        let inner = self.inner.lock();
        let slot = inner.slots.get(token.slot as usize)?;
        if slot.generation != token.generation {
            return None;
        }
        slot.entry.as_ref()?.upgrade()
    }

    /// Returns false for stale tokens.
    pub fn remove(&self, token: InstanceToken) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(token.slot as usize) else {
            return false;
        };
        if slot.generation != token.generation || slot.entry.is_none() {
            return false;
        }
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        inner.free.push(token.slot);
        true
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.slots.len() - inner.free.len()
    }
}
