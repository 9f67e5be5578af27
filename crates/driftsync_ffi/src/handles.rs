//! Generation-tagged handle arenas.
//!
//! FFI callers address objects through opaque `u64` keys instead of raw
//! pointers. A key packs a slot index and a generation counter; freeing a slot
//! bumps its generation, so a stale key is detected instead of aliasing
//! whatever lives in the slot next. Key `0` is never issued.

use parking_lot::Mutex;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of one handle type, shared behind a mutex.
pub struct HandleArena<T> {
    slots: Mutex<Vec<Slot<T>>>,
}

impl<T> HandleArena<T> {
    /// Creates an empty arena. Const so arenas can live in statics.
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Stores `value`, returning its key.
    pub fn insert(&self, value: T) -> u64 {
        let mut slots = self.slots.lock();
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.value.is_none() {
                slot.value = Some(value);
                return pack(index, slot.generation);
            }
        }
        slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        pack(slots.len() - 1, 0)
    }

    /// Clones the value behind `key`, if the key is live.
    pub fn get(&self, key: u64) -> Option<T>
    where
        T: Clone,
    {
        let slots = self.slots.lock();
        let (index, generation) = unpack(key)?;
        let slot = slots.get(index)?;
        if slot.generation != generation {
            return None;
        }
        slot.value.clone()
    }

    /// Runs `f` on the value behind `key` while holding the arena lock.
    pub fn with<R>(&self, key: u64, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut slots = self.slots.lock();
        let (index, generation) = unpack(key)?;
        let slot = slots.get_mut(index)?;
        if slot.generation != generation {
            return None;
        }
        slot.value.as_mut().map(f)
    }

    /// Removes and returns the value behind `key`. The slot's generation is
    /// bumped so the key can never resolve again.
    pub fn remove(&self, key: u64) -> Option<T> {
        let mut slots = self.slots.lock();
        let (index, generation) = unpack(key)?;
        let slot = slots.get_mut(index)?;
        if slot.generation != generation || slot.value.is_none() {
            return None;
        }
        slot.generation = slot.generation.wrapping_add(1);
        slot.value.take()
    }
}

// Low 32 bits hold index + 1 (so 0 is never a key), high 32 the generation.
fn pack(index: usize, generation: u32) -> u64 {
    ((generation as u64) << 32) | (index as u64 + 1)
}

fn unpack(key: u64) -> Option<(usize, u32)> {
    let low = (key & 0xFFFF_FFFF) as u32;
    if low == 0 {
        return None;
    }
    Some(((low - 1) as usize, (key >> 32) as u32))
}
