//! Handle registry
//!
//! Every host value behind a script proxy lives in a generational arena. The
//! proxy only carries the handle bits; a handle whose slot was released or
//! reused no longer resolves.

use crate::proxy::ProxyHandler;
use crate::value::HostValue;
use std::fmt;
use std::rc::Rc;

/// Registry handle (generation-indexed)
///
/// Format: [16-bit bridge | 16-bit generation | 32-bit index]
/// - Bridge: owning bridge, so handles never resolve in another bridge
/// - Generation: incremented when the slot is released
/// - Index: position in the slot array
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u16,
    bridge: u16,
}

impl Handle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u16 {
        self.generation
    }

    pub fn bridge(&self) -> u16 {
        self.bridge
    }

    /// Serialize to a 64-bit integer (the script-side pointer value)
    pub fn to_bits(&self) -> u64 {
        ((self.bridge as u64) << 48) | ((self.generation as u64) << 32) | (self.index as u64)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u16,
            bridge: (bits >> 48) as u16,
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}v{}", self.bridge, self.index, self.generation)
    }
}

/// A registered host value and the handler answering its traps.
#[derive(Clone)]
pub struct Entry {
    pub value: HostValue,
    pub handler: Rc<dyn ProxyHandler>,
}

struct Slot {
    generation: u16,
    entry: Option<Entry>,
}

pub struct HandleRegistry {
    bridge: u16,
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl HandleRegistry {
    pub fn new(bridge: u16) -> Self {
        Self {
            bridge,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, value: HostValue, handler: Rc<dyn ProxyHandler>) -> Handle {
        let entry = Some(Entry { value, handler });
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = entry;
            return Handle {
                index,
                generation: slot.generation,
                bridge: self.bridge,
            };
        }

        let index = self.slots.len() as u32;
        // Generations start at 1 so no handle serializes to zero.
        self.slots.push(Slot {
            generation: 1,
            entry,
        });
        Handle {
            index,
            generation: 1,
            bridge: self.bridge,
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&Entry> {
        if handle.bridge != self.bridge {
            return None;
        }
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Releases a handle, returning its entry so the caller decides when it drops.
    pub fn remove(&mut self, handle: Handle) -> Option<Entry> {
        if handle.bridge != self.bridge {
            return None;
        }
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        self.live -= 1;

        // A slot whose generation would wrap is retired instead of reused.
        match slot.generation.checked_add(1) {
            Some(next) => {
                slot.generation = next;
                self.free.push(handle.index);
            }
            None => {
                tracing::trace!(%handle, "registry slot retired");
            }
        }
        Some(entry)
    }

    /// Empties the registry, returning every live entry.
    pub fn drain(&mut self) -> Vec<Entry> {
        let entries: Vec<Entry> = self
            .slots
            .iter_mut()
            .filter_map(|slot| slot.entry.take())
            .collect();
        self.slots.clear();
        self.free.clear();
        self.live = 0;
        entries
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
