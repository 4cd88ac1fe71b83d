// Generational handles and the typed arena that resolves them.
//
// The free-slot reuse scheme below is the same one lluvia's IdTable uses
// for entity ids: a stack of freed indices is checked before growing the
// backing Vec. This arena generalizes that scheme with a generation count
// per slot, since unlike an entity id a resource handle may be compared for
// equality long after the slot it named has been recycled.
//
// Austin Shafer - 2024

use std::marker::PhantomData;

/// What kind of resource a handle refers to. Stored in the handle itself so
/// that a `Handle<Buffer>` and a `Handle<Texture>` sharing the same index
/// can never compare equal by accident if they're ever erased to a common
/// representation (they are not in this crate, but the tag costs nothing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Buffer,
    Texture,
    BindGroup,
}

/// An opaque, typed, generational index into a resource table.
///
/// Two handles are equal iff they name the same live resource: both the
/// slot index and the generation at the time of creation must match. A
/// handle survives across frames; the resource it names may not - asking
/// the owning table to resolve a stale handle returns
/// `BackendError::INVALID_HANDLE` rather than silently returning whatever
/// now occupies the slot.
pub struct Handle<T> {
    pub(crate) kind: HandleKind,
    pub(crate) index: u32,
    pub(crate) generation: u32,
    _marker: PhantomData<fn() -> T>,
}

// `PhantomData<fn() -> T>` makes the derives below possible without
// requiring `T: Clone`/`T: Copy`/etc, since the handle never actually holds
// a `T`.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.index == other.index && self.generation == other.generation
    }
}
impl<T> Eq for Handle<T> {}
impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.index.hash(state);
        self.generation.hash(state);
    }
}
impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &self.kind)
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

struct Slot<T> {
    generation: u32,
    // `None` means the slot is free.
    value: Option<T>,
}

/// A typed table of live resources, indexed by `Handle<T>`.
///
/// `create` reuses the most recently freed slot before growing the backing
/// `Vec`, exactly the way `lluvia::IdTable::create_id` scans its
/// `i_valid_ids` free list before pushing a new entry - the difference is
/// that this table also bumps a generation counter on reuse, so a `Handle`
/// captured before the slot was freed never resolves to the new occupant.
pub struct HandleTable<T> {
    kind: HandleKind,
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
}

impl<T> HandleTable<T> {
    pub fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            free_list: Vec::new(),
        }
    }

    /// Insert `value` and return a fresh handle naming it.
    pub fn create(&mut self, value: T) -> Handle<T> {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle {
                kind: self.kind,
                index,
                generation: slot.generation,
                _marker: PhantomData,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Handle {
            kind: self.kind,
            index,
            generation: 0,
            _marker: PhantomData,
        }
    }

    fn resolve(&self, handle: Handle<T>) -> Option<&Slot<T>> {
        if handle.kind != self.kind {
            return None;
        }
        self.slots.get(handle.index as usize).filter(|slot| {
            slot.generation == handle.generation && slot.value.is_some()
        })
    }

    /// Look up the record a handle refers to. Returns `None` for a dead or
    /// foreign handle - callers in this crate turn that into
    /// `BackendError::INVALID_HANDLE`.
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.resolve(handle).and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if handle.kind != self.kind {
            return None;
        }
        let generation_matches = self
            .slots
            .get(handle.index as usize)
            .map(|slot| slot.generation == handle.generation && slot.value.is_some())
            .unwrap_or(false);
        if !generation_matches {
            return None;
        }
        self.slots[handle.index as usize].value.as_mut()
    }

    /// Whether `handle` currently resolves to a live value.
    pub fn is_valid(&self, handle: Handle<T>) -> bool {
        self.resolve(handle).is_some()
    }

    /// Remove and return the value behind `handle`, bumping the slot's
    /// generation so no copy of `handle` taken before this call can ever
    /// resolve again, and pushing the slot onto the free list for reuse.
    ///
    /// This is the second phase of two-phase destruction: the first phase
    /// (moving the handle onto a frame's "resources to destroy" list)
    /// happens in the resource tables built on top of this arena, not here.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        if !self.is_valid(handle) {
            return None;
        }
        let slot = &mut self.slots[handle.index as usize];
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        value
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a type-erased `ResourceKey` the way `get` resolves a typed
    /// `Handle<T>`. Used where the caller only has the state tracker's
    /// erased identity (e.g. translating a recorded barrier back to its
    /// native device handle).
    pub fn get_by_key(&self, key: crate::state_tracker::ResourceKey) -> Option<&T> {
        if key.kind() != self.kind {
            return None;
        }
        self.slots
            .get(key.index() as usize)
            .filter(|slot| slot.generation == key.generation() && slot.value.is_some())
            .and_then(|slot| slot.value.as_ref())
    }

    /// Whether `key` currently resolves to a live value in this table.
    pub fn is_valid_key(&self, key: crate::state_tracker::ResourceKey) -> bool {
        self.get_by_key(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get_round_trips() {
        let mut table: HandleTable<u32> = HandleTable::new(HandleKind::Buffer);
        let h = table.create(7);
        assert_eq!(table.get(h), Some(&7));
    }

    #[test]
    fn removed_handle_is_invalid() {
        let mut table: HandleTable<u32> = HandleTable::new(HandleKind::Buffer);
        let h = table.create(7);
        table.remove(h);
        assert_eq!(table.get(h), None);
        assert!(!table.is_valid(h));
    }

    #[test]
    fn stale_handle_does_not_alias_new_occupant() {
        let mut table: HandleTable<u32> = HandleTable::new(HandleKind::Buffer);
        let stale = table.create(1);
        table.remove(stale);

        let fresh = table.create(2);
        // Reuses the same slot index...
        assert_eq!(stale.index, fresh.index);
        // ...but the generation moved on, so the old handle is dead.
        assert_eq!(table.get(stale), None);
        assert_eq!(table.get(fresh), Some(&2));
        assert_ne!(stale, fresh);
    }

    #[test]
    fn mismatched_kind_never_resolves() {
        let mut buffers: HandleTable<u32> = HandleTable::new(HandleKind::Buffer);
        let textures: HandleTable<u32> = HandleTable::new(HandleKind::Texture);
        let h = buffers.create(1);
        assert_eq!(textures.get(h), None);
    }
}
