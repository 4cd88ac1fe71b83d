// Per-command-list resource state tracking and barrier emission.
//
// Grounded on the source's `D3D12CommandList::set_resource_state` /
// `need_barrier_between_states` (d3d12_command_list.cpp): two maps,
// `initial_states` and `current_states` (called `most_recent_resource_states`
// in the source), keyed by resource identity rather than by a typed handle,
// since a single command list touches both buffers and textures.
//
// Austin Shafer - 2024

use crate::handle::{Handle, HandleKind};
use crate::resources::ResourceState;
use std::collections::HashMap;

/// Type-erased identity of a handle, used as the state tracker's map key so
/// that one tracker instance can hold both buffer and texture handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    kind: HandleKind,
    index: u32,
    generation: u32,
}

impl<T> From<Handle<T>> for ResourceKey {
    fn from(h: Handle<T>) -> Self {
        Self {
            kind: h.kind,
            index: h.index,
            generation: h.generation,
        }
    }
}

impl ResourceKey {
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }
}

/// One recorded transition, in the order `set_state` produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub resource: ResourceKey,
    pub old_state: ResourceState,
    pub new_state: ResourceState,
}

/// Tracks the state of every resource touched by one command list, emitting
/// a minimal set of transition barriers as callers declare intent via
/// `set_state`.
///
/// Per invariant I3 `current_states` always reflects the *last recorded*
/// state of a touched resource; per the barrier-minimality contract (P2),
/// each `set_state` call records at most one barrier.
#[derive(Debug, Default)]
pub struct StateTracker {
    initial_states: HashMap<ResourceKey, ResourceState>,
    current_states: HashMap<ResourceKey, ResourceState>,
    barriers: Vec<Barrier>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed this tracker's initial state for a resource. Used by the
    /// scheduler to thread list N's `final_states()` into list N+1's
    /// `initial_states` within the same frame (see scheduler.rs).
    pub fn seed_initial_state(&mut self, resource: impl Into<ResourceKey>, state: ResourceState) {
        let key = resource.into();
        self.initial_states.entry(key).or_insert(state);
        self.current_states.entry(key).or_insert(state);
    }

    /// Declare that `resource` must be in `required` state for the next
    /// operation that uses it. Emits at most one barrier.
    pub fn set_state(&mut self, resource: impl Into<ResourceKey>, required: ResourceState) {
        let key = resource.into();

        let current = match self.current_states.get(&key).copied() {
            None => {
                // First time we've seen this resource in this list - record
                // it in both maps with no barrier (I3).
                self.initial_states.insert(key, required);
                self.current_states.insert(key, required);
                return;
            }
            Some(state) => state,
        };

        if current == required {
            return;
        }

        if current == ResourceState::Common
            && required.is_implicit_read_promotion()
            && key.kind == HandleKind::Buffer
        {
            // Implicit promotion the backend guarantees with no barrier.
            // Only buffers get this for free (§4.3); a plain texture still
            // needs a recorded transition even into a read state.
            self.current_states.insert(key, required);
            return;
        }

        self.barriers.push(Barrier {
            resource: key,
            old_state: current,
            new_state: required,
        });
        self.current_states.insert(key, required);
    }

    /// The state a resource must be in when this list begins, for every
    /// resource touched so far.
    pub fn initial_states(&self) -> &HashMap<ResourceKey, ResourceState> {
        &self.initial_states
    }

    /// The state every touched resource is in as of the last recorded
    /// operation. The scheduler reads this at submission time to seed the
    /// next list's `initial_states`.
    pub fn final_states(&self) -> &HashMap<ResourceKey, ResourceState> {
        &self.current_states
    }

    /// Barriers recorded so far, in recording order.
    pub fn barriers(&self) -> &[Barrier] {
        &self.barriers
    }

    pub fn current_state_of(&self, resource: impl Into<ResourceKey>) -> Option<ResourceState> {
        self.current_states.get(&resource.into()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleTable;

    fn texture_key() -> ResourceKey {
        let mut table: HandleTable<u32> = HandleTable::new(HandleKind::Texture);
        table.create(0).into()
    }

    fn buffer_key() -> ResourceKey {
        let mut table: HandleTable<u32> = HandleTable::new(HandleKind::Buffer);
        table.create(0).into()
    }

    #[test]
    fn first_touch_emits_no_barrier() {
        let mut tracker = StateTracker::new();
        tracker.set_state(texture_key(), ResourceState::ShaderResource);
        assert!(tracker.barriers().is_empty());
    }

    #[test]
    fn p2_repeated_set_state_emits_exactly_one_barrier() {
        let mut tracker = StateTracker::new();
        let h = texture_key();

        tracker.seed_initial_state(h, ResourceState::Common);
        tracker.set_state(h, ResourceState::RenderTarget);
        tracker.set_state(h, ResourceState::RenderTarget);

        assert_eq!(tracker.barriers().len(), 1);
        assert_eq!(tracker.barriers()[0].old_state, ResourceState::Common);
        assert_eq!(tracker.barriers()[0].new_state, ResourceState::RenderTarget);
    }

    /// Literal P2 scenario from spec.md §8, on a plain texture handle: a
    /// non-simultaneous-access texture gets no implicit Common->SRV
    /// promotion, so the first set_state records a real barrier and the
    /// second is the no-op repeat.
    #[test]
    fn p2_literal_scenario_on_texture_emits_common_to_srv_barrier() {
        let mut tracker = StateTracker::new();
        let h = texture_key();

        tracker.seed_initial_state(h, ResourceState::Common);
        tracker.set_state(h, ResourceState::ShaderResource);
        tracker.set_state(h, ResourceState::ShaderResource);

        assert_eq!(tracker.barriers().len(), 1);
        assert_eq!(tracker.barriers()[0].old_state, ResourceState::Common);
        assert_eq!(tracker.barriers()[0].new_state, ResourceState::ShaderResource);
    }

    #[test]
    fn buffer_common_to_read_state_promotes_without_barrier() {
        let mut tracker = StateTracker::new();
        let h = buffer_key();
        tracker.seed_initial_state(h, ResourceState::Common);
        tracker.set_state(h, ResourceState::ShaderResource);
        assert!(tracker.barriers().is_empty());
        assert_eq!(tracker.current_state_of(h), Some(ResourceState::ShaderResource));
    }

    #[test]
    fn final_states_reflects_last_recorded_state() {
        let mut tracker = StateTracker::new();
        let h = texture_key();
        tracker.set_state(h, ResourceState::RenderTarget);
        tracker.set_state(h, ResourceState::CopySource);
        assert_eq!(tracker.final_states().get(&ResourceKey::from(h)), Some(&ResourceState::CopySource));
    }
}
