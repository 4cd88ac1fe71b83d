// Named-slot bind-group resolution.
//
// Grounded on the source's `BindGroup`/`ResourceBinder` (render/bind_group.hpp,
// render/resource_binder.hpp): a layout maps shader-facing names to
// root-descriptor or descriptor-table slots, and `build()` walks the
// caller's `set_*` calls to produce an immutable, cloneable bound set.
//
// Austin Shafer - 2024

use crate::descriptor::{DescriptorAllocator, DescriptorRange};
use crate::handle::{Handle, HandleKind};
use crate::resources::{Buffer, ResourceState, Texture};
use crate::state_tracker::ResourceKey;
use std::collections::HashMap;
use std::sync::Arc;

/// What kind of view a root-descriptor or table slot expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Cbv,
    Srv,
    Uav,
}

impl DescriptorKind {
    /// The state a resource must be in to be bound through this kind of
    /// view (§4.4: "CBV -> vertex-and-constant-buffer; SRV -> shader
    /// resource; UAV -> unordered-access").
    pub fn required_state(&self) -> ResourceState {
        match self {
            DescriptorKind::Cbv => ResourceState::VertexAndConstantBuffer,
            DescriptorKind::Srv => ResourceState::ShaderResource,
            DescriptorKind::Uav => ResourceState::UnorderedAccess,
        }
    }
}

/// Where a named slot lives in the pipeline's root signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    RootConstant { root_parameter_index: u32, offset_in_32bit_values: u32 },
    RootDescriptor { root_parameter_index: u32, view: DescriptorKind },
    TableSlot { table_index: u32, view: DescriptorKind, array_len: u32 },
}

/// A layout produced at pipeline-creation time: a fixed `name -> slot`
/// mapping, built once and shared (cheaply, via `Arc`) by every bind-group
/// built against that pipeline.
#[derive(Debug, Default)]
pub struct BindGroupLayout {
    slots: HashMap<&'static str, SlotKind>,
}

impl BindGroupLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slot(mut self, name: &'static str, slot: SlotKind) -> Self {
        self.slots.insert(name, slot);
        self
    }
}

enum Assignment {
    Buffer(Handle<Buffer>),
    Texture(Handle<Texture>),
    TextureArray(Vec<Handle<Texture>>),
}

/// One resolved slot in a built `BindGroup`.
#[derive(Debug, Clone)]
pub enum ResolvedSlot {
    RootConstant {
        root_parameter_index: u32,
        offset_in_32bit_values: u32,
        value: u32,
    },
    RootDescriptor {
        root_parameter_index: u32,
        resource: ResourceKey,
    },
    Table {
        range: DescriptorRange,
    },
}

/// An immutable, cloneable bundle of resolved slot assignments. Bind-groups
/// hold handles, not native pointers, so cloning one is cheap and carries no
/// ownership (I5: rebuilding requires producing a new value, this one is
/// never mutated in place).
#[derive(Debug, Clone)]
pub struct BindGroup {
    pub(crate) slots: Vec<ResolvedSlot>,
    pub(crate) used_resources: Vec<(ResourceKey, ResourceState)>,
    pub(crate) heap: Option<crate::descriptor::DescriptorHeapKind>,
}

impl BindGroup {
    pub fn used_resources(&self) -> &[(ResourceKey, ResourceState)] {
        &self.used_resources
    }
}

/// Accumulates `set_*` calls against a layout, then resolves them into a
/// `BindGroup`.
pub struct BindGroupBuilder<'a> {
    layout: Arc<BindGroupLayout>,
    assignments: HashMap<&'static str, Assignment>,
    descriptor_allocator: &'a mut DescriptorAllocator,
}

impl<'a> BindGroupBuilder<'a> {
    pub fn new(layout: Arc<BindGroupLayout>, descriptor_allocator: &'a mut DescriptorAllocator) -> Self {
        Self {
            layout,
            assignments: HashMap::new(),
            descriptor_allocator,
        }
    }

    pub fn set_buffer(&mut self, name: &'static str, handle: Handle<Buffer>) -> &mut Self {
        self.assignments.insert(name, Assignment::Buffer(handle));
        self
    }

    pub fn set_texture(&mut self, name: &'static str, handle: Handle<Texture>) -> &mut Self {
        self.assignments.insert(name, Assignment::Texture(handle));
        self
    }

    pub fn set_texture_array(&mut self, name: &'static str, handles: Vec<Handle<Texture>>) -> &mut Self {
        self.assignments.insert(name, Assignment::TextureArray(handles));
        self
    }

    pub fn set_acceleration_structure(&mut self, name: &'static str, handle: Handle<Buffer>) -> &mut Self {
        // Acceleration structures are addressed through the buffer table at
        // the descriptor level (§9): BLAS vs TLAS is a tag on the resource
        // record, not a distinct handle kind.
        self.assignments.insert(name, Assignment::Buffer(handle));
        self
    }

    /// Resolve every named slot in the layout against the assignments
    /// accumulated so far. Unbound names produce a warning, not an error -
    /// matching the source's deliberate lenience (§4.4).
    pub fn build(&mut self) -> crate::error::Result<BindGroup> {
        let mut slots = Vec::new();
        let mut used_resources = Vec::new();
        let mut heap = None;

        for (&name, slot_kind) in self.layout.slots.iter() {
            let assignment = match self.assignments.get(name) {
                Some(a) => a,
                None => {
                    utils::log::error!("bind-group slot '{}' left unbound; shader will read garbage", name);
                    continue;
                }
            };

            match (*slot_kind, assignment) {
                (SlotKind::RootConstant { root_parameter_index, offset_in_32bit_values }, Assignment::Buffer(h)) => {
                    slots.push(ResolvedSlot::RootConstant {
                        root_parameter_index,
                        offset_in_32bit_values,
                        value: h.index,
                    });
                }
                (SlotKind::RootDescriptor { root_parameter_index, view }, Assignment::Buffer(h)) => {
                    let key: ResourceKey = (*h).into();
                    used_resources.push((key, view.required_state()));
                    slots.push(ResolvedSlot::RootDescriptor { root_parameter_index, resource: key });
                }
                (SlotKind::TableSlot { view, array_len, .. }, Assignment::Texture(h)) => {
                    let range = self.descriptor_allocator.allocate(array_len.max(1))?;
                    let key: ResourceKey = (*h).into();
                    used_resources.push((key, view.required_state()));
                    heap = Some(range.heap);
                    slots.push(ResolvedSlot::Table { range });
                }
                (SlotKind::TableSlot { view, .. }, Assignment::TextureArray(handles)) => {
                    let range = self.descriptor_allocator.allocate(handles.len() as u32)?;
                    for h in handles {
                        let key: ResourceKey = (*h).into();
                        used_resources.push((key, view.required_state()));
                    }
                    heap = Some(range.heap);
                    slots.push(ResolvedSlot::Table { range });
                }
                (SlotKind::TableSlot { view, array_len, .. }, Assignment::Buffer(h)) => {
                    let range = self.descriptor_allocator.allocate(array_len.max(1))?;
                    let key: ResourceKey = (*h).into();
                    used_resources.push((key, view.required_state()));
                    heap = Some(range.heap);
                    slots.push(ResolvedSlot::Table { range });
                }
                _ => {
                    utils::log::error!("bind-group slot '{}' assignment kind does not match layout slot kind", name);
                }
            }
        }

        Ok(BindGroup { slots, used_resources, heap })
    }
}
