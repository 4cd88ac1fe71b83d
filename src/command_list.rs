// The command-list recorder.
//
// The source builds this capability set through a virtual-inheritance
// chain (`CommandList` <- `ResourceCommandList` <- `ComputeCommandList` <-
// `RenderCommandList`, see render/command_list.hpp through
// render/graphics_command_list.hpp). Since the underlying native command
// buffer is uniform, this crate collapses that hierarchy into one value
// type offering every capability (§9) rather than modelling a type per
// rung of the hierarchy.
//
// Austin Shafer - 2024

use crate::bind_group::BindGroup;
use crate::device_ops::{DeviceOps, RawBarrier};
use crate::error::{BackendError, Result};
use crate::handle::{Handle, HandleKind, HandleTable};
use crate::resources::{Buffer, ResourceState, Texture};
use crate::state_tracker::{Barrier, ResourceKey, StateTracker};
use ash::vk;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

type CompletionCallback = Box<dyn FnOnce() + Send + Sync>;

/// A thin wrapper over a native command buffer plus the bookkeeping needed
/// to keep the frame scheduler and state tracker in sync.
///
/// `(native_handle, allocator_ref, gpu_frame_index, initial_states,
/// final_states, completion_callbacks)` from §3's data model map directly
/// onto this struct's fields; `initial_states`/`final_states` live inside
/// the embedded `StateTracker`.
pub struct CommandList<D: DeviceOps> {
    device: Arc<D>,
    raw: vk::CommandBuffer,
    gpu_frame_index: u32,
    tracker: StateTracker,
    pipeline_kind: Option<PipelineKind>,
    current_heap: Option<crate::descriptor::DescriptorHeapKind>,
    completion_callbacks: Vec<CompletionCallback>,
    /// Every resource this list referenced, used by the scheduler to keep
    /// the underlying native objects alive at least until this frame's
    /// fence signals (I2), independent of whether they were also
    /// destroyed this frame.
    referenced_resources: Vec<ResourceKey>,
    copy_count: u32,
    /// How many of `tracker.barriers()` have already been translated and
    /// submitted; `flush_barriers` only sends the tail past this point.
    flushed_barrier_count: usize,
    /// References to the owning backend's resource tables, used to reject
    /// `set_state` on a handle that has already been destroyed (§7
    /// `InvalidHandle`) and to resolve a `ResourceKey` back to the native
    /// handle a `RawBarrier` needs.
    buffers: Arc<Mutex<HandleTable<Buffer>>>,
    textures: Arc<Mutex<HandleTable<Texture>>>,
}

impl<D: DeviceOps> CommandList<D> {
    /// Open a new command list on the given frame's allocator, against the
    /// owning backend's resource tables.
    pub fn open(
        device: Arc<D>,
        gpu_frame_index: u32,
        buffers: Arc<Mutex<HandleTable<Buffer>>>,
        textures: Arc<Mutex<HandleTable<Texture>>>,
    ) -> Self {
        let raw = device.allocate_command_buffer();
        device.reset_command_buffer(raw);
        device.begin_command_buffer(raw);
        Self {
            device,
            raw,
            gpu_frame_index,
            tracker: StateTracker::new(),
            pipeline_kind: None,
            current_heap: None,
            completion_callbacks: Vec::new(),
            referenced_resources: Vec::new(),
            copy_count: 0,
            flushed_barrier_count: 0,
            buffers,
            textures,
        }
    }

    pub fn gpu_frame_index(&self) -> u32 {
        self.gpu_frame_index
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.raw
    }

    /// Seed this list's tracker with the state resources are known to be
    /// in at the start of the list - the scheduler calls this with the
    /// previous list's `final_states()` for every resource carried over
    /// within the same frame.
    pub fn seed_initial_states(&mut self, states: impl IntoIterator<Item = (ResourceKey, ResourceState)>) {
        for (key, state) in states {
            self.tracker.seed_initial_state(key, state);
        }
    }

    pub fn set_pipeline(&mut self, kind: PipelineKind, pipeline: vk::Pipeline) {
        self.pipeline_kind = Some(kind);
        let bind_point = match kind {
            PipelineKind::Graphics => vk::PipelineBindPoint::GRAPHICS,
            PipelineKind::Compute => vk::PipelineBindPoint::COMPUTE,
        };
        self.device.cmd_bind_pipeline(self.raw, pipeline, bind_point);
    }

    /// Declare intent: `resource` must be in `state` for the next operation
    /// that touches it. The tracker decides whether a barrier is needed;
    /// callers never see the barrier verbs themselves (§4.5).
    ///
    /// Fails with `InvalidHandle` if `resource` has already been destroyed
    /// (scenario 6: `schedule_destroy(h)` followed by `set_state(h, ...)`
    /// after the handle's frame has retired).
    pub fn set_state(&mut self, resource: impl Into<ResourceKey> + Copy, state: ResourceState) -> Result<()> {
        let key = resource.into();
        if !self.is_resource_live(key) {
            return Err(BackendError::INVALID_HANDLE);
        }
        self.tracker.set_state(key, state);
        self.referenced_resources.push(key);
        Ok(())
    }

    fn is_resource_live(&self, key: ResourceKey) -> bool {
        match key.kind() {
            HandleKind::Buffer => self.buffers.lock().unwrap().is_valid_key(key),
            HandleKind::Texture => self.textures.lock().unwrap().is_valid_key(key),
            HandleKind::BindGroup => true,
        }
    }

    fn raw_buffer_handle(&self, key: ResourceKey) -> Option<vk::Buffer> {
        self.buffers.lock().unwrap().get_by_key(key).map(|b| b.raw)
    }

    fn raw_image_handle(&self, key: ResourceKey) -> Option<vk::Image> {
        self.textures.lock().unwrap().get_by_key(key).map(|t| t.raw)
    }

    fn bind_group_common(&mut self, bind_group: &BindGroup) {
        if let Some(heap) = bind_group.heap {
            if self.current_heap != Some(heap) {
                self.device.cmd_bind_descriptor_heap(self.raw, heap);
                self.current_heap = Some(heap);
            }
        }
        for &(resource, state) in bind_group.used_resources() {
            self.tracker.set_state(resource, state);
            self.referenced_resources.push(resource);
        }
    }

    pub fn bind_graphics(&mut self, bind_group: &BindGroup) {
        self.bind_group_common(bind_group);
    }

    pub fn bind_compute(&mut self, bind_group: &BindGroup) {
        self.bind_group_common(bind_group);
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.device.cmd_draw(self.raw, vertex_count, instance_count);
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) {
        self.device.cmd_draw_indexed(self.raw, index_count, instance_count);
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.flush_barriers();
        self.device.cmd_dispatch(self.raw, x, y, z);
    }

    pub fn execute_indirect(&mut self, argument_buffer: Handle<Buffer>, argument_buffer_raw: vk::Buffer, offset: u64, count: u32, is_draw: bool) {
        self.referenced_resources.push(argument_buffer.into());
        self.flush_barriers();
        if is_draw {
            self.device.cmd_draw_indexed_indirect(self.raw, argument_buffer_raw, offset, count);
        } else {
            self.device.cmd_dispatch_indirect(self.raw, argument_buffer_raw, offset);
        }
    }

    pub fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: u64, src_offset: u64, dst_offset: u64) {
        self.device.cmd_copy_buffer(self.raw, src, dst, size, src_offset, dst_offset);
    }

    pub fn copy_texture(&mut self, src: vk::Image, dst: vk::Image, width: u32, height: u32) {
        self.copy_count += 1;
        self.device.cmd_copy_texture(self.raw, src, dst, width, height);
    }

    /// Number of `copy_texture` calls recorded so far. Test-only
    /// introspection used to verify the fluid pass's finalisation stage
    /// emits exactly one copy when pressure-iteration count is odd
    /// (scenario 4).
    pub fn copy_count(&self) -> u32 {
        self.copy_count
    }

    pub fn build_acceleration_structure(&mut self, backing_buffer: vk::Buffer) {
        self.device.cmd_build_acceleration_structure(self.raw, backing_buffer);
    }

    /// Register a callback to run on the CPU once the GPU has finished the
    /// frame containing this list - e.g. returning a staging buffer to the
    /// pool once the copy using it has completed.
    pub fn add_completion_callback(&mut self, f: impl FnOnce() + Send + Sync + 'static) {
        self.completion_callbacks.push(Box::new(f));
    }

    /// Emit every barrier the tracker has accumulated since the last flush
    /// as a single pipeline-barrier call. Real command lists flush
    /// automatically before any dispatch/draw/copy that depends on the
    /// transitions; tests may also call this directly to inspect
    /// `tracker.barriers()` without issuing GPU work.
    pub fn flush_barriers(&mut self) {
        let barriers = self.tracker.barriers();
        if self.flushed_barrier_count >= barriers.len() {
            return;
        }
        let raw_barriers: Vec<RawBarrier> = barriers[self.flushed_barrier_count..]
            .iter()
            .map(|b| self.to_raw_barrier(b))
            .collect();
        self.flushed_barrier_count = barriers.len();
        if !raw_barriers.is_empty() {
            self.device.cmd_pipeline_barrier(self.raw, &raw_barriers);
        }
    }

    /// Translate one tracker-recorded transition into the raw device shape,
    /// resolving the resource's native handle from whichever table its
    /// `HandleKind` names.
    fn to_raw_barrier(&self, barrier: &Barrier) -> RawBarrier {
        let old_layout = resource_state_to_image_layout(barrier.old_state);
        let new_layout = resource_state_to_image_layout(barrier.new_state);
        let src_access = resource_state_to_access_flags(barrier.old_state);
        let dst_access = resource_state_to_access_flags(barrier.new_state);
        match barrier.resource.kind() {
            HandleKind::Buffer => RawBarrier {
                buffer: self.raw_buffer_handle(barrier.resource),
                image: None,
                old_layout,
                new_layout,
                src_access,
                dst_access,
            },
            HandleKind::Texture => RawBarrier {
                buffer: None,
                image: self.raw_image_handle(barrier.resource),
                old_layout,
                new_layout,
                src_access,
                dst_access,
            },
            HandleKind::BindGroup => RawBarrier {
                buffer: None,
                image: None,
                old_layout,
                new_layout,
                src_access,
                dst_access,
            },
        }
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    pub fn referenced_resources(&self) -> &[ResourceKey] {
        &self.referenced_resources
    }

    /// Close the list for submission, returning its completion callbacks so
    /// the scheduler can file them against this frame's fence value.
    pub fn close(mut self) -> (vk::CommandBuffer, StateTracker, Vec<CompletionCallback>) {
        self.device.end_command_buffer(self.raw);
        (self.raw, self.tracker, std::mem::take(&mut self.completion_callbacks))
    }
}

/// Maps a tracked resource state to the Vulkan image layout a barrier
/// transitions into/out of. Buffer states have no meaningful layout; they
/// map to `UNDEFINED`, which `RawBarrier::image` being `None` makes moot.
fn resource_state_to_image_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Common
        | ResourceState::VertexAndConstantBuffer
        | ResourceState::IndexBuffer
        | ResourceState::IndirectArgument => vk::ImageLayout::UNDEFINED,
        ResourceState::ShaderResource => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::UnorderedAccess => vk::ImageLayout::GENERAL,
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::DepthRead => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ResourceState::CopySource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::CopyDest => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

fn resource_state_to_access_flags(state: ResourceState) -> vk::AccessFlags {
    match state {
        ResourceState::Common | ResourceState::Present => vk::AccessFlags::empty(),
        ResourceState::VertexAndConstantBuffer => vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::UNIFORM_READ,
        ResourceState::IndexBuffer => vk::AccessFlags::INDEX_READ,
        ResourceState::ShaderResource => vk::AccessFlags::SHADER_READ,
        ResourceState::UnorderedAccess => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        ResourceState::RenderTarget => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ResourceState::DepthWrite => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ResourceState::DepthRead => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ResourceState::CopySource => vk::AccessFlags::TRANSFER_READ,
        ResourceState::CopyDest => vk::AccessFlags::TRANSFER_WRITE,
        ResourceState::IndirectArgument => vk::AccessFlags::INDIRECT_COMMAND_READ,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::MockDeviceOps;

    fn empty_buffers() -> Arc<Mutex<HandleTable<Buffer>>> {
        Arc::new(Mutex::new(HandleTable::new(HandleKind::Buffer)))
    }

    fn texture_with(raw: vk::Image) -> (Arc<Mutex<HandleTable<Texture>>>, Handle<Texture>) {
        let mut table: HandleTable<Texture> = HandleTable::new(HandleKind::Texture);
        let tex = table.create(Texture {
            name: "t".into(),
            format: crate::resources::TextureFormat::Rgba8Unorm,
            width: 1,
            height: 1,
            depth: 1,
            mip_count: 1,
            usage: crate::resources::TextureUsage::SAMPLED,
            raw,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
        });
        (Arc::new(Mutex::new(table)), tex)
    }

    #[test]
    fn set_state_records_in_tracker() {
        let device = Arc::new(MockDeviceOps::new());
        let (textures, tex) = texture_with(vk::Image::null());
        let mut list = CommandList::open(device, 0, empty_buffers(), textures);

        list.set_state(tex, ResourceState::ShaderResource).unwrap();
        assert_eq!(list.referenced_resources().len(), 1);
    }

    #[test]
    fn flush_barriers_translates_and_does_not_resend() {
        let device = Arc::new(MockDeviceOps::new());
        let (textures, tex) = texture_with(vk::Image::from_raw(42));
        let buffers = empty_buffers();
        let mut list = CommandList::open(device.clone(), 0, buffers, textures);

        list.seed_initial_states(vec![(tex.into(), ResourceState::Common)]);
        list.set_state(tex, ResourceState::RenderTarget).unwrap();
        list.flush_barriers();
        assert_eq!(device.submitted.lock().unwrap().len(), 0); // barriers aren't submits

        list.set_state(tex, ResourceState::CopySource).unwrap();
        list.flush_barriers();
        // A second flush with no new barriers must not resend the first one.
        assert_eq!(list.flushed_barrier_count, list.tracker().barriers().len());
        assert_eq!(list.tracker().barriers().len(), 2);
    }

    /// Scenario 6 from spec.md §8: a handle destroyed before its frame has
    /// retired must reject `set_state` with `InvalidHandle`.
    #[test]
    fn set_state_on_destroyed_handle_fails_with_invalid_handle() {
        let device = Arc::new(MockDeviceOps::new());
        let mut table: HandleTable<Texture> = HandleTable::new(HandleKind::Texture);
        let tex = table.create(Texture {
            name: "t".into(),
            format: crate::resources::TextureFormat::Rgba8Unorm,
            width: 1,
            height: 1,
            depth: 1,
            mip_count: 1,
            usage: crate::resources::TextureUsage::SAMPLED,
            raw: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
        });
        table.remove(tex);
        let textures = Arc::new(Mutex::new(table));

        let mut list = CommandList::open(device, 0, empty_buffers(), textures);
        assert_eq!(
            list.set_state(tex, ResourceState::ShaderResource),
            Err(crate::error::BackendError::INVALID_HANDLE)
        );
    }
}
