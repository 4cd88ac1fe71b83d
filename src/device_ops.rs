// The hardware boundary: every raw Vulkan call the render graph core needs
// to issue, behind one trait.
//
// The source's tests drive a real device through a headless swapchain and
// diff rendered pixels (thundr/src/tests.rs does the Vulkan equivalent).
// This crate's properties (P1-P6, the handle/tracker/allocator/bind-group
// logic) are pure CPU-side data structure invariants and don't need a real
// device to verify - so the command list, scheduler and fluid pass are
// written against this trait instead of `ash::Device` directly, and
// `MockDeviceOps` (see tests_support.rs) exercises them without an
// installed Vulkan driver. A production caller installs its own
// `DeviceOps` implementation backed by a real `ash::Device`; this crate
// only ships the trait and the test double. See DESIGN.md for the
// rationale.
//
// Austin Shafer - 2024

use ash::vk;

/// A single resource-state transition, translated to whatever barrier shape
/// the raw device needs. The render graph core only ever produces these
/// through `StateTracker`; this trait just needs to be able to submit them.
#[derive(Debug, Clone, Copy)]
pub struct RawBarrier {
    pub buffer: Option<vk::Buffer>,
    pub image: Option<vk::Image>,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

pub struct RawBufferCreateInfo<'a> {
    pub name: &'a str,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub host_visible: bool,
}

pub struct RawImageCreateInfo<'a> {
    pub name: &'a str,
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub usage: vk::ImageUsageFlags,
}

/// Every primitive operation the render graph core needs from the device.
///
/// Methods are infallible from the trait's point of view in the sense that
/// they report failure through `ash::vk::Result`-shaped `Option`/`bool`
/// returns rather than panicking - a real implementation maps genuine
/// Vulkan failures onto this; `MockDeviceOps` always succeeds.
pub trait DeviceOps: Send + Sync {
    fn create_buffer(&self, info: &RawBufferCreateInfo) -> Option<(vk::Buffer, vk::DeviceMemory, *mut u8)>;
    fn destroy_buffer(&self, buffer: vk::Buffer, memory: vk::DeviceMemory);

    fn create_image(&self, info: &RawImageCreateInfo) -> Option<(vk::Image, vk::DeviceMemory, vk::ImageView)>;
    fn destroy_image(&self, image: vk::Image, memory: vk::DeviceMemory, view: vk::ImageView);

    fn allocate_command_buffer(&self) -> vk::CommandBuffer;
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer);
    fn end_command_buffer(&self, cmd: vk::CommandBuffer);
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer);

    fn cmd_pipeline_barrier(&self, cmd: vk::CommandBuffer, barriers: &[RawBarrier]);
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline, bind_point: vk::PipelineBindPoint);
    fn cmd_bind_descriptor_heap(&self, cmd: vk::CommandBuffer, heap: crate::descriptor::DescriptorHeapKind);
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32);
    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32, instance_count: u32);
    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32);
    fn cmd_dispatch_indirect(&self, cmd: vk::CommandBuffer, argument_buffer: vk::Buffer, offset: u64);
    fn cmd_draw_indexed_indirect(&self, cmd: vk::CommandBuffer, argument_buffer: vk::Buffer, offset: u64, draw_count: u32);
    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: u64, src_offset: u64, dst_offset: u64);
    fn cmd_copy_texture(&self, cmd: vk::CommandBuffer, src: vk::Image, dst: vk::Image, width: u32, height: u32);
    fn cmd_build_acceleration_structure(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer);

    /// Submit a batch of recorded command buffers to the graphics queue and
    /// signal `signal_value` on the timeline semaphore once they complete.
    fn submit(&self, cmds: &[vk::CommandBuffer], signal_value: u64);

    /// Block the calling thread until the timeline semaphore reaches
    /// `value`.
    fn wait_timeline_value(&self, value: u64);

    fn present(&self);
}
