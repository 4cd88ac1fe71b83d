// A no-op DeviceOps implementation used by unit tests across the crate so
// the command list, scheduler and fluid pass can be exercised without an
// installed Vulkan driver. See device_ops.rs for why this seam exists.
//
// Austin Shafer - 2024

use crate::descriptor::DescriptorHeapKind;
use crate::device_ops::{DeviceOps, RawBarrier, RawBufferCreateInfo, RawImageCreateInfo};
use ash::vk;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

pub struct MockDeviceOps {
    next_handle: AtomicU32,
    pub timeline_value: AtomicU64,
    pub submitted: Mutex<Vec<(Vec<vk::CommandBuffer>, u64)>>,
}

impl MockDeviceOps {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU32::new(1),
            timeline_value: AtomicU64::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }

    fn next_raw_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst) as u64
    }
}

impl Default for MockDeviceOps {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceOps for MockDeviceOps {
    fn create_buffer(&self, _info: &RawBufferCreateInfo) -> Option<(vk::Buffer, vk::DeviceMemory, *mut u8)> {
        let h = self.next_raw_handle();
        Some((vk::Buffer::from_raw(h), vk::DeviceMemory::from_raw(h), std::ptr::null_mut()))
    }

    fn destroy_buffer(&self, _buffer: vk::Buffer, _memory: vk::DeviceMemory) {}

    fn create_image(&self, _info: &RawImageCreateInfo) -> Option<(vk::Image, vk::DeviceMemory, vk::ImageView)> {
        let h = self.next_raw_handle();
        Some((vk::Image::from_raw(h), vk::DeviceMemory::from_raw(h), vk::ImageView::from_raw(h)))
    }

    fn destroy_image(&self, _image: vk::Image, _memory: vk::DeviceMemory, _view: vk::ImageView) {}

    fn allocate_command_buffer(&self) -> vk::CommandBuffer {
        vk::CommandBuffer::from_raw(self.next_raw_handle())
    }

    fn begin_command_buffer(&self, _cmd: vk::CommandBuffer) {}
    fn end_command_buffer(&self, _cmd: vk::CommandBuffer) {}
    fn reset_command_buffer(&self, _cmd: vk::CommandBuffer) {}

    fn cmd_pipeline_barrier(&self, _cmd: vk::CommandBuffer, _barriers: &[RawBarrier]) {}
    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, _pipeline: vk::Pipeline, _bind_point: vk::PipelineBindPoint) {}
    fn cmd_bind_descriptor_heap(&self, _cmd: vk::CommandBuffer, _heap: DescriptorHeapKind) {}
    fn cmd_draw(&self, _cmd: vk::CommandBuffer, _vertex_count: u32, _instance_count: u32) {}
    fn cmd_draw_indexed(&self, _cmd: vk::CommandBuffer, _index_count: u32, _instance_count: u32) {}
    fn cmd_dispatch(&self, _cmd: vk::CommandBuffer, _x: u32, _y: u32, _z: u32) {}
    fn cmd_dispatch_indirect(&self, _cmd: vk::CommandBuffer, _argument_buffer: vk::Buffer, _offset: u64) {}
    fn cmd_draw_indexed_indirect(&self, _cmd: vk::CommandBuffer, _argument_buffer: vk::Buffer, _offset: u64, _draw_count: u32) {}
    fn cmd_copy_buffer(&self, _cmd: vk::CommandBuffer, _src: vk::Buffer, _dst: vk::Buffer, _size: u64, _src_offset: u64, _dst_offset: u64) {}
    fn cmd_copy_texture(&self, _cmd: vk::CommandBuffer, _src: vk::Image, _dst: vk::Image, _width: u32, _height: u32) {}
    fn cmd_build_acceleration_structure(&self, _cmd: vk::CommandBuffer, _buffer: vk::Buffer) {}

    fn submit(&self, cmds: &[vk::CommandBuffer], signal_value: u64) {
        self.submitted.lock().unwrap().push((cmds.to_vec(), signal_value));
        self.timeline_value.store(signal_value, Ordering::SeqCst);
    }

    fn wait_timeline_value(&self, _value: u64) {
        // The mock submits synchronously, so by the time `submit` returns
        // every signalled value is already current - nothing to wait for.
    }

    fn present(&self) {}
}
