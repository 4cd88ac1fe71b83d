// The top-level object passes and higher layers talk to: resource tables,
// descriptor heaps, the staging-buffer pool and the frame scheduler, all
// wired together behind the methods §6 names.
//
// Grounded on the teacher's `Renderer`/`Display` split (category5/vkcomp/wm)
// for "one struct owns every device-adjacent table, guarded by its own
// mutex", generalized to the handle/table/scheduler types this crate uses
// instead of the teacher's Thundr image list.
//
// Austin Shafer - 2024

use crate::command_list::CommandList;
use crate::config::Config;
use crate::descriptor::{DescriptorAllocator, DescriptorHeapKind};
use crate::device_ops::{DeviceOps, RawBufferCreateInfo, RawImageCreateInfo};
use crate::error::{BackendError, Result};
use crate::handle::{Handle, HandleKind, HandleTable};
use crate::resources::{Buffer, BufferCreateInfo, BufferUsage, Texture, TextureCreateInfo};
use crate::scheduler::FrameScheduler;
use ash::vk;
use std::sync::{Arc, Mutex};
use utils::log;

/// A handle of either resource kind, accepted by `Backend::schedule_destroy`
/// so callers have one entry point regardless of what they're destroying
/// (§6: "schedule_destroy(handle)").
pub enum DestroyableHandle {
    Buffer(Handle<Buffer>),
    Texture(Handle<Texture>),
}

impl From<Handle<Buffer>> for DestroyableHandle {
    fn from(h: Handle<Buffer>) -> Self {
        DestroyableHandle::Buffer(h)
    }
}

impl From<Handle<Texture>> for DestroyableHandle {
    fn from(h: Handle<Texture>) -> Self {
        DestroyableHandle::Texture(h)
    }
}

/// The staging-buffer pool backing `get_staging_buffer`/`return_staging_buffer`
/// (P5). Buffers are matched by "large enough", not exact size, same as the
/// teacher's release-info pooling for transient upload buffers.
#[derive(Default)]
struct StagingPool {
    free: Vec<(u64, Handle<Buffer>)>,
}

impl StagingPool {
    fn take_fitting(&mut self, size: u64) -> Option<Handle<Buffer>> {
        let idx = self.free.iter().position(|&(s, _)| s >= size)?;
        Some(self.free.remove(idx).1)
    }

    fn give_back(&mut self, size: u64, handle: Handle<Buffer>) {
        self.free.push((size, handle));
    }
}

fn to_vk_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::STAGING) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::CONSTANT) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT_ARGS) {
        flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(BufferUsage::UNORDERED_ACCESS) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::ACCELERATION_STRUCTURE) {
        flags |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR;
    }
    flags
}

/// Top-level render-graph core object. Owns every device-adjacent table;
/// each is behind its own mutex so asset-loading worker threads can create
/// buffers/textures without blocking the render thread's recording (§5).
pub struct Backend<D: DeviceOps> {
    device: Arc<D>,
    config: Config,
    buffers: Arc<Mutex<HandleTable<Buffer>>>,
    textures: Arc<Mutex<HandleTable<Texture>>>,
    cbv_srv_uav_heap: Mutex<DescriptorAllocator>,
    rtv_heap: Mutex<DescriptorAllocator>,
    dsv_heap: Mutex<DescriptorAllocator>,
    scheduler: Mutex<FrameScheduler<D>>,
    staging_pool: Arc<Mutex<StagingPool>>,
}

impl<D: DeviceOps> Backend<D> {
    pub fn new(device: Arc<D>, config: Config) -> Self {
        let config = config.sanitized();
        Self {
            device: device.clone(),
            config,
            buffers: Arc::new(Mutex::new(HandleTable::new(HandleKind::Buffer))),
            textures: Arc::new(Mutex::new(HandleTable::new(HandleKind::Texture))),
            cbv_srv_uav_heap: Mutex::new(DescriptorAllocator::new(
                DescriptorHeapKind::CbvSrvUav,
                DescriptorAllocator::DEFAULT_CBV_SRV_UAV_CAPACITY,
            )),
            rtv_heap: Mutex::new(DescriptorAllocator::new(DescriptorHeapKind::RenderTargetView, 256)),
            dsv_heap: Mutex::new(DescriptorAllocator::new(DescriptorHeapKind::DepthStencilView, 64)),
            scheduler: Mutex::new(FrameScheduler::new(device, config.max_in_flight_gpu_frames)),
            staging_pool: Arc::new(Mutex::new(StagingPool::default())),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cbv_srv_uav_heap(&self) -> &Mutex<DescriptorAllocator> {
        &self.cbv_srv_uav_heap
    }

    pub fn rtv_heap(&self) -> &Mutex<DescriptorAllocator> {
        &self.rtv_heap
    }

    pub fn dsv_heap(&self) -> &Mutex<DescriptorAllocator> {
        &self.dsv_heap
    }

    /// §4.1 `create`. Returns `CREATION_FAILED` rather than an invalid
    /// handle when the device refuses the allocation - callers must not
    /// propagate a handle from the error path.
    pub fn create_buffer(&self, info: BufferCreateInfo) -> Result<Handle<Buffer>> {
        let raw_info = RawBufferCreateInfo {
            name: info.name,
            size: info.size,
            usage: to_vk_buffer_usage(info.usage),
            host_visible: info.usage.contains(BufferUsage::STAGING),
        };
        let (raw, memory, mapped_ptr) = self.device.create_buffer(&raw_info).ok_or_else(|| {
            log::error!("failed to create buffer '{}' ({} bytes)", info.name, info.size);
            BackendError::CREATION_FAILED
        })?;

        let mapped_ptr = if info.usage.contains(BufferUsage::STAGING) {
            Some(mapped_ptr)
        } else {
            None
        };

        let buffer = Buffer {
            name: info.name.to_string(),
            size: info.size,
            usage: info.usage,
            mapped_ptr,
            raw,
            memory,
        };
        Ok(self.buffers.lock().unwrap().create(buffer))
    }

    pub fn create_texture(&self, info: TextureCreateInfo) -> Result<Handle<Texture>> {
        let raw_info = RawImageCreateInfo {
            name: info.name,
            format: info.format.to_vk(),
            width: info.width,
            height: info.height,
            depth: info.depth,
            mip_levels: info.mip_count,
            usage: to_vk_image_usage(info.usage),
        };
        let (raw, memory, view) = self.device.create_image(&raw_info).ok_or_else(|| {
            log::error!("failed to create texture '{}' ({}x{}x{})", info.name, info.width, info.height, info.depth);
            BackendError::CREATION_FAILED
        })?;

        let texture = Texture {
            name: info.name.to_string(),
            format: info.format,
            width: info.width,
            height: info.height,
            depth: info.depth,
            mip_count: info.mip_count,
            usage: info.usage,
            raw,
            memory,
            view,
        };
        Ok(self.textures.lock().unwrap().create(texture))
    }

    pub fn with_buffer<R>(&self, handle: Handle<Buffer>, f: impl FnOnce(&Buffer) -> R) -> Result<R> {
        self.buffers.lock().unwrap().get(handle).map(f).ok_or(BackendError::INVALID_HANDLE)
    }

    pub fn with_texture<R>(&self, handle: Handle<Texture>, f: impl FnOnce(&Texture) -> R) -> Result<R> {
        self.textures.lock().unwrap().get(handle).map(f).ok_or(BackendError::INVALID_HANDLE)
    }

    pub fn is_buffer_valid(&self, handle: Handle<Buffer>) -> bool {
        self.buffers.lock().unwrap().is_valid(handle)
    }

    pub fn is_texture_valid(&self, handle: Handle<Texture>) -> bool {
        self.textures.lock().unwrap().is_valid(handle)
    }

    /// §4.1 two-phase destruction: the handle is moved onto the current
    /// frame's destroy list now, and the native object is released - and
    /// the handle's slot freed for reuse - only once that frame's fence
    /// value has signalled (I1).
    pub fn schedule_destroy(&self, handle: impl Into<DestroyableHandle>) {
        match handle.into() {
            DestroyableHandle::Buffer(h) => {
                let buffers = self.buffers.clone();
                let device = self.device.clone();
                self.scheduler.lock().unwrap().schedule_drop(Box::new(move || {
                    if let Some(buf) = buffers.lock().unwrap().remove(h) {
                        device.destroy_buffer(buf.raw, buf.memory);
                    }
                }));
            }
            DestroyableHandle::Texture(h) => {
                let textures = self.textures.clone();
                let device = self.device.clone();
                self.scheduler.lock().unwrap().schedule_drop(Box::new(move || {
                    if let Some(tex) = textures.lock().unwrap().remove(h) {
                        device.destroy_image(tex.raw, tex.memory, tex.view);
                    }
                }));
            }
        }
    }

    /// Pooled staging buffer (P5). Reuses the smallest free buffer that
    /// fits `size`; only creates a new one if the pool has nothing large
    /// enough.
    pub fn get_staging_buffer(&self, size: u64) -> Result<Handle<Buffer>> {
        if let Some(h) = self.staging_pool.lock().unwrap().take_fitting(size) {
            return Ok(h);
        }
        self.create_buffer(BufferCreateInfo {
            name: "staging",
            size,
            usage: BufferUsage::STAGING,
        })
    }

    /// Return a staging buffer to the pool once the GPU work using it has
    /// been submitted. The buffer only becomes available to a later
    /// `get_staging_buffer` call once the frame whose fence covers its use
    /// has retired - not immediately (scenario 5).
    pub fn return_staging_buffer(&self, handle: Handle<Buffer>) {
        let size = self.with_buffer(handle, |b| b.size).unwrap_or(0);
        let pool = self.staging_pool.clone();
        self.scheduler.lock().unwrap().schedule_drop(Box::new(move || {
            pool.lock().unwrap().give_back(size, handle);
        }));
    }

    pub fn get_cur_frame_index(&self) -> u32 {
        self.scheduler.lock().unwrap().cur_frame_index()
    }

    pub fn max_in_flight_frames(&self) -> u32 {
        self.scheduler.lock().unwrap().k()
    }

    /// Open a new command list against the current frame's allocator,
    /// seeded with whatever states the last list submitted this frame left
    /// its resources in (§5 ordering guarantee).
    pub fn record(&self) -> CommandList<D> {
        let mut scheduler = self.scheduler.lock().unwrap();
        let frame_idx = scheduler.cur_frame_index();
        let mut list = CommandList::open(self.device.clone(), frame_idx, self.buffers.clone(), self.textures.clone());
        list.seed_initial_states(scheduler.carried_states().clone());
        list
    }

    /// §4.6 `submit`: close the list, thread its final states into the
    /// next list opened this frame, file its completion callbacks against
    /// this frame's fence value, and queue it for the next `end_frame`.
    pub fn submit(&self, list: CommandList<D>) {
        let (raw, tracker, callbacks) = list.close();
        let mut scheduler = self.scheduler.lock().unwrap();
        scheduler.absorb_final_states(tracker.final_states());
        for cb in callbacks {
            scheduler.schedule_drop(Box::new(move || cb()));
        }
        scheduler.submit(raw);
    }

    pub fn begin_frame(&self) {
        self.scheduler.lock().unwrap().begin_frame();
    }

    pub fn end_frame(&self) {
        self.scheduler.lock().unwrap().end_frame();
    }

    pub fn report_device_lost(&self) {
        self.scheduler.lock().unwrap().report_device_lost();
    }
}

fn to_vk_image_usage(usage: crate::resources::TextureUsage) -> vk::ImageUsageFlags {
    use crate::resources::TextureUsage;
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::RENDER_TARGET) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(TextureUsage::DEPTH_STENCIL) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(TextureUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::UNORDERED_ACCESS) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::TextureUsage;
    use crate::tests_support::MockDeviceOps;

    fn backend() -> Backend<MockDeviceOps> {
        Backend::new(Arc::new(MockDeviceOps::new()), Config::default())
    }

    #[test]
    fn scenario_2_resource_destruction_lag() {
        let b = backend();
        let k = b.max_in_flight_frames();

        let t = b
            .create_texture(TextureCreateInfo {
                name: "t",
                usage: TextureUsage::SAMPLED,
                ..Default::default()
            })
            .unwrap();

        // File the destroy while the slot-1 frame is open, then signal it -
        // the fence value it's filed against only becomes "awaited" once
        // this frame's slot is reused.
        b.begin_frame();
        b.schedule_destroy(t);
        b.end_frame();
        assert!(b.is_texture_valid(t));

        // Cycle through the remaining K-1 slots without ever revisiting
        // slot 1 - the destroy must not have fired yet.
        for _ in 0..k - 1 {
            b.begin_frame();
            b.end_frame();
            assert!(b.is_texture_valid(t), "must not release before its frame retires");
        }

        // One more lap wraps back to the slot this destroy was filed
        // against and retires it.
        b.begin_frame();
        assert!(!b.is_texture_valid(t));
    }

    #[test]
    fn scenario_6_dead_handle_assertion() {
        use crate::resources::ResourceState;

        let b = backend();
        let k = b.max_in_flight_frames();

        let t = b
            .create_texture(TextureCreateInfo {
                name: "t",
                usage: TextureUsage::SAMPLED,
                ..Default::default()
            })
            .unwrap();

        b.schedule_destroy(t);
        for _ in 0..k {
            b.begin_frame();
            b.end_frame();
        }
        assert!(!b.is_texture_valid(t));

        let mut list = b.record();
        assert_eq!(list.set_state(t, ResourceState::ShaderResource), Err(BackendError::INVALID_HANDLE));
    }

    #[test]
    fn scenario_5_staging_round_trip() {
        let b = backend();
        let k = b.max_in_flight_frames();
        let buf = b.get_staging_buffer(64).unwrap();

        b.begin_frame();
        b.return_staging_buffer(buf);
        b.end_frame();

        // Not yet retired: the pool must not hand the same buffer back
        // before its frame's fence has signalled.
        let fresh = b.get_staging_buffer(64).unwrap();
        assert_ne!(buf, fresh);
        b.schedule_destroy(fresh); // keep the table tidy, unrelated to the property under test

        for _ in 0..k - 1 {
            b.begin_frame();
            b.end_frame();
        }

        // Wraps back to the slot the return was filed against and retires it.
        b.begin_frame();
        let reused = b.get_staging_buffer(64).unwrap();
        assert_eq!(reused, buf);
    }

    #[test]
    fn create_buffer_failure_does_not_produce_a_handle() {
        struct AlwaysFailsDeviceOps(MockDeviceOps);
        impl DeviceOps for AlwaysFailsDeviceOps {
            fn create_buffer(&self, _info: &RawBufferCreateInfo) -> Option<(vk::Buffer, vk::DeviceMemory, *mut u8)> {
                None
            }
            fn destroy_buffer(&self, b: vk::Buffer, m: vk::DeviceMemory) {
                self.0.destroy_buffer(b, m)
            }
            fn create_image(&self, info: &RawImageCreateInfo) -> Option<(vk::Image, vk::DeviceMemory, vk::ImageView)> {
                self.0.create_image(info)
            }
            fn destroy_image(&self, i: vk::Image, m: vk::DeviceMemory, v: vk::ImageView) {
                self.0.destroy_image(i, m, v)
            }
            fn allocate_command_buffer(&self) -> vk::CommandBuffer {
                self.0.allocate_command_buffer()
            }
            fn begin_command_buffer(&self, c: vk::CommandBuffer) {
                self.0.begin_command_buffer(c)
            }
            fn end_command_buffer(&self, c: vk::CommandBuffer) {
                self.0.end_command_buffer(c)
            }
            fn reset_command_buffer(&self, c: vk::CommandBuffer) {
                self.0.reset_command_buffer(c)
            }
            fn cmd_pipeline_barrier(&self, c: vk::CommandBuffer, b: &[crate::device_ops::RawBarrier]) {
                self.0.cmd_pipeline_barrier(c, b)
            }
            fn cmd_bind_pipeline(&self, c: vk::CommandBuffer, p: vk::Pipeline, bp: vk::PipelineBindPoint) {
                self.0.cmd_bind_pipeline(c, p, bp)
            }
            fn cmd_bind_descriptor_heap(&self, c: vk::CommandBuffer, h: DescriptorHeapKind) {
                self.0.cmd_bind_descriptor_heap(c, h)
            }
            fn cmd_draw(&self, c: vk::CommandBuffer, v: u32, i: u32) {
                self.0.cmd_draw(c, v, i)
            }
            fn cmd_draw_indexed(&self, c: vk::CommandBuffer, ic: u32, i: u32) {
                self.0.cmd_draw_indexed(c, ic, i)
            }
            fn cmd_dispatch(&self, c: vk::CommandBuffer, x: u32, y: u32, z: u32) {
                self.0.cmd_dispatch(c, x, y, z)
            }
            fn cmd_dispatch_indirect(&self, c: vk::CommandBuffer, b: vk::Buffer, o: u64) {
                self.0.cmd_dispatch_indirect(c, b, o)
            }
            fn cmd_draw_indexed_indirect(&self, c: vk::CommandBuffer, b: vk::Buffer, o: u64, n: u32) {
                self.0.cmd_draw_indexed_indirect(c, b, o, n)
            }
            fn cmd_copy_buffer(&self, c: vk::CommandBuffer, s: vk::Buffer, d: vk::Buffer, sz: u64, so: u64, d_o: u64) {
                self.0.cmd_copy_buffer(c, s, d, sz, so, d_o)
            }
            fn cmd_copy_texture(&self, c: vk::CommandBuffer, s: vk::Image, d: vk::Image, w: u32, h: u32) {
                self.0.cmd_copy_texture(c, s, d, w, h)
            }
            fn cmd_build_acceleration_structure(&self, c: vk::CommandBuffer, b: vk::Buffer) {
                self.0.cmd_build_acceleration_structure(c, b)
            }
            fn submit(&self, cmds: &[vk::CommandBuffer], v: u64) {
                self.0.submit(cmds, v)
            }
            fn wait_timeline_value(&self, v: u64) {
                self.0.wait_timeline_value(v)
            }
            fn present(&self) {
                self.0.present()
            }
        }

        let backend = Backend::new(Arc::new(AlwaysFailsDeviceOps(MockDeviceOps::new())), Config::default());
        let result = backend.create_buffer(BufferCreateInfo {
            name: "doomed",
            size: 16,
            usage: BufferUsage::CONSTANT,
        });
        assert_eq!(result.err(), Some(BackendError::CREATION_FAILED));
    }
}
