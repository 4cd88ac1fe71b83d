// Plain-data resource descriptions and records.
//
// These mirror the source's `Buffer`/`Image`/`*CreateInfo` structs
// (render/resources.hpp): no behaviour, just the shape a resource table
// stores per handle.
//
// Austin Shafer - 2024

use ash::vk;
use bitflags::bitflags;

bitflags! {
    /// Usage class for a buffer. A buffer may serve more than one purpose
    /// at once (e.g. vertex + indirect-args), so this is a bitflag set
    /// rather than the source's single enum value.
    pub struct BufferUsage: u32 {
        const STAGING                 = 0b0000_0001;
        const VERTEX                  = 0b0000_0010;
        const INDEX                   = 0b0000_0100;
        const CONSTANT                = 0b0000_1000;
        const INDIRECT_ARGS           = 0b0001_0000;
        const UNORDERED_ACCESS        = 0b0010_0000;
        const ACCELERATION_STRUCTURE  = 0b0100_0000;
    }
}

bitflags! {
    /// Usage class for a texture.
    pub struct TextureUsage: u32 {
        const RENDER_TARGET     = 0b0001;
        const DEPTH_STENCIL     = 0b0010;
        const SAMPLED           = 0b0100;
        const UNORDERED_ACCESS  = 0b1000;
    }
}

/// The state a resource (buffer or texture) can be in, as tracked by the
/// state tracker. This collapses the much larger `D3D12_RESOURCE_STATES`
/// bitmask from the source into the handful of states this crate's passes
/// actually request - the tracker only needs to reason about the states
/// listed here, not every legal D3D12/Vulkan combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Default/idle state. Buffers and "simultaneous access" textures may
    /// be implicitly promoted out of this state into a read state with no
    /// barrier (see `StateTracker::set_state`).
    Common,
    VertexAndConstantBuffer,
    IndexBuffer,
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthWrite,
    DepthRead,
    CopySource,
    CopyDest,
    IndirectArgument,
    Present,
}

impl ResourceState {
    /// Whether this state is one of the read states a resource may be
    /// implicitly promoted into from `Common` without a recorded barrier.
    /// Per spec this applies to buffers, and would also apply to
    /// "simultaneous access" textures - this crate does not model
    /// simultaneous-access textures separately, so `StateTracker::set_state`
    /// additionally gates the promotion on the resource being a buffer; a
    /// plain texture always gets a real barrier even into a read state.
    pub fn is_implicit_read_promotion(&self) -> bool {
        matches!(self, ResourceState::ShaderResource | ResourceState::IndirectArgument)
    }
}

/// A byte range on the device.
pub struct Buffer {
    pub name: String,
    pub size: u64,
    pub usage: BufferUsage,
    /// Present for staging buffers, which stay persistently mapped for
    /// their entire lifetime.
    pub mapped_ptr: Option<*mut u8>,
    pub(crate) raw: vk::Buffer,
    pub(crate) memory: vk::DeviceMemory,
}

// `Buffer` crosses thread boundaries only as a handle; the raw vk objects
// inside the table are only ever touched while holding the resource
// table's mutex (see backend.rs), matching the externally-synchronized
// discipline the teacher's `Device` uses around its native Vulkan handles.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

pub struct BufferCreateInfo<'a> {
    pub name: &'a str,
    pub size: u64,
    pub usage: BufferUsage,
}

/// 2D/3D image format. A small, crate-owned subset of the formats the
/// resource tables and fluid pass actually need - this is not an attempt to
/// re-expose every `vk::Format` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    R32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn to_vk(self) -> vk::Format {
        match self {
            TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            TextureFormat::R32Float => vk::Format::R32_SFLOAT,
            TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        }
    }
}

pub struct Texture {
    pub name: String,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_count: u32,
    pub usage: TextureUsage,
    pub(crate) raw: vk::Image,
    pub(crate) memory: vk::DeviceMemory,
    pub(crate) view: vk::ImageView,
}

unsafe impl Send for Texture {}
unsafe impl Sync for Texture {}

pub struct TextureCreateInfo<'a> {
    pub name: &'a str,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_count: u32,
    pub usage: TextureUsage,
}

impl<'a> Default for TextureCreateInfo<'a> {
    fn default() -> Self {
        Self {
            name: "unnamed texture",
            format: TextureFormat::Rgba8Unorm,
            width: 1,
            height: 1,
            depth: 1,
            mip_count: 1,
            usage: TextureUsage::SAMPLED,
        }
    }
}
