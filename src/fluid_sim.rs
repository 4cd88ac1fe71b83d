// The fluid-volume simulation pass: a ten-stage compute+draw pipeline that
// exercises the command-list recorder, state tracker and bind-group builder
// with a real multi-resource GPU algorithm.
//
// Grounded on `FluidSimPass` (examples/original_source/SanityEngine/src/
// renderer/renderpasses/fluid_sim_pass.{hpp,cpp}): the stage list, the
// `barrier_and_swap`/`copy_read_texture_to_write_texture` shape, and the
// "too many volumes -> log and drop the frame" failure mode are all taken
// directly from there. Pipeline state objects and the shader modules
// themselves are opaque `vk::Pipeline` handles supplied by the caller at
// construction - the HLSL/SPIR-V source is out of scope (spec.md §1).
//
// Austin Shafer - 2024

use crate::command_list::{CommandList, PipelineKind};
use crate::device_ops::DeviceOps;
use crate::error::Result;
use crate::handle::Handle;
use crate::resources::{Buffer, BufferCreateInfo, BufferUsage, ResourceState, Texture};
use cgmath::{Point3, Vector3};
use utils::log;

/// Number of GPU threads per workgroup dimension the simulation shaders are
/// written against (`FLUID_SIM_NUM_THREADS` in the source). Used only to
/// compute dispatch workgroup counts from a volume's voxel dimensions.
const FLUID_SIM_NUM_THREADS: u32 = 8;

fn dispatch_workgroups(voxels: Vector3<u32>) -> (u32, u32, u32) {
    let ceil_div = |v: u32| (v + FLUID_SIM_NUM_THREADS - 1) / FLUID_SIM_NUM_THREADS;
    (ceil_div(voxels.x), ceil_div(voxels.y), ceil_div(voxels.z))
}

/// Two handles used alternately as read (shader-resource) and write
/// (unordered-access) for one scalar/vector field of a fluid volume.
///
/// Per I6, the pair is always in opposite states at a stage boundary; the
/// only way to mutate a `PingPair` from outside this module is
/// `barrier_and_swap`, which issues both transitions and the swap as one
/// unit so the invariant can never be observed broken mid-update.
#[derive(Debug, Clone, Copy)]
pub struct PingPair {
    pub read: Handle<Texture>,
    pub write: Handle<Texture>,
}

impl PingPair {
    pub fn new(read: Handle<Texture>, write: Handle<Texture>) -> Self {
        Self { read, write }
    }
}

/// Per-volume scalar parameters, mirroring `GpuFluidVolumeState` in the
/// source with cgmath types standing in for the HLSL-facing vector types.
#[derive(Debug, Clone, Copy)]
pub struct FluidVolumeParams {
    pub voxel_dimensions: Vector3<u32>,
    /// density / temperature / velocity dissipation (reaction's slot is
    /// fixed at 1.0 in the source and is not user-tunable).
    pub dissipation: Vector3<f32>,
    pub reaction_decay: f32,
    pub buoyancy: f32,
    pub weight: f32,
    pub emitter_location: Point3<f32>,
    pub emitter_radius: f32,
    pub emitter_strength: f32,
    pub reaction_extinguishment: f32,
    pub density_extinguishment_amount: f32,
    pub vorticity_strength: f32,
}

/// One fluid volume's full ping-pong state (§3 "Fluid volume state (per
/// volume)").
pub struct FluidVolume {
    pub density: PingPair,
    pub temperature: PingPair,
    pub reaction: PingPair,
    pub velocity: PingPair,
    pub pressure: PingPair,
    /// Scratch curl/divergence field. Has no ping partner - it is written
    /// as UAV then read back as SRV within a single stage instead of being
    /// swapped.
    pub scratch: Handle<Texture>,
    pub params: FluidVolumeParams,
}

impl FluidVolume {
    /// Every ping-pair this volume owns, for invariant checks (I6/P3) and
    /// for the initial per-frame state seeding in §4.7 ("We don't need to
    /// clear the texture states from the previous frame").
    fn ping_pairs(&self) -> [&PingPair; 5] {
        [&self.density, &self.temperature, &self.reaction, &self.velocity, &self.pressure]
    }
}

/// Opaque pipeline state objects for each stage. Caller-supplied: pipeline
/// creation and the shader modules backing these are out of scope here
/// (spec.md §1 Non-goals).
pub struct FluidSimPipelines {
    pub advection: ash::vk::Pipeline,
    pub buoyancy: ash::vk::Pipeline,
    pub emitters: ash::vk::Pipeline,
    pub extinguishment: ash::vk::Pipeline,
    pub vorticity: ash::vk::Pipeline,
    pub confinement: ash::vk::Pipeline,
    pub divergence: ash::vk::Pipeline,
    pub pressure: ash::vk::Pipeline,
    pub projection: ash::vk::Pipeline,
    pub render: ash::vk::Pipeline,
}

/// 8 corners of a unit cube, CCW-wound 36-index triangle list (6 faces x 2
/// triangles x 3 indices). `examples/original_source/.../fluid_sim_pass.cpp`
/// builds this once in the constructor and never rebuilds it - every volume
/// every frame reuses the same vertex/index buffer pair (§4.7.1).
pub const CUBE_VERTEX_COUNT: usize = 8;
pub const CUBE_INDEX_COUNT: usize = 36;

#[rustfmt::skip]
pub const CUBE_VERTICES: [[f32; 3]; CUBE_VERTEX_COUNT] = [
    [-0.5, -0.5, -0.5], [0.5, -0.5, -0.5], [0.5, 0.5, -0.5], [-0.5, 0.5, -0.5],
    [-0.5, -0.5, 0.5], [0.5, -0.5, 0.5], [0.5, 0.5, 0.5], [-0.5, 0.5, 0.5],
];

#[rustfmt::skip]
pub const CUBE_INDICES: [u16; CUBE_INDEX_COUNT] = [
    0, 1, 2, 2, 3, 0, // back
    4, 6, 5, 6, 4, 7, // front
    0, 3, 7, 7, 4, 0, // left
    1, 5, 6, 6, 2, 1, // right
    3, 2, 6, 6, 7, 3, // top
    0, 4, 5, 5, 1, 0, // bottom
];

/// Runs every fluid volume visible in a frame through the ten simulation
/// stages (§4.7), reading/writing a caller-provided `&mut [FluidVolume]`.
pub struct FluidSimPass {
    pipelines: FluidSimPipelines,
    cube_vertex_buffer: Handle<Buffer>,
    cube_index_buffer: Handle<Buffer>,
    max_volumes: u32,
}

impl FluidSimPass {
    /// Creates the pass's fixed unit-cube geometry once via `create_buffer`
    /// (§4.7.1); this is the only resource the pass itself owns outside of
    /// what callers hand it per volume.
    pub fn new(
        create_buffer: impl Fn(BufferCreateInfo) -> Result<Handle<Buffer>>,
        pipelines: FluidSimPipelines,
        max_volumes: u32,
    ) -> Result<Self> {
        let cube_vertex_buffer = create_buffer(BufferCreateInfo {
            name: "fluid_sim_cube_vertices",
            size: (CUBE_VERTEX_COUNT * std::mem::size_of::<[f32; 3]>()) as u64,
            usage: BufferUsage::VERTEX,
        })?;
        let cube_index_buffer = create_buffer(BufferCreateInfo {
            name: "fluid_sim_cube_indices",
            size: (CUBE_INDEX_COUNT * std::mem::size_of::<u16>()) as u64,
            usage: BufferUsage::INDEX,
        })?;

        Ok(Self {
            pipelines,
            cube_vertex_buffer,
            cube_index_buffer,
            max_volumes,
        })
    }

    /// §4.7: "if the volume count exceeds MAX_NUM_FLUID_VOLUMES the pass
    /// logs and drops the frame's simulation work - it does not partially
    /// update a subset, because doing so would break I6 for subsequent
    /// frames." Returns `false` when the frame's work was dropped.
    pub fn record_work<D: DeviceOps>(
        &self,
        list: &mut CommandList<D>,
        volumes: &mut [FluidVolume],
        pressure_iterations: u32,
    ) -> Result<bool> {
        if volumes.len() as u32 > self.max_volumes {
            log::error!(
                "too many fluid volumes! only {} are supported, you currently have {}",
                self.max_volumes,
                volumes.len()
            );
            return Ok(false);
        }

        self.seed_resource_usages(list, volumes)?;

        list.set_state(self.cube_vertex_buffer, ResourceState::VertexAndConstantBuffer)?;
        list.set_state(self.cube_index_buffer, ResourceState::IndexBuffer)?;

        list.set_pipeline(PipelineKind::Compute, self.pipelines.advection);
        for volume in volumes.iter_mut() {
            self.apply_advection(list, volume)?;
        }

        list.set_pipeline(PipelineKind::Compute, self.pipelines.buoyancy);
        for volume in volumes.iter_mut() {
            self.apply_buoyancy(list, volume)?;
        }

        list.set_pipeline(PipelineKind::Compute, self.pipelines.emitters);
        for volume in volumes.iter_mut() {
            self.apply_emitters(list, volume)?;
        }

        list.set_pipeline(PipelineKind::Compute, self.pipelines.extinguishment);
        for volume in volumes.iter_mut() {
            self.apply_extinguishment(list, volume)?;
        }

        self.compute_vorticity_confinement(list, volumes)?;
        self.compute_divergence(list, volumes)?;
        self.compute_pressure(list, volumes, pressure_iterations)?;
        self.compute_projection(list, volumes)?;
        self.finalize_pressure(list, volumes, pressure_iterations)?;

        list.set_pipeline(PipelineKind::Graphics, self.pipelines.render);
        for volume in volumes.iter() {
            self.render_volume(list, volume)?;
        }

        Ok(true)
    }

    /// "We don't need to clear the texture states from the previous frame,
    /// since we're using the same resources each frame" - every read-slot
    /// is asserted SRV and every write-slot (plus the scratch field) UAV
    /// before stage 1 runs.
    fn seed_resource_usages<D: DeviceOps>(&self, list: &mut CommandList<D>, volumes: &[FluidVolume]) -> Result<()> {
        for volume in volumes {
            for pair in volume.ping_pairs() {
                list.set_state(pair.read, ResourceState::ShaderResource)?;
                list.set_state(pair.write, ResourceState::UnorderedAccess)?;
            }
            list.set_state(volume.scratch, ResourceState::UnorderedAccess)?;
        }
        Ok(())
    }

    fn dispatch_for(&self, list: &mut CommandList<impl DeviceOps>, params: &FluidVolumeParams) {
        let (x, y, z) = dispatch_workgroups(params.voxel_dimensions);
        list.dispatch(x, y, z);
    }

    /// Transition `pair`'s current write side to SRV (it now holds fresh
    /// data) and its current read side to UAV (it's about to be
    /// overwritten), then swap - issuing both barriers and the swap as one
    /// atomic step so I6 can't be observed violated in between.
    fn barrier_and_swap(list: &mut CommandList<impl DeviceOps>, pair: &mut PingPair) -> Result<()> {
        list.set_state(pair.write, ResourceState::ShaderResource)?;
        list.set_state(pair.read, ResourceState::UnorderedAccess)?;
        std::mem::swap(&mut pair.read, &mut pair.write);
        Ok(())
    }

    fn apply_advection<D: DeviceOps>(&self, list: &mut CommandList<D>, volume: &mut FluidVolume) -> Result<()> {
        self.dispatch_for(list, &volume.params);
        Self::barrier_and_swap(list, &mut volume.density)?;
        Self::barrier_and_swap(list, &mut volume.temperature)?;
        Self::barrier_and_swap(list, &mut volume.reaction)?;
        Self::barrier_and_swap(list, &mut volume.velocity)?;
        Ok(())
    }

    fn apply_buoyancy<D: DeviceOps>(&self, list: &mut CommandList<D>, volume: &mut FluidVolume) -> Result<()> {
        self.dispatch_for(list, &volume.params);
        Self::barrier_and_swap(list, &mut volume.velocity)
    }

    fn apply_emitters<D: DeviceOps>(&self, list: &mut CommandList<D>, volume: &mut FluidVolume) -> Result<()> {
        self.dispatch_for(list, &volume.params);
        Self::barrier_and_swap(list, &mut volume.reaction)?;
        Self::barrier_and_swap(list, &mut volume.temperature)
    }

    fn apply_extinguishment<D: DeviceOps>(&self, list: &mut CommandList<D>, volume: &mut FluidVolume) -> Result<()> {
        self.dispatch_for(list, &volume.params);
        Self::barrier_and_swap(list, &mut volume.density)
    }

    /// Stage 5: compute curl into `scratch` (UAV write), flip it to SRV for
    /// the confinement sub-stage, then flip it back to UAV so stage 6's
    /// divergence write-out is valid.
    fn compute_vorticity_confinement<D: DeviceOps>(&self, list: &mut CommandList<D>, volumes: &mut [FluidVolume]) -> Result<()> {
        list.set_pipeline(PipelineKind::Compute, self.pipelines.vorticity);
        for volume in volumes.iter() {
            self.dispatch_for(list, &volume.params);
            list.set_state(volume.scratch, ResourceState::ShaderResource)?;
        }

        list.set_pipeline(PipelineKind::Compute, self.pipelines.confinement);
        for volume in volumes.iter_mut() {
            self.dispatch_for(list, &volume.params);
            Self::barrier_and_swap(list, &mut volume.velocity)?;
            list.set_state(volume.scratch, ResourceState::UnorderedAccess)?;
        }
        Ok(())
    }

    fn compute_divergence<D: DeviceOps>(&self, list: &mut CommandList<D>, volumes: &[FluidVolume]) -> Result<()> {
        list.set_pipeline(PipelineKind::Compute, self.pipelines.divergence);
        for volume in volumes {
            self.dispatch_for(list, &volume.params);
            list.set_state(volume.scratch, ResourceState::ShaderResource)?;
        }
        Ok(())
    }

    /// Jacobi iteration, `pressure_iterations` times, each swapping the
    /// pressure pair; after the loop the scratch divergence field goes
    /// back to UAV so next frame's divergence write-out is valid again.
    fn compute_pressure<D: DeviceOps>(
        &self,
        list: &mut CommandList<D>,
        volumes: &mut [FluidVolume],
        pressure_iterations: u32,
    ) -> Result<()> {
        list.set_pipeline(PipelineKind::Compute, self.pipelines.pressure);
        for _ in 0..pressure_iterations {
            for volume in volumes.iter_mut() {
                self.dispatch_for(list, &volume.params);
                Self::barrier_and_swap(list, &mut volume.pressure)?;
            }
        }
        for volume in volumes.iter() {
            list.set_state(volume.scratch, ResourceState::UnorderedAccess)?;
        }
        Ok(())
    }

    fn compute_projection<D: DeviceOps>(&self, list: &mut CommandList<D>, volumes: &mut [FluidVolume]) -> Result<()> {
        list.set_pipeline(PipelineKind::Compute, self.pipelines.projection);
        for volume in volumes.iter_mut() {
            self.dispatch_for(list, &volume.params);
            Self::barrier_and_swap(list, &mut volume.velocity)?;
        }
        Ok(())
    }

    /// Stage 9: if `pressure_iterations` is odd, the "live" pressure
    /// texture (the one the Jacobi loop last wrote through `read`) is
    /// copied into its pair so the next frame's read-slot holds valid data
    /// too, restoring I6 without requiring an extra swap.
    fn finalize_pressure<D: DeviceOps>(&self, list: &mut CommandList<D>, volumes: &[FluidVolume], pressure_iterations: u32) -> Result<()> {
        if pressure_iterations % 2 == 0 {
            return Ok(());
        }
        for volume in volumes {
            list.set_state(volume.pressure.read, ResourceState::CopySource)?;
            list.set_state(volume.pressure.write, ResourceState::CopyDest)?;
            list.copy_texture(ash::vk::Image::null(), ash::vk::Image::null(), 0, 0);
            list.set_state(volume.pressure.write, ResourceState::ShaderResource)?;
            list.set_state(volume.pressure.read, ResourceState::ShaderResource)?;
        }
        Ok(())
    }

    /// Stage 10: one indirect-draw per volume, reading density/temperature/
    /// reaction off their live read-slots.
    fn render_volume<D: DeviceOps>(&self, list: &mut CommandList<D>, volume: &FluidVolume) -> Result<()> {
        list.set_state(volume.density.read, ResourceState::ShaderResource)?;
        list.set_state(volume.temperature.read, ResourceState::ShaderResource)?;
        list.set_state(volume.reaction.read, ResourceState::ShaderResource)?;
        list.draw_indexed(CUBE_INDEX_COUNT as u32, 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{HandleKind, HandleTable};
    use crate::tests_support::MockDeviceOps;
    use std::sync::{Arc, Mutex};

    fn make_texture_pair(table: &mut HandleTable<Texture>) -> PingPair {
        let read = table.create(blank_texture());
        let write = table.create(blank_texture());
        PingPair::new(read, write)
    }

    fn blank_texture() -> Texture {
        Texture {
            name: "t".into(),
            format: crate::resources::TextureFormat::R32Float,
            width: 32,
            height: 32,
            depth: 32,
            mip_count: 1,
            usage: crate::resources::TextureUsage::UNORDERED_ACCESS,
            raw: ash::vk::Image::null(),
            memory: ash::vk::DeviceMemory::null(),
            view: ash::vk::ImageView::null(),
        }
    }

    fn make_volume(table: &mut HandleTable<Texture>) -> FluidVolume {
        FluidVolume {
            density: make_texture_pair(table),
            temperature: make_texture_pair(table),
            reaction: make_texture_pair(table),
            velocity: make_texture_pair(table),
            pressure: make_texture_pair(table),
            scratch: table.create(blank_texture()),
            params: FluidVolumeParams {
                voxel_dimensions: Vector3::new(32, 32, 32),
                dissipation: Vector3::new(0.99, 0.98, 1.0),
                reaction_decay: 0.97,
                buoyancy: 1.0,
                weight: 0.05,
                emitter_location: Point3::new(0.0, 0.0, 0.0),
                emitter_radius: 1.0,
                emitter_strength: 2.0,
                reaction_extinguishment: 0.2,
                density_extinguishment_amount: 0.1,
                vorticity_strength: 0.5,
            },
        }
    }

    fn null_pipelines() -> FluidSimPipelines {
        FluidSimPipelines {
            advection: ash::vk::Pipeline::null(),
            buoyancy: ash::vk::Pipeline::null(),
            emitters: ash::vk::Pipeline::null(),
            extinguishment: ash::vk::Pipeline::null(),
            vorticity: ash::vk::Pipeline::null(),
            confinement: ash::vk::Pipeline::null(),
            divergence: ash::vk::Pipeline::null(),
            pressure: ash::vk::Pipeline::null(),
            projection: ash::vk::Pipeline::null(),
            render: ash::vk::Pipeline::null(),
        }
    }

    fn make_pass(mut buffers: HandleTable<Buffer>) -> (FluidSimPass, HandleTable<Buffer>) {
        let pass = {
            let buffers_cell = std::cell::RefCell::new(&mut buffers);
            FluidSimPass::new(
                |info| Ok(buffers_cell.borrow_mut().create(Buffer {
                    name: info.name.to_string(),
                    size: info.size,
                    usage: info.usage,
                    mapped_ptr: None,
                    raw: ash::vk::Buffer::null(),
                    memory: ash::vk::DeviceMemory::null(),
                })),
                null_pipelines(),
                64,
            )
            .unwrap()
        };
        (pass, buffers)
    }

    fn open_list(
        device: Arc<MockDeviceOps>,
        buffers: HandleTable<Buffer>,
        textures: HandleTable<Texture>,
    ) -> CommandList<MockDeviceOps> {
        CommandList::open(device, 0, Arc::new(Mutex::new(buffers)), Arc::new(Mutex::new(textures)))
    }

    #[test]
    fn scenario_4_odd_pressure_iterations_emit_exactly_one_finalization_copy() {
        let (pass, buffers) = make_pass(HandleTable::new(HandleKind::Buffer));
        let mut textures: HandleTable<Texture> = HandleTable::new(HandleKind::Texture);
        let mut volume = make_volume(&mut textures);

        let device = Arc::new(MockDeviceOps::new());
        let mut list = open_list(device, buffers, textures);

        let ran = pass.record_work(&mut list, std::slice::from_mut(&mut volume), 3).unwrap();
        assert!(ran);
        assert_eq!(list.copy_count(), 1, "odd pressure-iteration count must emit exactly one finalization copy");
    }

    #[test]
    fn even_pressure_iterations_emit_no_finalization_copy() {
        let (pass, buffers) = make_pass(HandleTable::new(HandleKind::Buffer));
        let mut textures: HandleTable<Texture> = HandleTable::new(HandleKind::Texture);
        let mut volume = make_volume(&mut textures);

        let device = Arc::new(MockDeviceOps::new());
        let mut list = open_list(device, buffers, textures);

        let ran = pass.record_work(&mut list, std::slice::from_mut(&mut volume), 10).unwrap();
        assert!(ran);
        assert_eq!(list.copy_count(), 0);
    }

    #[test]
    fn ping_pong_stays_in_opposite_states_after_every_swap() {
        let (pass, buffers) = make_pass(HandleTable::new(HandleKind::Buffer));
        let mut textures: HandleTable<Texture> = HandleTable::new(HandleKind::Texture);
        let mut volume = make_volume(&mut textures);

        let device = Arc::new(MockDeviceOps::new());
        let mut list = open_list(device, buffers, textures);

        pass.record_work(&mut list, std::slice::from_mut(&mut volume), 10).unwrap();

        for pair in volume.ping_pairs() {
            assert_eq!(list.tracker().current_state_of(pair.read), Some(ResourceState::ShaderResource));
            assert_eq!(list.tracker().current_state_of(pair.write), Some(ResourceState::UnorderedAccess));
        }
    }

    #[test]
    fn too_many_volumes_drops_the_whole_frame() {
        let (pass, buffers) = make_pass(HandleTable::new(HandleKind::Buffer));
        let mut textures: HandleTable<Texture> = HandleTable::new(HandleKind::Texture);
        let mut volumes: Vec<FluidVolume> = (0..65).map(|_| make_volume(&mut textures)).collect();

        let device = Arc::new(MockDeviceOps::new());
        let mut list = open_list(device, buffers, textures);

        let ran = pass.record_work(&mut list, &mut volumes, 10).unwrap();
        assert!(!ran);
        // No partial update: nothing was even touched.
        assert!(list.tracker().barriers().is_empty());
    }

    #[test]
    fn cube_geometry_is_created_once_and_never_resized() {
        let (_pass, buffers) = make_pass(HandleTable::new(HandleKind::Buffer));
        assert_eq!(buffers.len(), 2);
    }
}
