// The one vertex layout the core ships a concrete description for -
// everything else is opaque shader input the caller's pipeline-creation
// code describes on its own.
//
// Grounded on `VertData`'s vertex_bindings/vertex_attributes construction in
// examples/amshafer-Category5/vulkan/src/main.rs: one binding, `offset_of!`
// per attribute via `memoffset`.
//
// Austin Shafer - 2024

use ash::vk;
use memoffset::offset_of;

/// Minimal position-only vertex, used by the triangle scenario (spec.md §8
/// scenario 1: "one vertex buffer (size 36 bytes, three StandardVertex)" -
/// 36 / 3 = 12 bytes per vertex, i.e. a single `[f32; 3]`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardVertex {
    pub position: [f32; 3],
}

impl StandardVertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<StandardVertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 1] {
        [vk::VertexInputAttributeDescription {
            binding: 0,
            location: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(StandardVertex, position) as u32,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_matches_struct_size() {
        assert_eq!(StandardVertex::binding_description().stride as usize, std::mem::size_of::<StandardVertex>());
    }

    /// Literal scenario 1 from spec.md §8: "one vertex buffer (size 36
    /// bytes, three StandardVertex)".
    #[test]
    fn triangle_scenario_vertex_buffer_is_36_bytes() {
        let vertices = [
            StandardVertex { position: [0.0, 0.0, 0.0] },
            StandardVertex { position: [1.0, 0.0, 0.0] },
            StandardVertex { position: [0.0, 1.0, 0.0] },
        ];
        assert_eq!(std::mem::size_of_val(&vertices), 36);
        assert_eq!(StandardVertex::binding_description().stride, 12);
    }
}
