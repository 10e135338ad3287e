//! Constant buffer layouts shared with the shaders. Field order and padding
//! follow HLSL packing rules.

use bytemuck::{Pod, Zeroable};
use geometry::Mat4;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Material {
    pub color: [f32; 4],
    pub enable_lighting: i32,
    pub _padding: [f32; 3],
    pub uv_transform: [[f32; 4]; 4],
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0, 1.0],
            enable_lighting: 1,
            _padding: [0.0; 3],
            uv_transform: Mat4::identity().to_arrays(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TransformationMatrix {
    pub wvp: [[f32; 4]; 4],
    pub world: [[f32; 4]; 4],
}

impl TransformationMatrix {
    #[must_use]
    pub fn new(world: &Mat4, view_projection: &Mat4) -> Self {
        Self {
            wvp: world.then(view_projection).to_arrays(),
            world: world.to_arrays(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DirectionalLight {
    pub color: [f32; 4],
    /// Normalized direction the light travels in.
    pub direction: [f32; 3],
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        let inv_len = 1.0 / 2.0_f32.sqrt();
        Self {
            color: [1.0, 1.0, 1.0, 1.0],
            direction: [0.0, -inv_len, inv_len],
            intensity: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_match_hlsl_packing() {
        assert_eq!(std::mem::size_of::<Material>(), 96);
        assert_eq!(std::mem::size_of::<TransformationMatrix>(), 128);
        assert_eq!(std::mem::size_of::<DirectionalLight>(), 32);
    }
}
