//! Grain records and initial placement.

use bytemuck::{Pod, Zeroable};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Bytes per grain: position.xyz + velocity.xyz.
pub const GRAIN_STRIDE: u64 = 24;

/// One sand grain, laid out exactly as the GPU storage buffer expects.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Grain {
    /// x, y in [-1, 1]; z is the grain's layer/height in [0, 1].
    pub position: [f32; 3],
    pub velocity: [f32; 3],
}

impl Grain {
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            velocity: [0.0; 3],
        }
    }

    pub fn position_vec3(&self) -> glam::Vec3 {
        glam::Vec3::from_array(self.position)
    }

    pub fn velocity_vec3(&self) -> glam::Vec3 {
        glam::Vec3::from_array(self.velocity)
    }

    /// Vertex buffer layout for drawing grains as instances.
    pub fn instance_desc() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBS: [wgpu::VertexAttribute; 2] =
            wgpu::vertex_attr_array![1 => Float32x3, 2 => Float32x3];
        wgpu::VertexBufferLayout {
            array_stride: GRAIN_STRIDE,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &ATTRIBS,
        }
    }
}

/// Scatter `count` grains uniformly over the unit square, stacked in layers.
///
/// With `seed = None` placement comes from OS entropy and differs every run.
pub fn seed_grains(count: u32, seed: Option<u64>) -> Vec<Grain> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let n = count.max(1) as f32;
    (0..count)
        .map(|index| {
            Grain::at([
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                index as f32 / n,
            ])
        })
        .collect()
}

/// Size in bytes of a buffer holding `count` grains.
pub fn buffer_size(count: u32) -> u64 {
    count as u64 * GRAIN_STRIDE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grain_layout() {
        assert_eq!(std::mem::size_of::<Grain>() as u64, GRAIN_STRIDE);
        assert_eq!(std::mem::align_of::<Grain>(), 4);
    }

    #[test]
    fn test_seed_bounds_and_layers() {
        let grains = seed_grains(1000, Some(1));
        assert_eq!(grains.len(), 1000);
        for (i, g) in grains.iter().enumerate() {
            assert!(g.position[0].abs() <= 1.0 && g.position[1].abs() <= 1.0);
            assert_eq!(g.position[2], i as f32 / 1000.0);
            assert_eq!(g.velocity, [0.0; 3]);
        }
    }

    #[test]
    fn test_seeded_placement_is_reproducible() {
        assert_eq!(seed_grains(64, Some(42)), seed_grains(64, Some(42)));
        assert_ne!(seed_grains(64, Some(42)), seed_grains(64, Some(43)));
    }

    #[test]
    fn test_buffer_size() {
        assert_eq!(buffer_size(100_000), 2_400_000);
    }
}
