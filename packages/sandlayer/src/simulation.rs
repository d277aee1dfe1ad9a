//! Per-grain transition function.
//!
//! `step_grain` is the CPU reference of `sand_step.wgsl`; both must stay in
//! lockstep. The CPU path also drives the simulation on adapters without
//! compute shaders.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::grain::Grain;
use crate::settings::{PhysicsMode, SandSettings};

/// What the surface looks like under a grain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceSample {
    pub normal: Vec3,
    pub height: f32,
}

/// Anything the simulation can sample a normal and height from.
pub trait Surface {
    /// `xy` is a world position in [-1, 1]².
    fn sample(&self, xy: Vec2) -> SurfaceSample;
}

/// A level surface at a fixed height.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatSurface {
    pub height: f32,
}

impl Surface for FlatSurface {
    fn sample(&self, _xy: Vec2) -> SurfaceSample {
        SurfaceSample {
            normal: Vec3::Z,
            height: self.height,
        }
    }
}

/// Inputs to one simulation step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepParams {
    pub wind: Vec3,
    /// Pointer position, normalised and centred with y up.
    pub pointer_position: Vec2,
    /// Pointer motion since the last tick, in the same units as the position.
    pub pointer_velocity: Vec2,
    pub pointer_strength: f32,
    pub pointer_radius: f32,
    pub damping: f32,
    pub physics_mode: PhysicsMode,
    pub friction: f32,
    pub restitution: f32,
    pub settle_threshold: f32,
}

impl Default for StepParams {
    fn default() -> Self {
        Self::from_settings(&SandSettings::default(), Vec2::ZERO, Vec2::ZERO)
    }
}

impl StepParams {
    pub fn from_settings(settings: &SandSettings, pointer_position: Vec2, pointer_velocity: Vec2) -> Self {
        Self {
            wind: Vec3::from_array(settings.wind),
            pointer_position,
            pointer_velocity,
            pointer_strength: settings.pointer_strength,
            pointer_radius: settings.pointer_radius,
            damping: settings.damping,
            physics_mode: settings.physics_mode,
            friction: settings.friction,
            restitution: settings.restitution,
            settle_threshold: settings.settle_threshold,
        }
    }

    pub fn uniforms(&self, grain_count: u32, has_surface: bool) -> SimUniforms {
        SimUniforms {
            wind: self.wind.to_array(),
            damping: self.damping,
            pointer_position: self.pointer_position.to_array(),
            pointer_velocity: self.pointer_velocity.to_array(),
            pointer_strength: self.pointer_strength,
            pointer_radius: self.pointer_radius,
            friction: self.friction,
            restitution: self.restitution,
            settle_threshold: self.settle_threshold,
            physics_mode: self.physics_mode.to_u32(),
            has_surface: has_surface as u32,
            grain_count,
        }
    }
}

/// Uniform block of the step kernel. Field order matches `SimUniforms` in
/// `sand_step.wgsl` (64 bytes, no implicit padding).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SimUniforms {
    pub wind: [f32; 3],
    pub damping: f32,
    pub pointer_position: [f32; 2],
    pub pointer_velocity: [f32; 2],
    pub pointer_strength: f32,
    pub pointer_radius: f32,
    pub friction: f32,
    pub restitution: f32,
    pub settle_threshold: f32,
    pub physics_mode: u32,
    pub has_surface: u32,
    pub grain_count: u32,
}

/// GLSL/WGSL `smoothstep`.
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Mirror a coordinate that left [-1, 1] back inside and bounce its velocity.
pub fn fold_axis(position: f32, velocity: f32) -> (f32, f32) {
    if position.abs() <= 1.0 {
        return (position, velocity);
    }
    let mirrored = 2.0 * position.signum() - position;
    (mirrored.clamp(-1.0, 1.0), -velocity)
}

/// Advance one grain by one frame.
pub fn step_grain(grain: &Grain, params: &StepParams, surface: Option<&dyn Surface>) -> Grain {
    let mut position = grain.position_vec3();
    let mut velocity = grain.velocity_vec3();

    velocity += params.wind;
    let distance = position.truncate().distance(params.pointer_position);
    let falloff = smoothstep(0.0, 1.0, params.pointer_radius - distance);
    let impulse = params.pointer_velocity * params.pointer_strength * (0.2 + position.z * 0.8) * falloff;
    velocity += impulse.extend(0.0);
    velocity *= params.damping;

    position += velocity;

    (position.x, velocity.x) = fold_axis(position.x, velocity.x);
    (position.y, velocity.y) = fold_axis(position.y, velocity.y);
    position.z = position.z.clamp(0.0, 1.0);

    if let Some(surface) = surface {
        let SurfaceSample { normal, height } = surface.sample(position.truncate());
        match params.physics_mode {
            PhysicsMode::Reflect => {
                let into = velocity.dot(normal);
                if position.z <= height && into < 0.0 {
                    velocity = (velocity - 2.0 * into * normal) * params.restitution;
                }
            }
            PhysicsMode::Damp => {
                let slope = normal.truncate().length();
                velocity *= 1.0 - (params.friction * slope).clamp(0.0, 1.0);
            }
        }
        if velocity.length() < params.settle_threshold {
            position.z = height.clamp(0.0, 1.0);
        }
    }

    Grain {
        position: position.to_array(),
        velocity: velocity.to_array(),
    }
}

/// Step every grain of `read` into `write`. Both slices have the same length.
pub fn step_all(read: &[Grain], write: &mut [Grain], params: &StepParams, surface: Option<&dyn Surface>) {
    debug_assert_eq!(read.len(), write.len());
    for (src, dst) in read.iter().zip(write.iter_mut()) {
        *dst = step_grain(src, params, surface);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calm() -> StepParams {
        StepParams {
            wind: Vec3::ZERO,
            pointer_velocity: Vec2::ZERO,
            ..StepParams::default()
        }
    }

    #[test]
    fn test_uniform_block_is_64_bytes() {
        assert_eq!(std::mem::size_of::<SimUniforms>(), 64);
    }

    #[test]
    fn test_smoothstep_edges() {
        assert_eq!(smoothstep(0.0, 1.0, -0.5), 0.0);
        assert_eq!(smoothstep(0.0, 1.0, 1.5), 1.0);
        assert_eq!(smoothstep(0.0, 1.0, 0.5), 0.5);
    }

    #[test]
    fn test_fold_mirrors_and_bounces() {
        assert_eq!(fold_axis(0.5, 0.1), (0.5, 0.1));
        let (p, v) = fold_axis(1.25, 0.3);
        assert!((p - 0.75).abs() < 1e-6);
        assert_eq!(v, -0.3);
        let (p, v) = fold_axis(-1.5, -0.6);
        assert!((p + 0.5).abs() < 1e-6);
        assert_eq!(v, 0.6);
        // Far outside still lands inside.
        let (p, _) = fold_axis(7.0, 6.0);
        assert!(p.abs() <= 1.0);
    }

    #[test]
    fn test_positions_stay_in_bounds_for_any_velocity() {
        let params = calm();
        for vx in [-5.0, -1.9, -0.3, 0.0, 0.7, 2.5, 40.0] {
            for vy in [-40.0, -0.9, 0.0, 1.1, 3.0] {
                let grain = Grain {
                    position: [0.9, -0.8, 0.5],
                    velocity: [vx, vy, 0.0],
                };
                let next = step_grain(&grain, &params, None);
                assert!(next.position[0].abs() <= 1.0, "x out of bounds for v=({vx},{vy})");
                assert!(next.position[1].abs() <= 1.0, "y out of bounds for v=({vx},{vy})");
                assert!((0.0..=1.0).contains(&next.position[2]));
            }
        }
    }

    #[test]
    fn test_velocities_converge_without_forces() {
        let params = calm();
        let mut grain = Grain {
            position: [0.1, 0.2, 0.3],
            velocity: [0.05, -0.04, 0.01],
        };
        for _ in 0..400 {
            grain = step_grain(&grain, &params, None);
        }
        assert!(grain.velocity_vec3().length() < 1e-6);
    }

    #[test]
    fn test_pointer_impulse_falls_off_with_distance() {
        let params = StepParams {
            pointer_position: Vec2::ZERO,
            pointer_velocity: Vec2::new(0.01, 0.0),
            damping: 1.0,
            ..calm()
        };
        let near = step_grain(&Grain::at([0.05, 0.0, 0.5]), &params, None);
        let mid = step_grain(&Grain::at([0.2, 0.0, 0.5]), &params, None);
        let far = step_grain(&Grain::at([0.6, 0.0, 0.5]), &params, None);

        assert!(near.velocity[0] > mid.velocity[0]);
        assert!(mid.velocity[0] > 0.0);
        assert_eq!(near.velocity[1], 0.0);
        assert_eq!(far.velocity, [0.0; 3]);
        assert_eq!(far.position, [0.6, 0.0, 0.5]);
    }

    #[test]
    fn test_upper_layers_are_pushed_harder() {
        let params = StepParams {
            pointer_velocity: Vec2::new(0.0, 0.01),
            damping: 1.0,
            ..calm()
        };
        let low = step_grain(&Grain::at([0.0, 0.0, 0.0]), &params, None);
        let high = step_grain(&Grain::at([0.0, 0.0, 1.0]), &params, None);
        assert!(high.velocity[1] > low.velocity[1]);
        assert!(low.velocity[1] > 0.0);
    }

    #[test]
    fn test_reflect_bounces_grain_moving_into_surface() {
        let params = StepParams {
            damping: 1.0,
            restitution: 0.5,
            ..calm()
        };
        let surface = FlatSurface { height: 0.5 };
        let grain = Grain {
            position: [0.0, 0.0, 0.3],
            velocity: [0.0, 0.0, -0.1],
        };
        let next = step_grain(&grain, &params, Some(&surface));
        assert!((next.velocity[2] - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_reflect_ignores_grain_above_surface() {
        let params = StepParams {
            damping: 1.0,
            ..calm()
        };
        let surface = FlatSurface { height: 0.1 };
        let grain = Grain {
            position: [0.0, 0.0, 0.8],
            velocity: [0.0, 0.0, -0.1],
        };
        let next = step_grain(&grain, &params, Some(&surface));
        assert!((next.velocity[2] + 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_damp_mode_slows_on_slopes_only() {
        let params = StepParams {
            damping: 1.0,
            friction: 0.5,
            physics_mode: PhysicsMode::Damp,
            ..calm()
        };
        let grain = Grain {
            position: [0.0, 0.0, 0.5],
            velocity: [0.1, 0.0, 0.0],
        };
        let flat = step_grain(&grain, &params, Some(&FlatSurface { height: 0.0 }));
        assert!((flat.velocity[0] - 0.1).abs() < 1e-6);

        struct Slope;
        impl Surface for Slope {
            fn sample(&self, _xy: Vec2) -> SurfaceSample {
                SurfaceSample {
                    normal: Vec3::new(-0.6, 0.0, 0.8),
                    height: 0.0,
                }
            }
        }
        let sloped = step_grain(&grain, &params, Some(&Slope));
        assert!((sloped.velocity[0] - 0.07).abs() < 1e-6);
    }

    #[test]
    fn test_settled_grain_snaps_to_surface_height() {
        let params = calm();
        let grain = Grain::at([0.0, 0.0, 0.9]);
        let next = step_grain(&grain, &params, Some(&FlatSurface { height: 0.25 }));
        assert_eq!(next.position[2], 0.25);
    }

    #[test]
    fn test_step_all_matches_step_grain() {
        let params = StepParams {
            pointer_velocity: Vec2::new(0.02, -0.01),
            ..StepParams::default()
        };
        let read = crate::grain::seed_grains(32, Some(9));
        let mut write = vec![Grain::default(); read.len()];
        step_all(&read, &mut write, &params, None);
        for (src, dst) in read.iter().zip(&write) {
            assert_eq!(*dst, step_grain(src, &params, None));
        }
    }
}
