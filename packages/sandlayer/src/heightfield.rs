//! CPU height field: splat, separable blur and normal reconstruction.
//!
//! This is the reference for the GPU processing passes and the surface used
//! by the CPU simulation fallback. Texel rows follow texture orientation:
//! row 0 is the top edge (world y = +1), column 0 the left edge (x = -1).

use glam::{Vec2, Vec3};

use crate::grain::Grain;
use crate::settings::{SandSettings, MAX_BLUR_RADIUS};
use crate::simulation::{Surface, SurfaceSample};

/// Side length of the GPU height and surface textures.
pub const SURFACE_SIZE: u32 = 1024;

/// Map a world position in [-1, 1]² to texture uv in [0, 1]².
pub fn world_to_uv(xy: Vec2) -> Vec2 {
    Vec2::new(xy.x * 0.5 + 0.5, 0.5 - xy.y * 0.5)
}

/// One-sided Gaussian kernel: `weights[0]` is the centre tap, `weights[i]`
/// applies to offsets ±i. Normalised so the full kernel sums to 1.
pub fn gaussian_weights(radius: u32, sigma: f32) -> Vec<f32> {
    let radius = radius.min(MAX_BLUR_RADIUS) as usize;
    let sigma = sigma.max(0.01);
    let mut weights: Vec<f32> = (0..=radius)
        .map(|i| (-(i as f32 * i as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total = weights[0] + 2.0 * weights[1..].iter().sum::<f32>();
    for w in &mut weights {
        *w /= total;
    }
    weights
}

#[derive(Clone, Debug)]
pub struct HeightField {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl HeightField {
    pub fn new(width: usize, height: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    /// Height at a texel, clamped to the edge like a `ClampToEdge` sampler.
    pub fn get(&self, col: isize, row: isize) -> f32 {
        let c = col.clamp(0, self.width as isize - 1) as usize;
        let r = row.clamp(0, self.height as isize - 1) as usize;
        self.data[r * self.width + c]
    }

    pub fn set(&mut self, col: usize, row: usize, value: f32) {
        if col < self.width && row < self.height {
            self.data[row * self.width + col] = value;
        }
    }

    fn texel_of(&self, xy: Vec2) -> (usize, usize) {
        let uv = world_to_uv(xy);
        let col = ((uv.x * self.width as f32) as isize).clamp(0, self.width as isize - 1);
        let row = ((uv.y * self.height as f32) as isize).clamp(0, self.height as isize - 1);
        (col as usize, row as usize)
    }

    /// Accumulate `deposit` per grain into the texel under it (additive, like
    /// the GPU height pass with `One + One` blending).
    pub fn splat(&mut self, grains: &[Grain], deposit: f32) {
        for grain in grains {
            let (col, row) = self.texel_of(Vec2::new(grain.position[0], grain.position[1]));
            self.data[row * self.width + col] += deposit;
        }
    }

    /// Separable blur: horizontal pass then vertical pass.
    pub fn blur(&mut self, weights: &[f32]) {
        if weights.len() < 2 {
            return;
        }
        let horizontal = self.convolve(weights, (1, 0));
        self.data = horizontal.data;
        let vertical = self.convolve(weights, (0, 1));
        self.data = vertical.data;
    }

    fn convolve(&self, weights: &[f32], direction: (isize, isize)) -> HeightField {
        let mut out = HeightField::new(self.width, self.height);
        for row in 0..self.height as isize {
            for col in 0..self.width as isize {
                let mut sum = self.get(col, row) * weights[0];
                for (i, w) in weights.iter().enumerate().skip(1) {
                    let i = i as isize;
                    sum += self.get(col + direction.0 * i, row + direction.1 * i) * w;
                    sum += self.get(col - direction.0 * i, row - direction.1 * i) * w;
                }
                out.data[row as usize * self.width + col as usize] = sum;
            }
        }
        out
    }

    /// Normal from central differences, with world-up y.
    pub fn normal_at(&self, col: isize, row: isize, strength: f32) -> Vec3 {
        let dx = (self.get(col + 1, row) - self.get(col - 1, row)) * 0.5;
        // rows grow downward, world y grows upward
        let dy = (self.get(col, row - 1) - self.get(col, row + 1)) * 0.5;
        Vec3::new(-dx * strength, -dy * strength, 1.0).normalize()
    }

    /// Build the surface map (normal + height per texel).
    pub fn to_surface(&self, strength: f32) -> SurfaceMap {
        let mut texels = Vec::with_capacity(self.width * self.height);
        for row in 0..self.height as isize {
            for col in 0..self.width as isize {
                let n = self.normal_at(col, row, strength);
                texels.push([n.x, n.y, n.z, self.get(col, row)]);
            }
        }
        SurfaceMap {
            width: self.width,
            height: self.height,
            texels,
        }
    }
}

/// Run splat, blur and normal reconstruction on the CPU at `resolution`.
///
/// Deposit, blur radius and normal strength are rescaled so the result
/// approximates the GPU surface built at `SURFACE_SIZE` with quads of
/// `point_size` pixels.
pub fn surface_from_grains(grains: &[Grain], settings: &SandSettings, resolution: usize) -> SurfaceMap {
    let scale = resolution as f32 / SURFACE_SIZE as f32;
    let mut field = HeightField::new(resolution, resolution);
    let footprint = settings.point_size * settings.point_size * scale * scale;
    field.splat(grains, settings.deposit * footprint);
    let radius = (settings.blur_radius as f32 * scale).round() as u32;
    field.blur(&gaussian_weights(radius, (settings.blur_sigma * scale).max(0.5)));
    field.to_surface(settings.normal_strength * scale)
}

/// CPU counterpart of the surface texture: RGB = normal, A = height.
#[derive(Clone, Debug)]
pub struct SurfaceMap {
    width: usize,
    height: usize,
    texels: Vec<[f32; 4]>,
}

impl SurfaceMap {
    pub fn texel(&self, col: usize, row: usize) -> [f32; 4] {
        self.texels[row.min(self.height - 1) * self.width + col.min(self.width - 1)]
    }
}

impl Surface for SurfaceMap {
    fn sample(&self, xy: Vec2) -> SurfaceSample {
        let uv = world_to_uv(xy);
        let col = ((uv.x * self.width as f32) as isize).clamp(0, self.width as isize - 1) as usize;
        let row = ((uv.y * self.height as f32) as isize).clamp(0, self.height as isize - 1) as usize;
        let t = self.texel(col, row);
        SurfaceSample {
            normal: Vec3::new(t[0], t[1], t[2]),
            height: t[3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_weights_normalised() {
        for radius in [1, 4, 15] {
            let w = gaussian_weights(radius, 2.0);
            assert_eq!(w.len(), radius as usize + 1);
            let total = w[0] + 2.0 * w[1..].iter().sum::<f32>();
            assert!((total - 1.0).abs() < 1e-5);
            assert!(w.windows(2).all(|p| p[0] >= p[1]));
        }
        assert_eq!(gaussian_weights(0, 1.0), vec![1.0]);
        assert_eq!(gaussian_weights(99, 2.0).len(), MAX_BLUR_RADIUS as usize + 1);
    }

    #[test]
    fn test_blur_preserves_constant_field() {
        let mut field = HeightField::new(16, 16);
        for r in 0..16 {
            for c in 0..16 {
                field.set(c, r, 0.5);
            }
        }
        field.blur(&gaussian_weights(4, 2.0));
        for r in 0..16 {
            for c in 0..16 {
                assert!((field.get(c, r) - 0.5).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_blur_spreads_a_spike() {
        let mut field = HeightField::new(9, 9);
        field.set(4, 4, 1.0);
        field.blur(&gaussian_weights(2, 1.0));
        assert!(field.get(4, 4) < 1.0);
        assert!(field.get(5, 4) > 0.0);
        assert!((field.get(5, 4) - field.get(3, 4)).abs() < 1e-6);
        assert!((field.get(4, 5) - field.get(4, 3)).abs() < 1e-6);
    }

    #[test]
    fn test_flat_field_normals_point_up() {
        let field = HeightField::new(8, 8);
        let n = field.normal_at(3, 3, 10.0);
        assert_eq!(n, Vec3::Z);
    }

    #[test]
    fn test_ramp_normal_tilts_downhill() {
        // Height rises with x (column).
        let mut field = HeightField::new(8, 8);
        for r in 0..8 {
            for c in 0..8 {
                field.set(c, r, c as f32 * 0.1);
            }
        }
        let n = field.normal_at(4, 4, 1.0);
        assert!(n.x < 0.0);
        assert!(n.y.abs() < 1e-6);
        assert!((n.length() - 1.0).abs() < 1e-5);

        // Height rises with world y (decreasing row).
        let mut field = HeightField::new(8, 8);
        for r in 0..8 {
            for c in 0..8 {
                field.set(c, r, (7 - r) as f32 * 0.1);
            }
        }
        let n = field.normal_at(4, 4, 1.0);
        assert!(n.y < 0.0);
    }

    #[test]
    fn test_splat_and_sample() {
        let mut field = HeightField::new(4, 4);
        let grains = [Grain::at([-0.9, 0.9, 0.0]), Grain::at([-0.9, 0.9, 0.5])];
        field.splat(&grains, 0.25);
        // top-left texel
        assert_eq!(field.get(0, 0), 0.5);
        let surface = field.to_surface(1.0);
        let sample = surface.sample(Vec2::new(-0.9, 0.9));
        assert_eq!(sample.height, 0.5);
    }

    #[test]
    fn test_surface_from_grains() {
        let settings = SandSettings::default();
        let flat = surface_from_grains(&[], &settings, 32);
        assert_eq!(flat.sample(Vec2::ZERO).normal, Vec3::Z);
        assert_eq!(flat.sample(Vec2::ZERO).height, 0.0);

        let pile = vec![Grain::at([0.0, 0.0, 0.5]); 500];
        let surface = surface_from_grains(&pile, &settings, 32);
        assert!(surface.sample(Vec2::ZERO).height > 0.0);
        // the flank right of the pile slopes down toward +x
        let flank = surface.sample(Vec2::new(0.08, 0.0));
        assert!(flank.normal.x > 0.0);
    }

    #[test]
    fn test_world_to_uv_corners() {
        assert_eq!(world_to_uv(Vec2::new(-1.0, 1.0)), Vec2::new(0.0, 0.0));
        assert_eq!(world_to_uv(Vec2::new(1.0, -1.0)), Vec2::new(1.0, 1.0));
    }
}
