//! Height field processing passes.
//!
//! The sand layer draws its grains into the height target; this module then
//! runs:
//! 1. Separable Gaussian blur, horizontal then vertical (ping-pong targets)
//! 2. Normal reconstruction into the surface texture (rgb = normal, a = height)
//! 3. Display of the surface onto the visible target
//!
//! Each pass is optional: a pipeline that fails validation is logged and
//! skipped, and the simulation keeps running without a surface.

use bytemuck::{Pod, Zeroable};

use super::pipeline::{
    create_render_pipeline, sampler_entry, texture_entry, uniform_bind_group, uniform_buffer,
    uniform_layout,
};
use super::quad::{create_quad_buffer, QuadVertex, QUAD_VERTEX_COUNT};
use crate::heightfield::{gaussian_weights, SURFACE_SIZE};
use crate::ping_pong::PingPong;
use crate::settings::{SandSettings, MAX_BLUR_RADIUS};
use crate::shader::{compose, create_shader_module, or_disabled, validated, ShaderChunk};

/// Format of the height and surface textures.
pub const HEIGHT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Uniforms for one blur direction
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct BlurUniforms {
    weights: [[f32; 4]; 4],
    direction: [f32; 2],
    radius: u32,
    _pad: u32,
}

impl BlurUniforms {
    fn new(weights: &[f32], direction: [f32; 2]) -> Self {
        let mut packed = [[0.0; 4]; 4];
        for (i, w) in weights.iter().take(MAX_BLUR_RADIUS as usize + 1).enumerate() {
            packed[i / 4][i % 4] = *w;
        }
        Self {
            weights: packed,
            direction,
            radius: weights.len().saturating_sub(1) as u32,
            _pad: 0,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct NormalUniforms {
    strength: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct DisplayUniforms {
    background: [f32; 3],
    mode: u32,
}

pub struct RenderTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl RenderTarget {
    fn new(device: &wgpu::Device, label: &str, size: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HEIGHT_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

/// One fullscreen pass: pipeline plus its uniform buffer/bind group.
struct Pass {
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
}

pub struct SandProcessing {
    /// Height target and blur scratch. The read slot holds the latest height.
    blur_targets: PingPong<RenderTarget>,
    surface: RenderTarget,

    /// `texture_bind_groups[i]` samples `blur_targets` slot i.
    texture_bind_groups: [wgpu::BindGroup; 2],
    surface_bind_group: wgpu::BindGroup,

    // H and V get their own buffers; a single buffer written twice per
    // submit would leave both passes with the last write.
    blur_horizontal: Option<Pass>,
    blur_vertical: Option<Pass>,
    normals: Option<Pass>,
    display: Option<Pass>,

    quad_vertex_buffer: wgpu::Buffer,
    processed: bool,
}

impl SandProcessing {
    pub async fn new(device: &wgpu::Device, display_format: wgpu::TextureFormat) -> Self {
        let blur_targets = PingPong::from_fn(|i| {
            RenderTarget::new(device, &format!("Height Target {}", i), SURFACE_SIZE)
        });
        let surface = RenderTarget::new(device, "Surface Texture", SURFACE_SIZE);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Surface Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Height Texture Layout"),
            entries: &[texture_entry(0, wgpu::ShaderStages::FRAGMENT)],
        });
        let sampled_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Surface Sampled Layout"),
            entries: &[texture_entry(0, wgpu::ShaderStages::FRAGMENT), sampler_entry(1)],
        });
        let fragment_uniform_layout =
            uniform_layout(device, "Processing Uniform Layout", wgpu::ShaderStages::FRAGMENT);

        let texture_bind_groups = blur_targets.slots().each_ref().map(|target| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Height Texture Bind Group"),
                layout: &texture_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&target.view),
                }],
            })
        });
        let surface_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Surface Bind Group"),
            layout: &sampled_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&surface.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let blur_module = or_disabled(
            create_shader_module(device, "Height Blur Shader", include_str!("height_blur.wgsl")).await,
        );
        let normals_source = compose(
            include_str!("surface_normals.wgsl"),
            &[ShaderChunk::start(include_str!("bump_from_height.wgsl"))],
        );
        let normals_module =
            or_disabled(create_shader_module(device, "Surface Normals Shader", &normals_source).await);
        let display_module = or_disabled(
            create_shader_module(device, "Sand Display Shader", include_str!("sand_display.wgsl")).await,
        );

        let mut blur_passes = Vec::with_capacity(2);
        for label in ["Height Blur H", "Height Blur V"] {
            let pass = match &blur_module {
                Some(module) => {
                    Self::create_pass::<BlurUniforms>(
                        device,
                        label,
                        module,
                        &[&texture_layout, &fragment_uniform_layout],
                        &fragment_uniform_layout,
                        HEIGHT_FORMAT,
                    )
                    .await
                }
                None => None,
            };
            blur_passes.push(pass);
        }
        let blur_vertical = blur_passes.pop().flatten();
        let blur_horizontal = blur_passes.pop().flatten();

        let normals = match &normals_module {
            Some(module) => {
                Self::create_pass::<NormalUniforms>(
                    device,
                    "Surface Normals",
                    module,
                    &[&texture_layout, &fragment_uniform_layout],
                    &fragment_uniform_layout,
                    HEIGHT_FORMAT,
                )
                .await
            }
            None => None,
        };

        let display = match &display_module {
            Some(module) => {
                Self::create_pass::<DisplayUniforms>(
                    device,
                    "Sand Display",
                    module,
                    &[&sampled_layout, &fragment_uniform_layout],
                    &fragment_uniform_layout,
                    display_format,
                )
                .await
            }
            None => None,
        };

        Self {
            blur_targets,
            surface,
            texture_bind_groups,
            surface_bind_group,
            blur_horizontal,
            blur_vertical,
            normals,
            display,
            quad_vertex_buffer: create_quad_buffer(device, "Processing Quad Buffer"),
            processed: false,
        }
    }

    async fn create_pass<U: Pod>(
        device: &wgpu::Device,
        label: &str,
        module: &wgpu::ShaderModule,
        bind_group_layouts: &[&wgpu::BindGroupLayout],
        uniform_layout: &wgpu::BindGroupLayout,
        format: wgpu::TextureFormat,
    ) -> Option<Pass> {
        let pipeline = or_disabled(
            validated(device, label, || {
                create_render_pipeline(
                    device,
                    label,
                    module,
                    bind_group_layouts,
                    &[QuadVertex::desc()],
                    format,
                    wgpu::BlendState::REPLACE,
                )
            })
            .await,
        )?;
        let uniform_buffer = uniform_buffer(device, label, std::mem::size_of::<U>());
        let uniform_bind_group = uniform_bind_group(device, label, uniform_layout, &uniform_buffer);
        Some(Pass {
            pipeline,
            uniform_buffer,
            uniform_bind_group,
        })
    }

    /// Target the height pass draws into.
    pub fn height_view(&self) -> &wgpu::TextureView {
        &self.blur_targets.read().view
    }

    pub fn surface_view(&self) -> &wgpu::TextureView {
        &self.surface.view
    }

    /// True once the surface texture holds normals and heights.
    pub fn has_surface(&self) -> bool {
        self.processed
    }

    /// Blur the height target and rebuild the surface from it.
    pub fn process(&mut self, encoder: &mut wgpu::CommandEncoder, queue: &wgpu::Queue, settings: &SandSettings) {
        let weights = gaussian_weights(settings.blur_radius, settings.blur_sigma);

        for (pass, direction) in [
            (&self.blur_horizontal, [1.0, 0.0]),
            (&self.blur_vertical, [0.0, 1.0]),
        ] {
            let Some(pass) = pass else {
                continue;
            };
            queue.write_buffer(
                &pass.uniform_buffer,
                0,
                bytemuck::bytes_of(&BlurUniforms::new(&weights, direction)),
            );
            Self::draw_fullscreen(
                encoder,
                "Height Blur Pass",
                pass,
                &self.texture_bind_groups[self.blur_targets.read_index()],
                &self.blur_targets.write().view,
                &self.quad_vertex_buffer,
            );
            self.blur_targets.swap();
        }

        let Some(normals) = &self.normals else {
            return;
        };
        let uniforms = NormalUniforms {
            strength: settings.normal_strength,
            _pad0: 0.0,
            _pad1: 0.0,
            _pad2: 0.0,
        };
        queue.write_buffer(&normals.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
        Self::draw_fullscreen(
            encoder,
            "Surface Normals Pass",
            normals,
            &self.texture_bind_groups[self.blur_targets.read_index()],
            &self.surface.view,
            &self.quad_vertex_buffer,
        );
        self.processed = true;
    }

    /// Composite the surface onto `target` in the current display mode.
    pub fn display(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        queue: &wgpu::Queue,
        target: &wgpu::TextureView,
        settings: &SandSettings,
    ) {
        let Some(display) = &self.display else {
            return;
        };
        let uniforms = DisplayUniforms {
            background: settings.background,
            mode: settings.display.to_u32(),
        };
        queue.write_buffer(&display.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
        Self::draw_fullscreen(
            encoder,
            "Sand Display Pass",
            display,
            &self.surface_bind_group,
            target,
            &self.quad_vertex_buffer,
        );
    }

    fn draw_fullscreen(
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        pass: &Pass,
        texture_bind_group: &wgpu::BindGroup,
        target: &wgpu::TextureView,
        quad_vertex_buffer: &wgpu::Buffer,
    ) {
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_pipeline(&pass.pipeline);
        render_pass.set_bind_group(0, texture_bind_group, &[]);
        render_pass.set_bind_group(1, &pass.uniform_bind_group, &[]);
        render_pass.set_vertex_buffer(0, quad_vertex_buffer.slice(..));
        render_pass.draw(0..QUAD_VERTEX_COUNT, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_layouts_match_wgsl() {
        assert_eq!(std::mem::size_of::<BlurUniforms>(), 80);
        assert_eq!(std::mem::size_of::<NormalUniforms>(), 16);
        assert_eq!(std::mem::size_of::<DisplayUniforms>(), 16);
    }

    #[test]
    fn test_blur_uniforms_pack_weights() {
        let weights = gaussian_weights(5, 2.0);
        let uniforms = BlurUniforms::new(&weights, [0.0, 1.0]);
        assert_eq!(uniforms.radius, 5);
        assert_eq!(uniforms.weights[0][0], weights[0]);
        assert_eq!(uniforms.weights[1][1], weights[5]);
        assert_eq!(uniforms.weights[1][2], 0.0);
        assert_eq!(uniforms.direction, [0.0, 1.0]);
    }

    #[test]
    fn test_blur_uniforms_max_radius_fills_all_slots() {
        let weights = gaussian_weights(MAX_BLUR_RADIUS, 4.0);
        let uniforms = BlurUniforms::new(&weights, [1.0, 0.0]);
        assert_eq!(uniforms.radius, MAX_BLUR_RADIUS);
        assert_eq!(uniforms.weights[3][3], weights[15]);
    }

    #[test]
    fn test_zero_radius_is_identity_kernel() {
        let uniforms = BlurUniforms::new(&gaussian_weights(0, 2.0), [1.0, 0.0]);
        assert_eq!(uniforms.radius, 0);
        assert_eq!(uniforms.weights[0][0], 1.0);
    }
}
