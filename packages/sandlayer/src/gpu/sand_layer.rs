//! GPU side of the sand simulation.
//!
//! Grains live in two vertex/storage buffers. Each step reads one and writes
//! the other, then the roles swap; the freshly written buffer is what the
//! height and display passes draw. Adapters without compute shaders step on
//! the CPU and upload the result into the write buffer instead.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::context::GpuContext;
use super::pipeline::{
    create_compute_pipeline, create_render_pipeline, storage_entry, texture_entry, uniform_bind_group,
    uniform_buffer, uniform_entry, uniform_layout, ADDITIVE,
};
use super::processing::HEIGHT_FORMAT;
use super::quad::{create_quad_buffer, QuadVertex, QUAD_VERTEX_COUNT};
use crate::camera::Camera;
use crate::grain::{seed_grains, Grain};
use crate::heightfield::{surface_from_grains, SURFACE_SIZE};
use crate::ping_pong::PingPong;
use crate::settings::SandSettings;
use crate::shader::{create_shader_module, or_disabled, validated};
use crate::simulation::{step_all, SimUniforms, StepParams, Surface};

/// Invocations per compute workgroup; matches `sand_step.wgsl`.
pub const WORKGROUP_SIZE: u32 = 256;

/// Resolution of the surface rebuilt on the CPU when compute is unavailable.
pub const CPU_SURFACE_RESOLUTION: usize = 128;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct HeightUniforms {
    target_size: [f32; 2],
    point_size: f32,
    deposit: f32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct GrainUniforms {
    projection_view: [[f32; 4]; 4],
    viewport: [f32; 2],
    point_size: f32,
    _pad: f32,
}

/// Number of workgroups covering `count` grains.
pub fn workgroup_count(count: u32) -> u32 {
    count.div_ceil(WORKGROUP_SIZE)
}

struct ComputeStep {
    pipeline: wgpu::ComputePipeline,
    storage_layout: wgpu::BindGroupLayout,
    /// `bind_groups[i]` reads buffer i and writes buffer 1 - i.
    bind_groups: [wgpu::BindGroup; 2],
    uniform_buffer: wgpu::Buffer,
    surface_bind_group: wgpu::BindGroup,
}

impl ComputeStep {
    fn bind(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        uniform_buffer: &wgpu::Buffer,
        buffers: &PingPong<wgpu::Buffer>,
    ) -> [wgpu::BindGroup; 2] {
        let [a, b] = buffers.slots();
        [(a, b), (b, a)].map(|(read, write)| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Sand Step Bind Group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: read.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: write.as_entire_binding(),
                    },
                ],
            })
        })
    }
}

struct DrawPass {
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
}

pub struct SandLayer {
    count: u32,
    buffers: PingPong<wgpu::Buffer>,
    buffer_usage: wgpu::BufferUsages,
    compute: Option<ComputeStep>,
    /// CPU copy of the grains, only when stepping on the CPU.
    cpu_grains: Option<PingPong<Vec<Grain>>>,
    quad_vertex_buffer: wgpu::Buffer,
    height: Option<DrawPass>,
    grains: Option<DrawPass>,
}

impl SandLayer {
    pub async fn new(
        gpu: &GpuContext,
        settings: &SandSettings,
        surface_view: &wgpu::TextureView,
        display_format: wgpu::TextureFormat,
    ) -> Self {
        let device = &gpu.device;
        let grains = seed_grains(settings.grain_count, settings.seed);
        let count = grains.len() as u32;

        let compute = if gpu.compute {
            Self::create_compute(device, surface_view).await
        } else {
            None
        };
        let mut buffer_usage =
            wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
        if compute.is_some() {
            buffer_usage |= wgpu::BufferUsages::STORAGE;
        }
        let buffers = Self::create_buffers(device, &grains, buffer_usage);

        let compute = compute.map(|(pipeline, storage_layout, uniform_buffer, surface_bind_group)| {
            let bind_groups = ComputeStep::bind(device, &storage_layout, &uniform_buffer, &buffers);
            ComputeStep {
                pipeline,
                storage_layout,
                bind_groups,
                uniform_buffer,
                surface_bind_group,
            }
        });
        let cpu_grains = compute.is_none().then(|| {
            log::warn!("Stepping {} grains on the CPU", count);
            PingPong::new(grains.clone(), grains)
        });

        let height = Self::create_draw_pass::<HeightUniforms>(
            device,
            "Sand Height",
            include_str!("sand_height.wgsl"),
            wgpu::ShaderStages::VERTEX_FRAGMENT,
            HEIGHT_FORMAT,
            ADDITIVE,
        )
        .await;
        let grains_pass = Self::create_draw_pass::<GrainUniforms>(
            device,
            "Sand Grains",
            include_str!("sand_grains.wgsl"),
            wgpu::ShaderStages::VERTEX,
            display_format,
            wgpu::BlendState::REPLACE,
        )
        .await;

        Self {
            count,
            buffers,
            buffer_usage,
            compute,
            cpu_grains,
            quad_vertex_buffer: create_quad_buffer(device, "Sand Corner Buffer"),
            height,
            grains: grains_pass,
        }
    }

    fn create_buffers(
        device: &wgpu::Device,
        grains: &[Grain],
        usage: wgpu::BufferUsages,
    ) -> PingPong<wgpu::Buffer> {
        PingPong::from_fn(|i| {
            let label = format!("Sand Grain Buffer {}", i);
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label.as_str()),
                contents: bytemuck::cast_slice(grains),
                usage,
            })
        })
    }

    async fn create_compute(
        device: &wgpu::Device,
        surface_view: &wgpu::TextureView,
    ) -> Option<(wgpu::ComputePipeline, wgpu::BindGroupLayout, wgpu::Buffer, wgpu::BindGroup)> {
        let module =
            or_disabled(create_shader_module(device, "Sand Step Shader", include_str!("sand_step.wgsl")).await)?;

        let storage_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sand Step Layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::COMPUTE),
                storage_entry(1, true),
                storage_entry(2, false),
            ],
        });
        let surface_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sand Step Surface Layout"),
            entries: &[texture_entry(0, wgpu::ShaderStages::COMPUTE)],
        });

        let pipeline = or_disabled(
            validated(device, "Sand Step Pipeline", || {
                create_compute_pipeline(device, "Sand Step Pipeline", &module, &[&storage_layout, &surface_layout])
            })
            .await,
        )?;

        let uniform_buffer = uniform_buffer(device, "Sand Step Uniforms", std::mem::size_of::<SimUniforms>());
        let surface_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Sand Step Surface Bind Group"),
            layout: &surface_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(surface_view),
            }],
        });

        Some((pipeline, storage_layout, uniform_buffer, surface_bind_group))
    }

    async fn create_draw_pass<U: Pod>(
        device: &wgpu::Device,
        label: &str,
        source: &str,
        visibility: wgpu::ShaderStages,
        format: wgpu::TextureFormat,
        blend: wgpu::BlendState,
    ) -> Option<DrawPass> {
        let module = or_disabled(create_shader_module(device, label, source).await)?;
        let layout = uniform_layout(device, label, visibility);
        let pipeline = or_disabled(
            validated(device, label, || {
                create_render_pipeline(
                    device,
                    label,
                    &module,
                    &[&layout],
                    &[QuadVertex::desc(), Grain::instance_desc()],
                    format,
                    blend,
                )
            })
            .await,
        )?;
        let uniform_buffer = uniform_buffer(device, label, std::mem::size_of::<U>());
        let uniform_bind_group = uniform_bind_group(device, label, &layout, &uniform_buffer);
        Some(DrawPass {
            pipeline,
            uniform_buffer,
            uniform_bind_group,
        })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// True when grains are stepped by the compute kernel.
    pub fn is_gpu_stepped(&self) -> bool {
        self.compute.is_some()
    }

    /// Buffer holding the most recent grain state. Copyable for readback.
    pub fn grain_buffer(&self) -> &wgpu::Buffer {
        self.buffers.read()
    }

    /// Replace every grain with a fresh placement from `settings`.
    pub fn reseed(&mut self, device: &wgpu::Device, settings: &SandSettings) {
        let grains = seed_grains(settings.grain_count, settings.seed);
        self.count = grains.len() as u32;
        self.buffers = Self::create_buffers(device, &grains, self.buffer_usage);
        if let Some(compute) = &mut self.compute {
            compute.bind_groups =
                ComputeStep::bind(device, &compute.storage_layout, &compute.uniform_buffer, &self.buffers);
        }
        if let Some(cpu) = &mut self.cpu_grains {
            *cpu = PingPong::new(grains.clone(), grains);
        }
        log::info!("Reseeded {} grains", self.count);
    }

    /// Advance every grain one step and swap buffers.
    pub fn step(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        queue: &wgpu::Queue,
        params: &StepParams,
        has_surface: bool,
        settings: &SandSettings,
    ) {
        if let Some(compute) = &self.compute {
            let uniforms = params.uniforms(self.count, has_surface);
            queue.write_buffer(&compute.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Sand Step Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&compute.pipeline);
            pass.set_bind_group(0, &compute.bind_groups[self.buffers.read_index()], &[]);
            pass.set_bind_group(1, &compute.surface_bind_group, &[]);
            pass.dispatch_workgroups(workgroup_count(self.count), 1, 1);
        } else if let Some(cpu) = &mut self.cpu_grains {
            let surface = has_surface.then(|| surface_from_grains(cpu.read(), settings, CPU_SURFACE_RESOLUTION));
            cpu.apply(|read, write| step_all(read, write, params, surface.as_ref().map(|s| s as &dyn Surface)));
            queue.write_buffer(self.buffers.write(), 0, bytemuck::cast_slice(cpu.read()));
        } else {
            return;
        }
        self.buffers.swap();
    }

    /// Splat every grain into `target` as a `point_size` quad of `deposit`.
    pub fn draw_height(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        queue: &wgpu::Queue,
        target: &wgpu::TextureView,
        settings: &SandSettings,
    ) {
        let Some(height) = &self.height else {
            return;
        };
        let uniforms = HeightUniforms {
            target_size: [SURFACE_SIZE as f32; 2],
            point_size: settings.point_size,
            deposit: settings.deposit,
        };
        queue.write_buffer(&height.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
        self.draw_instances(encoder, "Sand Height Pass", height, target, wgpu::Color::TRANSPARENT);
    }

    /// Draw the grains through `camera`, coloured by layer and speed.
    pub fn draw_display(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        queue: &wgpu::Queue,
        target: &wgpu::TextureView,
        camera: &Camera,
        settings: &SandSettings,
        viewport: [f32; 2],
    ) {
        let Some(grains) = &self.grains else {
            return;
        };
        let uniforms = GrainUniforms {
            projection_view: camera.uniforms().projection_view,
            viewport,
            point_size: settings.point_size,
            _pad: 0.0,
        };
        queue.write_buffer(&grains.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
        let [r, g, b] = settings.background.map(f64::from);
        self.draw_instances(
            encoder,
            "Sand Grains Pass",
            grains,
            target,
            wgpu::Color { r, g, b, a: 1.0 },
        );
    }

    fn draw_instances(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        pass: &DrawPass,
        target: &wgpu::TextureView,
        clear: wgpu::Color,
    ) {
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_pipeline(&pass.pipeline);
        render_pass.set_bind_group(0, &pass.uniform_bind_group, &[]);
        render_pass.set_vertex_buffer(0, self.quad_vertex_buffer.slice(..));
        render_pass.set_vertex_buffer(1, self.buffers.read().slice(..));
        render_pass.draw(0..QUAD_VERTEX_COUNT, 0..self.count);
    }
}
