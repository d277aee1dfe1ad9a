//! Frame orchestration for the sand layer.
//!
//! Per frame, in order: ticker, pointer tick, trackball, simulation step
//! (+ swap), height pass, blur H, blur V, normals, display. Everything is
//! recorded into one command encoder so each pass sees the previous one's
//! output.

use std::iter;

use glam::Mat4;

use crate::camera::{Camera, TrackballController};
use crate::gpu::context::GpuContext;
use crate::gpu::processing::SandProcessing;
use crate::gpu::sand_layer::SandLayer;
use crate::pointer::Pointer;
use crate::settings::{ControlMessage, DisplayMode, SandSettings, SettingsError};
use crate::simulation::StepParams;
use crate::ticker::Ticker;

/// Camera distance at which a 60° frustum exactly frames [-1, 1]².
pub const DEFAULT_CAMERA_DISTANCE: f32 = 1.732_050_8;

pub struct SandView {
    gpu: GpuContext,
    camera: Camera,
    trackball: TrackballController,
    pointer: Pointer,
    ticker: Ticker,
    settings: SandSettings,
    sand: SandLayer,
    processing: SandProcessing,
    width: u32,
    height: u32,
}

impl SandView {
    pub async fn new(
        gpu: GpuContext,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        settings: SandSettings,
    ) -> Self {
        let settings = settings.sanitize();
        let width = width.max(1);
        let height = height.max(1);

        let mut camera = Camera::default();
        camera.set_aspect(width as f32 / height as f32);
        let mut transform = Mat4::IDENTITY;
        let trackball = TrackballController::new(&mut transform, DEFAULT_CAMERA_DISTANCE).with_enabled(false);
        camera.transform = transform;

        let processing = SandProcessing::new(&gpu.device, format).await;
        let sand = SandLayer::new(&gpu, &settings, processing.surface_view(), format).await;

        log::info!(
            "Sand view ready: {} grains stepped on the {}, {}x{}, display {:?}",
            sand.count(),
            if sand.is_gpu_stepped() { "GPU" } else { "CPU" },
            width,
            height,
            settings.display
        );

        Self {
            gpu,
            camera,
            trackball,
            pointer: Pointer::new(width as f32, height as f32),
            ticker: Ticker::new(),
            settings,
            sand,
            processing,
            width,
            height,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.gpu.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.gpu.queue
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.width = width;
        self.height = height;
        self.camera.set_aspect(width as f32 / height as f32);
        self.pointer.resize(width as f32, height as f32);
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn trackball_mut(&mut self) -> &mut TrackballController {
        &mut self.trackball
    }

    pub fn pointer(&self) -> &Pointer {
        &self.pointer
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    pub fn grain_count(&self) -> u32 {
        self.sand.count()
    }

    pub fn sand(&self) -> &SandLayer {
        &self.sand
    }

    pub fn has_surface(&self) -> bool {
        self.processing.has_surface()
    }

    // Pointer coordinates are pixels relative to the surface's top-left.

    pub fn on_pointer_down(&mut self, x: f32, y: f32) {
        self.pointer.on_down(x, y);
    }

    pub fn on_pointer_move(&mut self, x: f32, y: f32) {
        self.pointer.on_move(x, y);
    }

    /// Returns true when the release was a click.
    pub fn on_pointer_up(&mut self, x: f32, y: f32) -> bool {
        self.pointer.on_up(x, y)
    }

    pub fn on_wheel(&mut self, delta_y: f32) {
        self.trackball.on_wheel(delta_y);
    }

    /// Advance input state by `dt` seconds.
    pub fn update(&mut self, dt: f64) {
        self.ticker.advance(dt);
        self.update_input();
    }

    /// Advance input state to an absolute timestamp in seconds.
    pub fn update_at(&mut self, now: f64) {
        self.ticker.tick(now);
        self.update_input();
    }

    fn update_input(&mut self) {
        self.pointer.tick();
        self.trackball.update(&mut self.camera.transform, &self.pointer);
    }

    /// Simulation inputs for the current pointer state and settings.
    pub fn step_params(&self) -> StepParams {
        StepParams::from_settings(
            &self.settings,
            self.pointer.normalized_centered_flipped_y(),
            self.pointer.velocity_normalized_flipped_y(),
        )
    }

    /// Step the simulation and draw one frame into `target`.
    pub fn render(&mut self, target: &wgpu::TextureView) {
        let params = self.step_params();
        let device = &self.gpu.device;
        let queue = &self.gpu.queue;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Sand Frame Encoder"),
        });

        self.sand.step(
            &mut encoder,
            queue,
            &params,
            self.processing.has_surface(),
            &self.settings,
        );
        self.sand
            .draw_height(&mut encoder, queue, self.processing.height_view(), &self.settings);
        self.processing.process(&mut encoder, queue, &self.settings);

        match self.settings.display {
            DisplayMode::Grains => self.sand.draw_display(
                &mut encoder,
                queue,
                target,
                &self.camera,
                &self.settings,
                [self.width as f32, self.height as f32],
            ),
            _ => self.processing.display(&mut encoder, queue, target, &self.settings),
        }

        queue.submit(iter::once(encoder.finish()));
    }

    pub fn settings(&self) -> &SandSettings {
        &self.settings
    }

    /// Replace the settings. A changed grain count or seed reseeds.
    pub fn set_settings(&mut self, settings: SandSettings) {
        let settings = settings.sanitize();
        let reseed = settings.grain_count != self.settings.grain_count || settings.seed != self.settings.seed;
        self.settings = settings;
        if reseed {
            self.reseed();
        }
    }

    /// Apply a remote edit. Grain count edits wait for the next reseed.
    pub fn apply_message(&mut self, message: &ControlMessage) -> Result<(), SettingsError> {
        self.settings.apply(message)?;
        log::info!("Applied remote setting '{}'", message.uid);
        Ok(())
    }

    pub fn reseed(&mut self) {
        self.sand.reseed(&self.gpu.device, &self.settings);
    }

    pub fn cycle_display(&mut self) -> DisplayMode {
        self.settings.display = self.settings.display.next();
        log::info!("Display mode: {:?}", self.settings.display);
        self.settings.display
    }

    pub fn toggle_physics(&mut self) {
        self.settings.physics_mode = self.settings.physics_mode.toggled();
        log::info!("Physics mode: {:?}", self.settings.physics_mode);
    }
}
