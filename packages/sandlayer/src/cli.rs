use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::gpu::context::{GpuContext, SurfaceContext};
use crate::settings::{DisplayMode, JsonFileStore, PhysicsMode, SandSettings, SettingsStore};
use crate::view::SandView;

/// Format of offline render targets. Linear, so PNGs store raw values.
const OFFLINE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render frames to disk
    Render {
        /// Output directory for frames
        #[arg(long)]
        out: PathBuf,

        /// Number of frames to render
        #[arg(long, default_value_t = 120)]
        frames: u32,

        /// Output width
        #[arg(long, default_value_t = 800)]
        width: u32,

        /// Output height
        #[arg(long, default_value_t = 600)]
        height: u32,

        /// Settings JSON file
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Seed for grain placement (overrides the settings file)
        #[arg(long)]
        seed: Option<u64>,

        /// Display mode: normals, height, shaded or grains (overrides the settings file)
        #[arg(long)]
        display: Option<DisplayMode>,

        /// Physics mode: reflect (3d) or damp (2d) (overrides the settings file)
        #[arg(long)]
        physics: Option<PhysicsMode>,

        /// Radius of the scripted pointer orbit, in normalised units (0 = no pointer)
        #[arg(long, default_value_t = 0.5)]
        pointer_orbit: f32,
    },
    /// Open an interactive window
    Run {
        /// Settings JSON file, loaded at start and written by `s`
        #[arg(long, default_value = "sandlayer.json")]
        settings: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { out, frames, width, height, settings, seed, display, physics, pointer_orbit } => {
            let mut settings = match settings {
                Some(path) => load_settings(&path)?,
                None => SandSettings::default(),
            };
            if seed.is_some() {
                settings.seed = seed;
            }
            if let Some(display) = display {
                settings.display = display;
            }
            if let Some(physics) = physics {
                settings.physics_mode = physics;
            }
            pollster::block_on(render_offline(out, frames, width, height, settings, pointer_orbit))?;
        }
        Commands::Run { settings } => run_window(settings)?,
    }
    Ok(())
}

fn load_settings(path: &Path) -> Result<SandSettings> {
    let store = JsonFileStore::new(path);
    let settings = store
        .load()
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    match settings {
        Some(settings) => {
            log::info!("Loaded settings from {}", path.display());
            Ok(settings)
        }
        None => {
            log::info!("No settings at {}, using defaults", path.display());
            Ok(SandSettings::default())
        }
    }
}

/// Pixel position of the scripted pointer at `frame`.
fn orbit_position(frame: u32, radius: f32, width: u32, height: u32) -> (f32, f32) {
    let angle = frame as f32 * 0.05;
    let x = 0.5 + 0.5 * radius * angle.cos();
    let y = 0.5 - 0.5 * radius * angle.sin();
    (x * width as f32, y * height as f32)
}

/// Bytes per row padded to wgpu's copy alignment.
fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded + (align - unpadded % align) % align
}

async fn render_offline(
    out_dir: PathBuf,
    frames: u32,
    width: u32,
    height: u32,
    settings: SandSettings,
    pointer_orbit: f32,
) -> Result<()> {
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let gpu = GpuContext::headless().await?;

    let texture_desc = wgpu::TextureDescriptor {
        label: Some("Target Texture"),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OFFLINE_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    };
    let texture = gpu.device.create_texture(&texture_desc);
    let texture_view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    let padded_bytes_per_row = padded_bytes_per_row(width);
    let output_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Output Buffer"),
        size: (padded_bytes_per_row * height) as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut view = SandView::new(gpu, OFFLINE_FORMAT, width, height, settings).await;

    println!("Rendering {} frames to {:?}...", frames, out_dir);

    for i in 0..frames {
        if pointer_orbit > 0.0 {
            let (x, y) = orbit_position(i, pointer_orbit, width, height);
            view.on_pointer_move(x, y);
        }
        view.update(crate::ticker::REFERENCE_FRAME);
        view.render(&texture_view);

        let mut encoder = view
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback Encoder") });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &output_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            texture_desc.size,
        );
        view.queue().submit(Some(encoder.finish()));

        let buffer_slice = output_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        view.device().poll(wgpu::Maintain::Wait);
        rx.recv()
            .context("Readback channel closed")?
            .context("Failed to map output buffer")?;

        let data = buffer_slice.get_mapped_range();
        let mut unpadded_data = Vec::with_capacity((width * height * 4) as usize);
        for row in 0..height {
            let start = (row * padded_bytes_per_row) as usize;
            let end = start + (width * 4) as usize;
            unpadded_data.extend_from_slice(&data[start..end]);
        }

        let frame_path = out_dir.join(format!("frame_{:05}.png", i));
        image::save_buffer(&frame_path, &unpadded_data, width, height, image::ColorType::Rgba8)
            .with_context(|| format!("Failed to write {}", frame_path.display()))?;

        drop(data);
        output_buffer.unmap();

        if i % 60 == 0 {
            print!(".");
            use std::io::Write;
            std::io::stdout().flush()?;
        }
    }
    println!("\nDone.");

    Ok(())
}

fn run_window(settings_path: PathBuf) -> Result<()> {
    use winit::event::{ElementState, Event, MouseButton, MouseScrollDelta, WindowEvent};
    use winit::event_loop::EventLoop;
    use winit::keyboard::{Key, NamedKey};
    use winit::window::WindowBuilder;

    let store = JsonFileStore::new(&settings_path);
    let settings = load_settings(&settings_path)?;

    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("sandlayer")
            .with_inner_size(winit::dpi::LogicalSize::new(800, 600))
            .build(&event_loop)?,
    );
    let size = window.inner_size();

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let surface = instance.create_surface(window.clone())?;
    let (gpu, mut context) = pollster::block_on(SurfaceContext::new(&instance, surface, size.width, size.height))?;
    let format = context.format();
    let mut view = pollster::block_on(SandView::new(gpu, format, size.width, size.height, settings));

    let mut cursor = (0.0_f32, 0.0_f32);
    let mut last_time = std::time::Instant::now();

    event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { event, window_id } if window_id == window.id() => match event {
            WindowEvent::CloseRequested => elwt.exit(),
            WindowEvent::Resized(size) => {
                context.resize(view.device(), size.width, size.height);
                view.resize(size.width, size.height);
            }
            WindowEvent::CursorMoved { position, .. } => {
                cursor = (position.x as f32, position.y as f32);
                view.on_pointer_move(cursor.0, cursor.1);
            }
            WindowEvent::MouseInput { state, button: MouseButton::Left, .. } => match state {
                ElementState::Pressed => view.on_pointer_down(cursor.0, cursor.1),
                ElementState::Released => {
                    view.on_pointer_up(cursor.0, cursor.1);
                }
            },
            WindowEvent::MouseWheel { delta, .. } => {
                // Browser convention: positive is away from the user.
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_, y) => -y * 100.0,
                    MouseScrollDelta::PixelDelta(pos) => -pos.y as f32,
                };
                view.on_wheel(scroll);
            }
            WindowEvent::KeyboardInput { event, is_synthetic: false, .. } => {
                if event.state != ElementState::Pressed {
                    return;
                }
                match event.logical_key.as_ref() {
                    Key::Named(NamedKey::Escape) => elwt.exit(),
                    Key::Character("d") | Key::Character("D") => {
                        view.cycle_display();
                    }
                    Key::Character("p") | Key::Character("P") => view.toggle_physics(),
                    Key::Character("r") | Key::Character("R") => view.reseed(),
                    Key::Character("s") | Key::Character("S") => {
                        if let Err(e) = store.save(view.settings()) {
                            log::error!("Failed to save settings: {}", e);
                        }
                    }
                    _ => {}
                }
            }
            WindowEvent::RedrawRequested => {
                let now = std::time::Instant::now();
                let dt = (now - last_time).as_secs_f64().min(0.1);
                last_time = now;
                view.update(dt);

                match context.surface.get_current_texture() {
                    Ok(frame) => {
                        let target = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
                        view.render(&target);
                        frame.present();
                    }
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => context.reconfigure(view.device()),
                    Err(wgpu::SurfaceError::OutOfMemory) => log::error!("Surface out of memory"),
                    Err(e) => log::warn!("Surface error: {:?}", e),
                }
            }
            _ => {}
        },
        Event::AboutToWait => window.request_redraw(),
        _ => {}
    })?;

    Ok(())
}
