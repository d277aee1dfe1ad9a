//! Device creation, headless or surface-backed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no suitable graphics adapter found")]
    NoAdapter,
    #[error("failed to create device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("surface is not supported by adapter '{0}'")]
    UnsupportedSurface(String),
}

/// Whether the adapter can run compute passes. WebGL2 cannot.
pub fn supports_compute(adapter: &wgpu::Adapter) -> bool {
    adapter
        .get_downlevel_capabilities()
        .flags
        .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
}

/// Whether a page query string such as `?view=2&forcewebgl2` asks to skip WebGPU.
pub fn forces_webgl2(query: &str) -> bool {
    query
        .trim_start_matches('?')
        .split('&')
        .any(|pair| pair.split('=').next() == Some("forcewebgl2"))
}

/// A device, its queue and what the adapter can do.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub info: wgpu::AdapterInfo,
    /// False when the simulation has to step on the CPU.
    pub compute: bool,
}

impl GpuContext {
    /// Device without a surface, for offline rendering and tests.
    pub async fn headless() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;
        Self::from_adapter(&adapter).await
    }

    pub async fn from_adapter(adapter: &wgpu::Adapter) -> Result<Self, GpuError> {
        let info = adapter.get_info();
        let compute = supports_compute(adapter);
        let base = if compute {
            wgpu::Limits::downlevel_defaults()
        } else {
            wgpu::Limits::downlevel_webgl2_defaults()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Sand Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: base.using_resolution(adapter.limits()),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        log::info!(
            "Using adapter '{}' ({:?}), compute shaders: {}",
            info.name,
            info.backend,
            if compute { "yes" } else { "no, simulating on the CPU" }
        );

        Ok(Self {
            device,
            queue,
            info,
            compute,
        })
    }
}

/// A configured presentation surface. The device it was configured with is
/// handed back separately so the view can own it.
pub struct SurfaceContext {
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
}

impl SurfaceContext {
    /// Pick an adapter for `surface` from `instance`.
    pub async fn new(
        instance: &wgpu::Instance,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
    ) -> Result<(GpuContext, Self), GpuError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::None,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;
        Self::with_adapter(&adapter, surface, width, height).await
    }

    pub async fn with_adapter(
        adapter: &wgpu::Adapter,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
    ) -> Result<(GpuContext, Self), GpuError> {
        let gpu = GpuContext::from_adapter(adapter).await?;

        let caps = surface.get_capabilities(adapter);
        // Colours are written as data (normals, heights), so skip sRGB encoding.
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| GpuError::UnsupportedSurface(gpu.info.name.clone()))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: caps.present_modes.first().copied().unwrap_or(wgpu::PresentMode::Fifo),
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &config);

        Ok((gpu, Self { surface, config }))
    }

    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.reconfigure(device);
    }

    pub fn reconfigure(&self, device: &wgpu::Device) {
        self.surface.configure(device, &self.config);
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forces_webgl2_token() {
        assert!(forces_webgl2("?forcewebgl2"));
        assert!(forces_webgl2("?view=2&forcewebgl2=1"));
        assert!(!forces_webgl2(""));
        assert!(!forces_webgl2("?forcewebgl2x"));
        assert!(!forces_webgl2("?mode=forcewebgl2"));
    }
}
