use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{HtmlCanvasElement, MessageEvent, WebSocket};

use crate::gpu::context::{forces_webgl2, GpuContext, SurfaceContext};
use crate::settings::{ControlMessage, SandSettings, SettingsError, SettingsStore};
use crate::view::SandView;

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn window() -> Result<web_sys::Window, JsValue> {
    web_sys::window().ok_or_else(|| JsValue::from_str("no global window"))
}

/// Settings persisted in `window.location.hash` as `#gui={...}`.
pub struct UrlHashStore;

impl UrlHashStore {
    fn location() -> Result<web_sys::Location, SettingsError> {
        web_sys::window()
            .map(|w| w.location())
            .ok_or_else(|| SettingsError::Unavailable("no global window".into()))
    }
}

impl SettingsStore for UrlHashStore {
    fn load(&self) -> Result<Option<SandSettings>, SettingsError> {
        let hash = Self::location()?
            .hash()
            .map_err(|e| SettingsError::Unavailable(format!("{:?}", e)))?;
        SandSettings::from_url_hash(&hash).transpose()
    }

    fn save(&self, settings: &SandSettings) -> Result<(), SettingsError> {
        let location = Self::location()?;
        let current = location
            .hash()
            .map_err(|e| SettingsError::Unavailable(format!("{:?}", e)))?;
        let hash = settings.splice_url_hash(&current)?;
        location
            .set_hash(&hash)
            .map_err(|e| SettingsError::Unavailable(format!("{:?}", e)))?;
        log::info!("Saved settings to the URL hash");
        Ok(())
    }
}

#[wasm_bindgen]
pub struct WasmSandView {
    inner: Rc<RefCell<SandContext>>,
    frame_loop: Rc<RefCell<FrameLoop>>,
}

struct SandContext {
    view: SandView,
    surface: SurfaceContext,
    /// Raw control messages received since the last frame.
    remote: Rc<RefCell<VecDeque<String>>>,
    socket: Option<RemoteSocket>,
}

/// A control socket and the `onmessage` handler it calls into.
struct RemoteSocket {
    socket: WebSocket,
    _on_message: Closure<dyn FnMut(MessageEvent)>,
}

impl Drop for RemoteSocket {
    fn drop(&mut self) {
        self.socket.set_onmessage(None);
        if let Err(e) = self.socket.close() {
            log::warn!("Failed to close remote socket: {:?}", e);
        }
    }
}

#[derive(Default)]
struct FrameLoop {
    handle: Option<i32>,
    callback: Option<Closure<dyn FnMut(f64)>>,
}

impl SandContext {
    fn apply_remote(&mut self) {
        let messages: Vec<String> = self.remote.borrow_mut().drain(..).collect();
        for text in messages {
            if let Err(e) = ControlMessage::parse(&text).and_then(|message| self.view.apply_message(&message)) {
                log::warn!("Ignoring remote message {:?}: {}", text, e);
            }
        }
    }

    fn present(&mut self) {
        match self.surface.surface.get_current_texture() {
            Ok(output) => {
                let target = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
                self.view.render(&target);
                output.present();
            }
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.reconfigure(self.view.device());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                log::error!("Surface out of memory");
            }
            Err(e) => {
                log::warn!("Surface error: {:?}", e);
            }
        }
    }

    /// One animation frame at `now` seconds.
    fn frame(&mut self, now: f64) {
        self.apply_remote();
        self.view.update_at(now);
        self.present();
    }
}

#[wasm_bindgen]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
    let _ = console_log::init_with_level(log::Level::Info);
}

#[wasm_bindgen]
impl WasmSandView {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<WasmSandView, JsValue> {
        Err(JsValue::from_str("Use the create_sand_view async constructor"))
    }

    pub fn resize(&self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        let ctx = &mut *inner;
        ctx.view.resize(width, height);
        ctx.surface.resize(ctx.view.device(), width, height);
    }

    pub fn pointer_down(&self, x: f32, y: f32) {
        self.inner.borrow_mut().view.on_pointer_down(x, y);
    }

    pub fn pointer_move(&self, x: f32, y: f32) {
        self.inner.borrow_mut().view.on_pointer_move(x, y);
    }

    /// Returns true when the release was a click.
    pub fn pointer_up(&self, x: f32, y: f32) -> bool {
        self.inner.borrow_mut().view.on_pointer_up(x, y)
    }

    pub fn wheel(&self, delta_y: f32) {
        self.inner.borrow_mut().view.on_wheel(delta_y);
    }

    /// Step and draw one frame, for callers driving their own loop.
    pub fn render(&self, dt: f64) {
        let mut inner = self.inner.borrow_mut();
        inner.apply_remote();
        inner.view.update(dt);
        inner.present();
    }

    /// Drive rendering from `requestAnimationFrame` until `stop`.
    pub fn start(&self) -> Result<(), JsValue> {
        if self.frame_loop.borrow().handle.is_some() {
            return Ok(());
        }

        let inner = self.inner.clone();
        let frame_loop = self.frame_loop.clone();
        let callback = Closure::wrap(Box::new(move |timestamp: f64| {
            inner.borrow_mut().frame(timestamp / 1000.0);

            let mut state = frame_loop.borrow_mut();
            let Some(callback) = &state.callback else {
                return;
            };
            let scheduled = window().and_then(|w| w.request_animation_frame(callback.as_ref().unchecked_ref()));
            match scheduled {
                Ok(handle) => state.handle = Some(handle),
                Err(e) => {
                    log::error!("Failed to schedule animation frame: {:?}", e);
                    state.handle = None;
                }
            }
        }) as Box<dyn FnMut(f64)>);

        let handle = window()?.request_animation_frame(callback.as_ref().unchecked_ref())?;
        let mut state = self.frame_loop.borrow_mut();
        state.handle = Some(handle);
        state.callback = Some(callback);
        Ok(())
    }

    pub fn stop(&self) -> Result<(), JsValue> {
        let mut state = self.frame_loop.borrow_mut();
        if let Some(handle) = state.handle.take() {
            window()?.cancel_animation_frame(handle)?;
        }
        state.callback = None;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.frame_loop.borrow().handle.is_some()
    }

    pub fn reseed(&self) {
        self.inner.borrow_mut().view.reseed();
    }

    /// Cycle the display mode; returns the new mode's name.
    pub fn cycle_display(&self) -> String {
        format!("{:?}", self.inner.borrow_mut().view.cycle_display())
    }

    pub fn toggle_physics(&self) {
        self.inner.borrow_mut().view.toggle_physics();
    }

    pub fn grain_count(&self) -> u32 {
        self.inner.borrow().view.grain_count()
    }

    pub fn settings_json(&self) -> Result<String, JsValue> {
        self.inner.borrow().view.settings().to_json().map_err(js_error)
    }

    pub fn set_settings_json(&self, json: &str) -> Result<(), JsValue> {
        let settings = SandSettings::from_json(json).map_err(js_error)?;
        self.inner.borrow_mut().view.set_settings(settings);
        Ok(())
    }

    /// Apply one `{"uid": ..., "value": ...}` edit immediately.
    pub fn apply_message(&self, json: &str) -> Result<(), JsValue> {
        let message = ControlMessage::parse(json).map_err(js_error)?;
        self.inner.borrow_mut().view.apply_message(&message).map_err(js_error)
    }

    /// Write the current settings into the URL hash.
    pub fn save_settings(&self) -> Result<(), JsValue> {
        UrlHashStore.save(self.inner.borrow().view.settings()).map_err(js_error)
    }

    /// Listen for control messages on a WebSocket. They are applied at the
    /// start of the next frame.
    pub fn connect_remote(&self, url: &str) -> Result<(), JsValue> {
        let socket = WebSocket::new(url)?;
        let queue = self.inner.borrow().remote.clone();
        let on_message = Closure::wrap(Box::new(move |event: MessageEvent| {
            if let Some(text) = event.data().as_string() {
                queue.borrow_mut().push_back(text);
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        socket.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

        log::info!("Listening for remote settings on {}", url);
        // Dropping the previous socket detaches its handler and closes it.
        self.inner.borrow_mut().socket = Some(RemoteSocket {
            socket,
            _on_message: on_message,
        });
        Ok(())
    }
}

/// WebGPU when the browser has it, otherwise WebGL2 (CPU-stepped grains).
/// `?forcewebgl2` in the page URL skips WebGPU.
async fn create_context(canvas: &HtmlCanvasElement) -> Result<(GpuContext, SurfaceContext), JsValue> {
    let width = canvas.width();
    let height = canvas.height();

    let search = window()?.location().search().unwrap_or_default();
    if forces_webgl2(&search) {
        log::info!("WebGL2 forced by the page URL");
        return create_webgl2_context(canvas, width, height).await;
    }

    let webgpu = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::BROWSER_WEBGPU,
        ..Default::default()
    });
    let adapter = webgpu
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::None,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await;
    if let Some(adapter) = adapter {
        let surface = webgpu
            .create_surface(wgpu::SurfaceTarget::Canvas(canvas.clone()))
            .map_err(js_error)?;
        return SurfaceContext::with_adapter(&adapter, surface, width, height)
            .await
            .map_err(js_error);
    }

    log::info!("WebGPU unavailable, falling back to WebGL2");
    create_webgl2_context(canvas, width, height).await
}

async fn create_webgl2_context(
    canvas: &HtmlCanvasElement,
    width: u32,
    height: u32,
) -> Result<(GpuContext, SurfaceContext), JsValue> {
    let gl = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::GL,
        ..Default::default()
    });
    let surface = gl
        .create_surface(wgpu::SurfaceTarget::Canvas(canvas.clone()))
        .map_err(js_error)?;
    SurfaceContext::new(&gl, surface, width, height).await.map_err(js_error)
}

#[wasm_bindgen]
pub async fn create_sand_view(canvas: HtmlCanvasElement) -> Result<WasmSandView, JsValue> {
    init_panic_hook();

    let settings = match UrlHashStore.load() {
        Ok(Some(settings)) => {
            log::info!("Loaded settings from the URL hash");
            settings
        }
        Ok(None) => SandSettings::default(),
        Err(e) => {
            log::warn!("Ignoring settings in the URL hash: {}", e);
            SandSettings::default()
        }
    };

    let (gpu, surface) = create_context(&canvas).await?;
    let view = SandView::new(gpu, surface.format(), canvas.width(), canvas.height(), settings).await;

    Ok(WasmSandView {
        inner: Rc::new(RefCell::new(SandContext {
            view,
            surface,
            remote: Rc::new(RefCell::new(VecDeque::new())),
            socket: None,
        })),
        frame_loop: Rc::new(RefCell::new(FrameLoop::default())),
    })
}
