//! Demo viewer: hosts the tiamat compositor in a winit window.
//!
//! A control thread publishes an animated layer stack (a tiled backdrop, a
//! dynamic plasma layer re-uploaded every tick, and an alpha vignette mask)
//! while the event loop renders one frame per redraw. Exercises every
//! cross-thread entry point: wholesale table replacement and the one-shot
//! clear override.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use tiamat_compositor::device::{Gpu, GpuInit, SurfaceErrorAction};
use tiamat_compositor::layer::{Blending, Interpolation, LayerDescriptor, TextureKey};
use tiamat_compositor::logging::{init_logging, LoggingConfig};
use tiamat_compositor::render::{Compositor, CompositorConfig, CompositorHandle, WgpuBackend};

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
    let mut app = ViewerApp::new();
    event_loop
        .run_app(&mut app)
        .context("winit event loop terminated with error")?;
    Ok(())
}

#[self_referencing]
struct WindowEntry {
    window: Window,

    #[borrows(window)]
    #[covariant]
    gpu: Gpu<'this>,
}

struct ViewerApp {
    entry: Option<WindowEntry>,
    backend: Option<WgpuBackend>,
    compositor: Compositor,
    control_started: bool,
}

impl ViewerApp {
    fn new() -> Self {
        Self {
            entry: None,
            backend: None,
            compositor: Compositor::new(CompositorConfig {
                clear_color: [0.02, 0.02, 0.05, 1.0],
                ..CompositorConfig::default()
            }),
            control_started: false,
        }
    }

    fn render_frame(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(entry), Some(backend)) = (self.entry.as_mut(), self.backend.as_mut()) else {
            return;
        };

        match entry.with_gpu(|gpu| gpu.begin_frame()) {
            Ok(mut frame) => {
                if let Err(err) = self.compositor.compose(backend) {
                    log::error!("frame aborted: {err:#}");
                    return;
                }
                if let Err(err) = backend.flush(&mut frame.encoder, &frame.view) {
                    log::error!("flush failed: {err:#}");
                    return;
                }
                entry.with_gpu(|gpu| gpu.submit(frame));
            }
            Err(err) => match entry.with_gpu_mut(|gpu| gpu.handle_surface_error(err)) {
                SurfaceErrorAction::Fatal => {
                    log::error!("surface lost irrecoverably; exiting");
                    event_loop.exit();
                }
                SurfaceErrorAction::Reconfigured | SurfaceErrorAction::SkipFrame => {}
            },
        }
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.entry.is_some() {
            return;
        }

        let attrs = Window::default_attributes()
            .with_title("tiamat viewer")
            .with_inner_size(LogicalSize::new(720.0, 360.0));

        let window = match event_loop.create_window(attrs) {
            Ok(window) => window,
            Err(err) => {
                log::error!("failed to create window: {err}");
                event_loop.exit();
                return;
            }
        };

        let entry = WindowEntryBuilder {
            window,
            gpu_builder: |w| {
                pollster::block_on(Gpu::new(w, GpuInit::default()))
                    .expect("GPU initialization failed")
            },
        }
        .build();

        let (format, size) = entry.with_gpu(|gpu| (gpu.surface_format(), gpu.size()));
        let (device, queue) = entry.with_gpu(|gpu| (gpu.device().clone(), gpu.queue().clone()));

        self.backend = Some(WgpuBackend::new(device, queue, format));
        self.compositor.resize(0, 0, size.width, size.height);

        if !self.control_started {
            spawn_control_thread(self.compositor.handle());
            self.control_started = true;
        }

        entry.with_window(|w| w.request_redraw());
        self.entry = Some(entry);
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Wait);

        // Continuous redraw: the control thread publishes ~60 tables/s.
        if let Some(entry) = &self.entry {
            entry.with_window(|w| w.request_redraw());
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),

            WindowEvent::Resized(new_size) => {
                if let Some(entry) = self.entry.as_mut() {
                    entry.with_gpu_mut(|gpu| gpu.resize(new_size));
                    self.compositor.resize(0, 0, new_size.width, new_size.height);
                    entry.with_window(|w| w.request_redraw());
                }
            }

            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(entry) = self.entry.as_mut() {
                    let new_size = entry.with_window(|w| w.inner_size());
                    entry.with_gpu_mut(|gpu| gpu.resize(new_size));
                    self.compositor.resize(0, 0, new_size.width, new_size.height);
                }
            }

            WindowEvent::RedrawRequested => self.render_frame(event_loop),

            _ => {}
        }
    }
}

// ── control thread ────────────────────────────────────────────────────────

const PLASMA_SIZE: (u32, u32) = (96, 48);
const CHECKER_SIZE: (u32, u32) = (16, 16);
const VIGNETTE_SIZE: (u32, u32) = (64, 32);

fn spawn_control_thread(handle: CompositorHandle) {
    thread::spawn(move || {
        // One-shot override: the very first frame clears to deep purple,
        // frames after it revert to the configured clear color.
        handle.set_clear_color([0.1, 0.0, 0.15, 1.0]);

        let checker = checkerboard_pixels(CHECKER_SIZE);
        let vignette = vignette_pixels(VIGNETTE_SIZE);
        let started = Instant::now();

        loop {
            let t = started.elapsed().as_secs_f32();
            handle.replace_layers(build_stack(t, checker.clone(), vignette.clone()));
            thread::sleep(Duration::from_millis(16));
        }
    });
}

fn build_stack(t: f32, checker: Vec<u8>, vignette: Vec<u8>) -> Vec<LayerDescriptor> {
    // Tiled backdrop: the checker repeats across the quad and drifts via
    // tex_offset; no re-upload needed.
    let mut backdrop = LayerDescriptor::new(TextureKey::new("checker"), checker, CHECKER_SIZE);
    backdrop.periodic = true;
    backdrop.blending = Blending::None;
    backdrop.interpolation = Interpolation::Nearest;
    backdrop.tex_offset = [t * 0.05, t * 0.02];
    backdrop.size = [360.0, 180.0];
    backdrop.min_color = [0.0, 0.0, 0.1, 0.0];
    backdrop.max_color = [0.45, 0.5, 0.7, 1.0];

    // Animated plasma: the `~` sigil marks the texture dynamic, so the cache
    // re-uploads these pixels every frame against a stable handle.
    let mut plasma = LayerDescriptor::new(
        TextureKey::parse("~plasma"),
        plasma_pixels(PLASMA_SIZE, t),
        PLASMA_SIZE,
    );
    plasma.blending = Blending::Source;
    plasma.tex_angle = t * 0.1;
    plasma.size = [360.0, 180.0];

    // Vignette mask: writes only destination alpha, darkening the frame
    // edges for whatever was composited below.
    let mut mask = LayerDescriptor::new(TextureKey::new("vignette"), vignette, VIGNETTE_SIZE);
    mask.blending = Blending::None;
    mask.color_mask = [false, false, false, true];
    mask.size = [360.0, 180.0];

    // A hidden layer stays in the table but must cost nothing to render.
    let mut hidden = LayerDescriptor::new(TextureKey::new("unused"), vec![0u8; 4], (1, 1));
    hidden.visible = false;

    vec![backdrop, plasma, mask, hidden]
}

// ── pixel generators ──────────────────────────────────────────────────────

fn checkerboard_pixels((w, h): (u32, u32)) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((w * h * 4) as usize);
    for y in 0..h {
        for x in 0..w {
            let light = (x / 4 + y / 4) % 2 == 0;
            let v = if light { 220 } else { 90 };
            pixels.extend_from_slice(&[v, v, v, 255]);
        }
    }
    pixels
}

fn plasma_pixels((w, h): (u32, u32), t: f32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((w * h * 4) as usize);
    for y in 0..h {
        for x in 0..w {
            let fx = x as f32 / w as f32;
            let fy = y as f32 / h as f32;
            let v = ((fx * 10.0 + t).sin() + (fy * 8.0 - t * 1.3).cos()
                + ((fx + fy) * 12.0 + t * 0.7).sin())
                / 3.0;
            let r = ((v * 3.0).sin() * 0.5 + 0.5) * 255.0;
            let g = ((v * 3.0 + 2.0).sin() * 0.5 + 0.5) * 255.0;
            let b = ((v * 3.0 + 4.0).sin() * 0.5 + 0.5) * 255.0;
            let a = (v.abs() * 255.0).min(255.0);
            pixels.extend_from_slice(&[r as u8, g as u8, b as u8, a as u8]);
        }
    }
    pixels
}

fn vignette_pixels((w, h): (u32, u32)) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((w * h * 4) as usize);
    for y in 0..h {
        for x in 0..w {
            let dx = x as f32 / w as f32 - 0.5;
            let dy = y as f32 / h as f32 - 0.5;
            let d = (dx * dx + dy * dy).sqrt();
            let a = ((1.2 - d * 1.8).clamp(0.0, 1.0) * 255.0) as u8;
            pixels.extend_from_slice(&[0, 0, 0, a]);
        }
    }
    pixels
}
