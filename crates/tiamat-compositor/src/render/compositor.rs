use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use super::backend::{FrameParams, LayerUniforms, RenderBackend};
use super::texture_cache::TextureCache;
use crate::coords::{fit_projection, Mat4, Viewport};
use crate::layer::{Blending, LayerDescriptor, LayerTable};

/// Compositor configuration.
#[derive(Debug, Clone)]
pub struct CompositorConfig {
    /// Nominal design resolution the layer stack is authored against.
    pub nominal_size: (u32, u32),
    /// Persistent clear color, used whenever no one-shot override is
    /// pending.
    pub clear_color: [f32; 4],
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            nominal_size: (360, 180),
            clear_color: [0.0, 1.0, 0.0, 0.0],
        }
    }
}

/// Cross-thread control surface for a [`Compositor`].
///
/// Cheap to clone. All methods may be called from any thread and never wait
/// on a frame in flight.
#[derive(Clone)]
pub struct CompositorHandle {
    table: LayerTable,
    clear_override: Arc<Mutex<Option<[f32; 4]>>>,
}

impl CompositorHandle {
    /// Publishes a new layer stack, replacing the previous one wholesale.
    /// The next frame to start picks it up in full.
    pub fn replace_layers(&self, layers: Vec<LayerDescriptor>) {
        self.table.replace(layers);
    }

    /// Queues a one-shot clear color override for the next frame only;
    /// frames after that revert to the configured clear color.
    pub fn set_clear_color(&self, rgba: [f32; 4]) {
        *self.clear_override.lock() = Some(rgba);
    }
}

/// The per-frame render routine.
///
/// Owns the texture cache and the shared frame state (model and projection
/// matrices). Runs on the render thread; everything it does to the GPU goes
/// through a [`RenderBackend`].
pub struct Compositor {
    config: CompositorConfig,
    table: LayerTable,
    cache: TextureCache,
    clear_override: Arc<Mutex<Option<[f32; 4]>>>,
    viewport: Viewport,
    projection: Mat4,
    model: Mat4,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        let (nw, nh) = config.nominal_size;
        // Design units map to pixels at a fixed scale; the unit quad spans
        // 2×1 design units, so scaling by the nominal height fills the
        // nominal rectangle exactly.
        let model = Mat4::scale_uniform(nh.max(1) as f32);
        Self {
            table: LayerTable::new(),
            cache: TextureCache::new(),
            clear_override: Arc::new(Mutex::new(None)),
            viewport: Viewport::new(0.0, 0.0, nw.max(1) as f32, nh.max(1) as f32),
            projection: fit_projection(config.nominal_size, config.nominal_size),
            model,
            config,
        }
    }

    /// Returns a clonable handle for control threads.
    pub fn handle(&self) -> CompositorHandle {
        CompositorHandle {
            table: self.table.clone(),
            clear_override: Arc::clone(&self.clear_override),
        }
    }

    /// Resize callback: records the drawable viewport rectangle and
    /// recomputes the fit projection. Called on resize events, not per
    /// frame.
    pub fn resize(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.viewport = Viewport::new(x as f32, y as f32, width as f32, height as f32);
        self.projection = fit_projection(self.config.nominal_size, (width, height));
    }

    /// Renders one frame from the latest table snapshot.
    ///
    /// Hidden layers cost no GPU calls. A layer that fails to process is
    /// logged and skipped; it never aborts the frame or affects its
    /// neighbours. Frame-level backend failures propagate to the caller.
    pub fn compose<B: RenderBackend>(&mut self, backend: &mut B) -> Result<()> {
        let clear_color = self
            .clear_override
            .lock()
            .take()
            .unwrap_or(self.config.clear_color);

        backend.begin_frame(&FrameParams {
            clear_color,
            viewport: self.viewport,
            model: self.model,
            projection: self.projection,
        })?;

        let layers = self.table.snapshot();
        for (index, layer) in layers.iter().enumerate() {
            if !layer.visible {
                continue;
            }
            if let Err(err) = self.draw_layer(backend, layer) {
                log::warn!(
                    "skipping layer {index} ('{}'): {err:#}",
                    layer.texture.name()
                );
            }
        }

        backend.set_blend(Blending::None);
        backend.end_frame()
    }

    fn draw_layer<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        layer: &LayerDescriptor,
    ) -> Result<()> {
        let texture = self.cache.resolve(backend, layer)?;

        backend.set_blend(layer.blending);
        backend.set_color_mask(layer.color_mask);
        backend.draw_quad(
            texture,
            &LayerUniforms {
                view: layer_view(layer.position),
                tex_angle: layer.tex_angle,
                tex_size: layer.size,
                tex_offset: layer.tex_offset,
                min_color: layer.min_color,
                max_color: layer.max_color,
            },
        )
    }
}

/// Per-layer view matrix: design-space translation over a Y-negating basis.
///
/// `view_angle` is deliberately not applied here; the field is carried but
/// has no effect on the transform.
fn layer_view(position: [f32; 2]) -> Mat4 {
    let [x, y] = position;
    Mat4([
        1.0, 0.0, 0.0, 0.0, //
        0.0, -1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        x, y, 0.0, 1.0,
    ])
}
