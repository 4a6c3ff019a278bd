//! Compositing subsystem.
//!
//! [`Compositor`] walks the latest layer-table snapshot each frame and turns
//! it into backend calls; every GPU operation goes through the
//! [`RenderBackend`] seam so the control logic is portable across graphics
//! APIs and testable with a recording fake. [`WgpuBackend`] is the
//! production implementation.

mod backend;
mod compositor;
mod texture_cache;
mod wgpu_backend;

pub use backend::{FrameParams, LayerUniforms, RenderBackend, TextureId, TextureParams};
pub use compositor::{Compositor, CompositorConfig, CompositorHandle};
pub use texture_cache::TextureCache;
pub use wgpu_backend::WgpuBackend;
