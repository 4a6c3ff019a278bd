use anyhow::Result;

use crate::coords::{Mat4, Viewport};
use crate::layer::{Blending, Interpolation, LayerDescriptor};

/// Opaque, backend-issued texture handle.
///
/// Stable for the backend's lifetime; only the texture's contents (and
/// wrap/filter configuration) may change behind it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) u64);

/// Wrap/filter/border configuration applied at texture upload.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TextureParams {
    /// Repeat wrap on both axes when true, clamp-to-border when false.
    pub periodic: bool,
    pub interpolation: Interpolation,
    /// Border color sampled outside `[0, 1]` when not periodic.
    pub border_color: [f32; 4],
}

impl TextureParams {
    /// Derives upload parameters from a layer: wrap from `periodic`, filter
    /// from `interpolation`, border color from the blend mode.
    pub fn for_layer(layer: &LayerDescriptor) -> Self {
        Self {
            periodic: layer.periodic,
            interpolation: layer.interpolation,
            border_color: layer.blending.border_color(),
        }
    }
}

/// Shared state bound once at the start of a frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FrameParams {
    pub clear_color: [f32; 4],
    pub viewport: Viewport,
    /// Fixed design-space-to-pixel scale transform.
    pub model: Mat4,
    /// Aspect-preserving fit projection (see [`crate::coords::fit_projection`]).
    pub projection: Mat4,
}

/// Per-layer shader inputs for one quad draw.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LayerUniforms {
    /// Per-layer view matrix (translation only).
    pub view: Mat4,
    pub tex_angle: f32,
    /// Advisory on-screen extent; forwarded, never scales geometry.
    pub tex_size: [f32; 2],
    pub tex_offset: [f32; 2],
    pub min_color: [f32; 4],
    pub max_color: [f32; 4],
}

/// The GPU capability surface the compositor draws through.
///
/// One implementation records into wgpu ([`super::WgpuBackend`]); tests use
/// a call-recording fake. All methods are called from the render thread
/// only.
pub trait RenderBackend {
    /// Allocates a texture object. The returned handle stays valid until the
    /// backend is dropped; allocation failure is fatal and not retried.
    fn create_texture(&mut self, size: (u32, u32)) -> Result<TextureId>;

    /// Uploads `pixels` (8-bit RGBA, row-major) and (re)applies `params` to
    /// an existing texture. Dynamic layers hit this every frame; the handle
    /// never changes.
    fn upload_texture(
        &mut self,
        id: TextureId,
        pixels: &[u8],
        size: (u32, u32),
        params: &TextureParams,
    ) -> Result<()>;

    /// Starts a frame: binds the shared state and clears the color buffer
    /// with a full write mask.
    fn begin_frame(&mut self, params: &FrameParams) -> Result<()>;

    /// Selects the blend function pair for subsequent draws.
    fn set_blend(&mut self, blending: Blending);

    /// Selects the per-channel color write mask for subsequent draws.
    fn set_color_mask(&mut self, mask: [bool; 4]);

    /// Draws one indexed unit quad with the given texture and per-layer
    /// inputs, under the current blend/mask state.
    fn draw_quad(&mut self, texture: TextureId, uniforms: &LayerUniforms) -> Result<()>;

    /// Ends the frame. The compositor resets the blend state to
    /// opaque-overwrite before calling this.
    fn end_frame(&mut self) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording backend for compositor and cache tests.

    use super::*;
    use anyhow::bail;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        CreateTexture { size: (u32, u32), id: TextureId },
        UploadTexture { id: TextureId, size: (u32, u32), params: TextureParams, pixel_len: usize },
        BeginFrame { params: FrameParams },
        SetBlend(Blending),
        SetColorMask([bool; 4]),
        DrawQuad { texture: TextureId, uniforms: LayerUniforms },
        EndFrame,
    }

    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub calls: Vec<Call>,
        next_id: u64,
        /// When set, `draw_quad` for this texture fails (simulated GPU error).
        pub fail_draw_for: Option<TextureId>,
    }

    impl FakeBackend {
        pub fn upload_count(&self) -> usize {
            self.calls
                .iter()
                .filter(|c| matches!(c, Call::UploadTexture { .. }))
                .count()
        }

        pub fn drawn_textures(&self) -> Vec<TextureId> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::DrawQuad { texture, .. } => Some(*texture),
                    _ => None,
                })
                .collect()
        }
    }

    impl RenderBackend for FakeBackend {
        fn create_texture(&mut self, size: (u32, u32)) -> Result<TextureId> {
            let id = TextureId(self.next_id);
            self.next_id += 1;
            self.calls.push(Call::CreateTexture { size, id });
            Ok(id)
        }

        fn upload_texture(
            &mut self,
            id: TextureId,
            pixels: &[u8],
            size: (u32, u32),
            params: &TextureParams,
        ) -> Result<()> {
            self.calls.push(Call::UploadTexture {
                id,
                size,
                params: *params,
                pixel_len: pixels.len(),
            });
            Ok(())
        }

        fn begin_frame(&mut self, params: &FrameParams) -> Result<()> {
            self.calls.push(Call::BeginFrame { params: *params });
            Ok(())
        }

        fn set_blend(&mut self, blending: Blending) {
            self.calls.push(Call::SetBlend(blending));
        }

        fn set_color_mask(&mut self, mask: [bool; 4]) {
            self.calls.push(Call::SetColorMask(mask));
        }

        fn draw_quad(&mut self, texture: TextureId, uniforms: &LayerUniforms) -> Result<()> {
            if self.fail_draw_for == Some(texture) {
                bail!("simulated draw failure for {texture:?}");
            }
            self.calls.push(Call::DrawQuad { texture, uniforms: *uniforms });
            Ok(())
        }

        fn end_frame(&mut self) -> Result<()> {
            self.calls.push(Call::EndFrame);
            Ok(())
        }
    }
}
