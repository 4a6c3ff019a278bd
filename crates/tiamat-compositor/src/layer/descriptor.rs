use std::sync::Arc;

use anyhow::{ensure, Result};

/// Texture filtering used when a layer is scaled on screen.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Interpolation {
    #[default]
    Linear,
    Nearest,
}

/// Blend function selection for one layer.
///
/// The factor pairs mirror classic alpha compositing:
/// `Source → (srcAlpha, 1-srcAlpha)`, `Destination → (dstAlpha, 1-dstAlpha)`,
/// `InverseSource → (1-srcAlpha, srcAlpha)`, `None → (one, zero)`, so
/// `None` overwrites whatever is underneath.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Blending {
    #[default]
    Source,
    Destination,
    InverseSource,
    None,
}

impl Blending {
    /// Border color used for clamped (non-periodic) texture edges.
    ///
    /// Transparent black everywhere except inverse-source blending, whose
    /// inverted factors would turn a transparent border into opaque black;
    /// it gets `(1, 0, 0, 1)` instead.
    #[inline]
    pub fn border_color(self) -> [f32; 4] {
        match self {
            Self::InverseSource => [1.0, 0.0, 0.0, 1.0],
            _ => [0.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Cache key naming one logical texture across frames.
///
/// `dynamic` marks the texture for re-upload every time its layer is drawn,
/// so pixel contents can animate frame to frame while the GPU handle stays
/// stable. The legacy string form encodes dynamism as a leading `~` on the
/// key; [`TextureKey::parse`] accepts that form and keeps the raw string as
/// the identity (so `"~clock"` and `"clock"` remain distinct entries, as
/// they always were).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureKey {
    name: String,
    dynamic: bool,
}

impl TextureKey {
    /// A static key: uploaded once, then reused from the cache.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), dynamic: false }
    }

    /// A dynamic key: re-uploaded on every resolve.
    pub fn dynamic(name: impl Into<String>) -> Self {
        Self { name: name.into(), dynamic: true }
    }

    /// Parses the legacy sigil form: a leading `~` means dynamic.
    pub fn parse(raw: &str) -> Self {
        Self {
            name: raw.to_owned(),
            dynamic: raw.starts_with('~'),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }
}

/// One textured rectangle in the layer stack.
///
/// Descriptors are immutable once published into a table snapshot; updates
/// always publish a whole new table. `pixels` is shared so snapshot clones
/// stay cheap even for large images.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerDescriptor {
    pub visible: bool,
    pub texture: TextureKey,
    /// Translation in design-space units.
    pub position: [f32; 2],
    /// On-screen extent in design-space units. Forwarded to the shader as a
    /// uniform; does not scale geometry.
    pub size: [f32; 2],
    /// Accepted but not applied to the per-layer transform.
    pub view_angle: f32,
    pub tex_angle: f32,
    pub tex_offset: [f32; 2],
    /// Wrap-around tiling when true, clamped border when false.
    pub periodic: bool,
    /// Reserved; not consumed by rendering.
    pub stencilled: bool,
    /// Per-channel remap range lower bound.
    pub min_color: [f32; 4],
    /// Per-channel remap range upper bound.
    pub max_color: [f32; 4],
    /// Per-channel color-buffer write enable (RGBA).
    pub color_mask: [bool; 4],
    pub interpolation: Interpolation,
    pub blending: Blending,
    /// Raw source image, 8-bit RGBA, row-major.
    pub pixels: Arc<[u8]>,
    /// Width/height of `pixels`.
    pub pixel_size: (u32, u32),
}

impl LayerDescriptor {
    /// Builds a visible, untinted, unmasked layer; adjust fields as needed.
    pub fn new(texture: TextureKey, pixels: impl Into<Arc<[u8]>>, pixel_size: (u32, u32)) -> Self {
        Self {
            visible: true,
            texture,
            position: [0.0, 0.0],
            size: [0.0, 0.0],
            view_angle: 0.0,
            tex_angle: 0.0,
            tex_offset: [0.0, 0.0],
            periodic: false,
            stencilled: false,
            min_color: [0.0; 4],
            max_color: [1.0; 4],
            color_mask: [true; 4],
            interpolation: Interpolation::default(),
            blending: Blending::default(),
            pixels: pixels.into(),
            pixel_size,
        }
    }

    /// Checks the pixel buffer length against `pixel_size`.
    ///
    /// A mismatch is a caller bug: the layer cannot be uploaded.
    pub fn validate_pixels(&self) -> Result<()> {
        let (w, h) = self.pixel_size;
        let expected = u64::from(w) * u64::from(h) * 4;
        ensure!(
            self.pixels.len() as u64 == expected,
            "texture '{}': {} pixel bytes, expected {} for {}x{} RGBA",
            self.texture.name(),
            self.pixels.len(),
            expected,
            w,
            h,
        );
        Ok(())
    }
}
