use std::collections::HashMap;

use anyhow::Result;

use super::backend::{RenderBackend, TextureId, TextureParams};
use crate::layer::LayerDescriptor;

/// Maps layer texture keys to GPU texture handles.
///
/// A key is allocated and uploaded when first seen. Dynamic keys re-run the
/// upload (including wrap/filter configuration) on every resolve, so a
/// layer's pixel contents can animate frame to frame while the handle stays
/// stable. Static keys after the first resolve cost zero GPU calls.
///
/// There is no eviction: texture count is expected to be small and
/// long-lived, and entries die with the renderer.
#[derive(Default)]
pub struct TextureCache {
    entries: HashMap<String, TextureId>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the GPU handle for `layer`'s texture.
    ///
    /// A pixel buffer inconsistent with `pixel_size` is a caller bug and
    /// surfaces as an error; the cache makes no attempt to recover. The
    /// caller decides whether that aborts anything beyond the one layer.
    pub fn resolve<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        layer: &LayerDescriptor,
    ) -> Result<TextureId> {
        layer.validate_pixels()?;

        if let Some(&id) = self.entries.get(layer.texture.name()) {
            if layer.texture.is_dynamic() {
                backend.upload_texture(
                    id,
                    &layer.pixels,
                    layer.pixel_size,
                    &TextureParams::for_layer(layer),
                )?;
            }
            return Ok(id);
        }

        let id = backend.create_texture(layer.pixel_size)?;
        backend.upload_texture(
            id,
            &layer.pixels,
            layer.pixel_size,
            &TextureParams::for_layer(layer),
        )?;
        self.entries.insert(layer.texture.name().to_owned(), id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Blending, Interpolation, LayerDescriptor, TextureKey};
    use crate::render::backend::testing::{Call, FakeBackend};

    fn layer(key: TextureKey) -> LayerDescriptor {
        LayerDescriptor::new(key, vec![0u8; 2 * 2 * 4], (2, 2))
    }

    // ── static keys ───────────────────────────────────────────────────────

    #[test]
    fn first_resolve_creates_and_uploads() {
        let mut cache = TextureCache::new();
        let mut backend = FakeBackend::default();

        let id = cache.resolve(&mut backend, &layer(TextureKey::new("a"))).unwrap();

        assert_eq!(backend.upload_count(), 1);
        assert!(matches!(backend.calls[0], Call::CreateTexture { size: (2, 2), .. }));
        assert!(matches!(backend.calls[1], Call::UploadTexture { id: got, .. } if got == id));
    }

    #[test]
    fn second_resolve_of_static_key_is_free() {
        let mut cache = TextureCache::new();
        let mut backend = FakeBackend::default();
        let l = layer(TextureKey::new("a"));

        let first = cache.resolve(&mut backend, &l).unwrap();
        let second = cache.resolve(&mut backend, &l).unwrap();

        assert_eq!(first, second);
        // One create + one upload across both calls, nothing more.
        assert_eq!(backend.calls.len(), 2);
    }

    #[test]
    fn distinct_keys_get_distinct_handles() {
        let mut cache = TextureCache::new();
        let mut backend = FakeBackend::default();

        let a = cache.resolve(&mut backend, &layer(TextureKey::new("a"))).unwrap();
        let b = cache.resolve(&mut backend, &layer(TextureKey::new("b"))).unwrap();

        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
    }

    // ── dynamic keys ──────────────────────────────────────────────────────

    #[test]
    fn dynamic_key_reuploads_every_resolve_against_one_handle() {
        let mut cache = TextureCache::new();
        let mut backend = FakeBackend::default();
        let l = layer(TextureKey::dynamic("anim"));

        let first = cache.resolve(&mut backend, &l).unwrap();
        let second = cache.resolve(&mut backend, &l).unwrap();
        let third = cache.resolve(&mut backend, &l).unwrap();

        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(backend.upload_count(), 3);
        // Still a single texture allocation.
        let creates = backend
            .calls
            .iter()
            .filter(|c| matches!(c, Call::CreateTexture { .. }))
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn sigil_parsed_key_behaves_dynamically() {
        let mut cache = TextureCache::new();
        let mut backend = FakeBackend::default();
        let l = layer(TextureKey::parse("~anim"));

        cache.resolve(&mut backend, &l).unwrap();
        cache.resolve(&mut backend, &l).unwrap();

        assert_eq!(backend.upload_count(), 2);
    }

    // ── upload parameters ─────────────────────────────────────────────────

    #[test]
    fn periodic_layer_requests_repeat_wrap() {
        let mut cache = TextureCache::new();
        let mut backend = FakeBackend::default();
        let mut l = layer(TextureKey::new("tiled"));
        l.periodic = true;

        cache.resolve(&mut backend, &l).unwrap();

        let Call::UploadTexture { params, .. } = &backend.calls[1] else {
            panic!("expected upload");
        };
        assert!(params.periodic);
    }

    #[test]
    fn inverse_source_gets_the_red_border() {
        let mut cache = TextureCache::new();
        let mut backend = FakeBackend::default();

        for (name, blending, expected) in [
            ("s", Blending::Source, [0.0, 0.0, 0.0, 0.0]),
            ("i", Blending::InverseSource, [1.0, 0.0, 0.0, 1.0]),
        ] {
            let mut l = layer(TextureKey::new(name));
            l.blending = blending;
            cache.resolve(&mut backend, &l).unwrap();
            let Some(Call::UploadTexture { params, .. }) = backend.calls.last() else {
                panic!("expected upload");
            };
            assert_eq!(params.border_color, expected);
        }
    }

    #[test]
    fn filter_mode_follows_interpolation() {
        let mut cache = TextureCache::new();
        let mut backend = FakeBackend::default();
        let mut l = layer(TextureKey::new("pix"));
        l.interpolation = Interpolation::Nearest;

        cache.resolve(&mut backend, &l).unwrap();

        let Call::UploadTexture { params, .. } = &backend.calls[1] else {
            panic!("expected upload");
        };
        assert_eq!(params.interpolation, Interpolation::Nearest);
    }

    // ── errors ────────────────────────────────────────────────────────────

    #[test]
    fn inconsistent_pixel_size_is_an_error_and_uploads_nothing() {
        let mut cache = TextureCache::new();
        let mut backend = FakeBackend::default();
        let mut l = layer(TextureKey::new("bad"));
        l.pixel_size = (3, 3); // buffer is 2×2×4 bytes

        assert!(cache.resolve(&mut backend, &l).is_err());
        assert!(backend.calls.is_empty());
        assert!(cache.is_empty());
    }
}
