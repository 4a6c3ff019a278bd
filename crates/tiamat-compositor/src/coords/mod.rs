//! Coordinate and matrix types shared by the compositor and its backends.
//!
//! Canonical spaces:
//! - Design space: the nominal resolution layer tables are authored against.
//! - Drawable space: physical pixels of the surface.
//!
//! The projection maps design space to NDC while preserving the design
//! aspect ratio (letterbox/pillarbox fit).

mod mat4;
mod viewport;

pub use mat4::Mat4;
pub use viewport::{fit_projection, Viewport};
