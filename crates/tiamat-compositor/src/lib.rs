//! Tiamat compositor crate.
//!
//! Renders a dynamically-updatable ordered stack of rectangular textured
//! layers onto a screen-aligned quad each frame. A control thread publishes
//! whole layer tables; the render thread snapshots the latest one and
//! composites it in order (painter's algorithm) without ever observing a
//! half-updated table.

pub mod coords;
pub mod device;
pub mod layer;
pub mod logging;
pub mod render;
