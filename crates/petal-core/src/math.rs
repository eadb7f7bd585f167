//! Math types and the 2D sprite projection.
//!
//! CPU-side math uses the SIMD-accelerated [`glam`] types, re-exported here
//! so downstream crates do not need a direct `glam` dependency.
//!
//! [`glam`]: https://docs.rs/glam

pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

/// Orthographic projection for a `width x height` viewport, depth -1..1.
///
/// Depth maps to the 0..1 clip range, so a sprite at depth 0 lands at 0.5.
pub fn sprite_projection(width: f32, height: f32) -> Mat4 {
    Mat4::orthographic_rh(-width / 2.0, width / 2.0, -height / 2.0, height / 2.0, -1.0, 1.0)
}

/// View for drawing to the window: origin top-left, y down.
///
/// Rotating half a turn around Y and then Z flips the y and z axes before the
/// viewport is re-centred.
pub fn screen_view(width: f32, height: f32) -> Mat4 {
    Mat4::from_translation(Vec3::new(-width / 2.0, height / 2.0, 1.0))
        * Mat4::from_rotation_y(std::f32::consts::PI)
        * Mat4::from_rotation_z(std::f32::consts::PI)
}

/// View for drawing into an offscreen target: origin bottom-left, y up.
///
/// Render targets store their rows bottom-up, so this view together with the
/// flipped texture coordinates keeps their content upright when sampled.
pub fn offscreen_view(width: f32, height: f32) -> Mat4 {
    Mat4::from_translation(Vec3::new(-width / 2.0, -height / 2.0, 1.0))
}

/// World-view-projection with `transform` applied first.
pub fn world_view_projection(transform: Mat4, view: Mat4, projection: Mat4) -> Mat4 {
    projection * view * transform
}
