//! Display value types exchanged across the UI/worker boundary.

use serde::{Deserialize, Serialize};

/// Opaque description of a native render target.
///
/// Produced by the UI thread when it constructs the display surface,
/// consumed by the renderer when creating or re-targeting its device.
/// The worker never inspects the surface beyond these values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowInfo {
    /// Host-assigned surface identity; meaningful only to the surface
    /// host that produced it.
    pub surface_id: u64,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
}

impl WindowInfo {
    pub fn new(surface_id: u64, width: u32, height: u32) -> Self {
        Self {
            surface_id,
            width,
            height,
            scale: 1.0,
        }
    }
}

/// Persisted geometry of a standalone display window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowGeometry {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 640,
            height: 480,
        }
    }
}
