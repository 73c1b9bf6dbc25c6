//! Collaborator traits driven by the emulation worker.
//!
//! The worker owns the lifecycle state machine; these traits only
//! execute work. All methods are called on the worker thread, so
//! implementations need no internal synchronization.

use std::path::Path;

use crate::boot::BootParameters;
use crate::boot::GameInfo;
use crate::display::WindowInfo;
use crate::error::{DisplayError, VmError};

/// The VM runtime collaborator (CPU, memory, media).
///
/// One long-lived instance per worker. A session runs between a
/// successful [`initialize`](VmRuntime::initialize) and the matching
/// [`shutdown`](VmRuntime::shutdown).
pub trait VmRuntime: Send {
    /// Reserve the VM memory map. Called once at worker startup,
    /// before any session. Failure here is fatal to the process.
    fn initialize_memory(&mut self) -> Result<(), VmError>;

    /// Release the memory map. Called once at worker teardown.
    fn release_memory(&mut self);

    /// Allocate session resources and resolve the boot image.
    fn initialize(&mut self, boot: &BootParameters) -> Result<GameInfo, VmError>;

    /// Execute exactly one unit of emulation work (one frame).
    fn execute_frame(&mut self);

    /// Reset the current session to power-on state.
    fn reset(&mut self);

    /// Release session resources.
    fn shutdown(&mut self);

    fn load_state(&mut self, path: &Path) -> Result<(), VmError>;
    fn save_state(&mut self, path: &Path) -> Result<(), VmError>;

    /// Swap the mounted disc; returns the new game identity.
    fn change_disc(&mut self, path: &Path) -> Result<GameInfo, VmError>;

    /// Native output resolution, used to honor display-size requests.
    fn native_resolution(&self) -> (u32, u32) {
        (640, 480)
    }
}

/// Renderer pipeline selection, switchable while a VM runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererKind {
    Hardware,
    Software,
}

/// The renderer collaborator. The worker hands it opaque window info
/// and never touches UI-owned widgets itself.
pub trait RenderBackend: Send {
    fn create_render_device(&mut self, window: &WindowInfo) -> Result<(), DisplayError>;

    /// Re-target an existing device at a new surface (fullscreen
    /// toggle, render-to-main change).
    fn change_render_window(&mut self, window: &WindowInfo) -> Result<(), DisplayError>;

    /// Rebuild the device pipeline for `kind` against the given
    /// surface.
    fn switch_renderer(
        &mut self,
        kind: RendererKind,
        window: &WindowInfo,
    ) -> Result<(), DisplayError>;

    fn resize_render_window(&mut self, width: u32, height: u32, scale: f32);

    fn destroy_render_surface(&mut self);

    fn destroy_render_device(&mut self);

    /// Enter or leave exclusive fullscreen; `false` means the mode
    /// switch was refused and the caller should recreate the surface.
    fn set_fullscreen(&mut self, enable: bool, width: u32, height: u32, refresh_rate: f32) -> bool;

    fn supports_exclusive_fullscreen(&self) -> bool;
}

/// Input-device polling, serviced by the worker's background poll
/// timer while no frame loop is running.
pub trait InputPoller: Send {
    fn poll_devices(&mut self);
    fn reload_bindings(&mut self);
}
