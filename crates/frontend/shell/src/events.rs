//! Lifecycle notifications emitted by the worker and polled by the UI.

use std::path::PathBuf;

use vmhost_core::GameInfo;

/// Notifications flowing from the emulation worker to the UI thread.
///
/// Fire-and-forget: failures during asynchronous commands are reported
/// only through these, never thrown back across the thread boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum EmuEvent {
    /// Boot has begun; the VM is allocating resources.
    Starting,
    /// Boot completed and frames are executing.
    Started,
    Paused,
    Resumed,
    /// The session is gone; the worker is idling on its queue.
    Stopped,
    /// Game identity changed (boot or disc swap).
    GameChanged(GameInfo),
    /// A recoverable failure, surfaced for the user.
    Error(String),
    SaveStateLoaded { path: PathBuf, ok: bool },
    SaveStateSaved { path: PathBuf, ok: bool },
}

impl EmuEvent {
    /// Short name for logging and window-title updates.
    pub fn name(&self) -> &'static str {
        match self {
            EmuEvent::Starting => "starting",
            EmuEvent::Started => "started",
            EmuEvent::Paused => "paused",
            EmuEvent::Resumed => "resumed",
            EmuEvent::Stopped => "stopped",
            EmuEvent::GameChanged(_) => "game-changed",
            EmuEvent::Error(_) => "error",
            EmuEvent::SaveStateLoaded { .. } => "save-state-loaded",
            EmuEvent::SaveStateSaved { .. } => "save-state-saved",
        }
    }
}
