//! Core primitives for the VM host: lifecycle state, boot parameters,
//! display value types, and the collaborator traits the emulation
//! worker drives (runtime, renderer, input).
//!
//! This crate defines the seams only. The worker thread, command
//! marshaling and surface coordination live in the shell crate; the
//! actual CPU emulation and renderer backends are external
//! collaborators implementing the traits here.

pub mod boot;
pub mod display;
pub mod error;
pub mod runtime;
pub mod state;

pub use boot::{BootParameters, DiscSource, GameInfo};
pub use display::{WindowGeometry, WindowInfo};
pub use error::{DisplayError, VmError};
pub use runtime::{InputPoller, RenderBackend, RendererKind, VmRuntime};
pub use state::{SharedVmState, VmState};
