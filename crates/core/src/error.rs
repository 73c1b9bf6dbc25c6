//! Error taxonomy for VM and display operations.
//!
//! Fatal failures (memory-map reservation at worker startup) are not
//! represented here: the worker aborts the process for those. These
//! enums cover the recoverable cases: a failed boot leaves the worker
//! idling with no VM, a failed state operation leaves the VM running
//! unaffected.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("failed to reserve VM memory map")]
    MemoryMap,

    #[error("boot image is missing or unreadable: {path:?}")]
    MissingImage { path: PathBuf },

    #[error("boot image is not a runnable image: {reason}")]
    BadImage { reason: String },

    #[error("BIOS image not found")]
    MissingBios,

    #[error("no disc mounted")]
    NoDisc,

    #[error("save state {path:?} could not be read")]
    StateMissing { path: PathBuf },

    #[error("save state operation failed: {0}")]
    StateIo(#[from] std::io::Error),

    #[error("save state is incompatible: {reason}")]
    StateIncompatible { reason: String },
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("surface creation failed: {0}")]
    CreateFailed(String),

    #[error("render device creation failed: {0}")]
    DeviceFailed(String),

    #[error("render window change failed: {0}")]
    RetargetFailed(String),

    #[error("display request abandoned before completion")]
    Disconnected,
}
