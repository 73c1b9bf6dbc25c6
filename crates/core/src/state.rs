//! VM lifecycle state and its thread-safe mirror.
//!
//! Exactly one VM exists at a time. Its state is owned and mutated
//! exclusively by the emulation worker; every other thread observes it
//! through [`SharedVmState`], which is an atomic snapshot and may be
//! stale by the time a command acting on it executes. Callers must
//! tolerate commands turning into no-ops.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of the (at most one) virtual machine.
///
/// "No VM" is not a formal state: it is represented by
/// [`SharedVmState::get`] returning `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VmState {
    /// Boot in progress; resources are being allocated.
    Initializing = 1,
    /// Executing one frame per worker loop iteration.
    Running = 2,
    /// VM clock stopped; worker blocked on its command queue.
    Paused = 3,
    /// Teardown requested; applied at the next frame boundary.
    Stopping = 4,
}

impl VmState {
    /// Convert to u8 for atomic storage (0 is reserved for "no VM").
    fn to_u8(self) -> u8 {
        self as u8
    }

    /// Convert from u8 for atomic loading.
    fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(VmState::Initializing),
            2 => Some(VmState::Running),
            3 => Some(VmState::Paused),
            4 => Some(VmState::Stopping),
            _ => None,
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmState::Initializing => "initializing",
            VmState::Running => "running",
            VmState::Paused => "paused",
            VmState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

const NO_VM: u8 = 0;

/// Thread-safe view of the worker-owned VM state.
///
/// The worker is the only writer. Readers on other threads get a
/// point-in-time snapshot, never a lock.
#[derive(Debug)]
pub struct SharedVmState {
    state: AtomicU8,
}

impl SharedVmState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(NO_VM),
        }
    }

    /// Current state, or `None` when no VM exists.
    pub fn get(&self) -> Option<VmState> {
        VmState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether a VM currently exists in any lifecycle state.
    pub fn has_valid_vm(&self) -> bool {
        self.state.load(Ordering::Acquire) != NO_VM
    }

    /// Worker-only: enter a lifecycle state.
    pub fn set(&self, state: VmState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    /// Worker-only: mark the VM as released.
    pub fn clear(&self) {
        self.state.store(NO_VM, Ordering::Release);
    }
}

impl Default for SharedVmState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_no_vm() {
        let shared = SharedVmState::new();
        assert_eq!(shared.get(), None);
        assert!(!shared.has_valid_vm());
    }

    #[test]
    fn set_and_clear_roundtrip() {
        let shared = SharedVmState::new();
        for state in [
            VmState::Initializing,
            VmState::Running,
            VmState::Paused,
            VmState::Stopping,
        ] {
            shared.set(state);
            assert_eq!(shared.get(), Some(state));
            assert!(shared.has_valid_vm());
        }
        shared.clear();
        assert_eq!(shared.get(), None);
        assert!(!shared.has_valid_vm());
    }

    #[test]
    fn readable_across_threads() {
        use std::sync::Arc;

        let shared = Arc::new(SharedVmState::new());
        shared.set(VmState::Running);

        let reader = Arc::clone(&shared);
        let observed = std::thread::spawn(move || reader.get())
            .join()
            .expect("reader thread");
        assert_eq!(observed, Some(VmState::Running));
    }
}
