//! Typed commands marshaled onto the emulation worker, and the
//! completion primitive used for blocking round-trips.
//!
//! Every state-mutating operation on the worker is a variant here.
//! Commands travel over a single `mpsc` queue: FIFO per sender, and
//! the worker drains the queue strictly between loop iterations, so no
//! two commands ever execute concurrently or mid-frame.

use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use vmhost_core::{BootParameters, RendererKind};

/// Commands sent from the UI thread to the emulation worker.
#[derive(Debug)]
pub enum WorkerCommand {
    /// Boot a VM. Precondition: no VM is currently valid.
    StartVm(Arc<BootParameters>),
    /// Reset the current session to power-on state.
    ResetVm,
    /// Pause or resume the VM clock.
    SetPaused(bool),
    /// Tear down the current session. Deferred to the next frame
    /// boundary while running; immediate while paused. The optional
    /// completion is signaled once no VM is valid.
    ShutdownVm {
        save_resume_state: bool,
        done: Option<Completion<()>>,
    },
    LoadState(PathBuf),
    SaveState(PathBuf),
    LoadStateFromSlot(i32),
    SaveStateToSlot(i32),
    ChangeDisc(PathBuf),
    /// Rebuild the render device with a different pipeline.
    SwitchRenderer(RendererKind),
    ToggleFullscreen,
    SetFullscreen(bool),
    ReloadInputBindings,
    /// Ask the UI to resize the display to `scale` times the VM's
    /// native size.
    RequestDisplaySize(f32),
    /// Terminate the worker thread (process shutdown only).
    Exit,
}

impl WorkerCommand {
    /// Whether this command requires a valid VM to act on. Commands
    /// for which this is true are silent no-ops while no VM exists or
    /// the VM is stopping.
    pub fn requires_valid_vm(&self) -> bool {
        !matches!(
            self,
            WorkerCommand::StartVm(_)
                | WorkerCommand::ShutdownVm { .. }
                | WorkerCommand::ReloadInputBindings
                | WorkerCommand::Exit
        )
    }
}

/// A one-shot promise signaled by the worker when a blocking command
/// completes.
///
/// Cloned into the command; the caller keeps one end and waits.
/// [`wait_pumping`](Completion::wait_pumping) lets an event-loop
/// caller keep servicing its own queue while blocked, which is what
/// prevents deadlock when the teardown it is waiting on needs the
/// caller to fulfill a display request.
#[derive(Debug)]
pub struct Completion<T> {
    inner: Arc<(Mutex<Option<T>>, Condvar)>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Completion<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }

    /// Fulfill the promise. Later signals overwrite earlier ones, but
    /// a completion is only ever signaled once in practice.
    pub fn signal(&self, value: T) {
        let (slot, cvar) = &*self.inner;
        *slot.lock().unwrap() = Some(value);
        cvar.notify_all();
    }

    /// Whether the promise has been fulfilled, without consuming it.
    pub fn is_signaled(&self) -> bool {
        self.inner.0.lock().unwrap().is_some()
    }

    /// Block until signaled.
    pub fn wait(&self) -> T {
        let (slot, cvar) = &*self.inner;
        let mut guard = slot.lock().unwrap();
        loop {
            if let Some(value) = guard.take() {
                return value;
            }
            guard = cvar.wait(guard).unwrap();
        }
    }

    /// Block until signaled, running `pump` between short waits so the
    /// calling thread keeps servicing its own event queue.
    pub fn wait_pumping(&self, mut pump: impl FnMut()) -> T {
        let (slot, cvar) = &*self.inner;
        loop {
            {
                let guard = slot.lock().unwrap();
                let (mut guard, _timeout) =
                    cvar.wait_timeout(guard, Duration::from_millis(1)).unwrap();
                if let Some(value) = guard.take() {
                    return value;
                }
            }
            pump();
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn signal_then_wait() {
        let done = Completion::new();
        done.signal(42);
        assert!(done.is_signaled());
        assert_eq!(done.wait(), 42);
    }

    #[test]
    fn wait_blocks_until_signaled_from_another_thread() {
        let done: Completion<&'static str> = Completion::new();
        let signaler = done.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaler.signal("ok");
        });
        assert_eq!(done.wait(), "ok");
        handle.join().unwrap();
    }

    #[test]
    fn wait_pumping_runs_the_pump_while_blocked() {
        let done: Completion<()> = Completion::new();
        let signaler = done.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaler.signal(());
        });

        let mut pumps = 0u32;
        done.wait_pumping(|| pumps += 1);
        assert!(pumps > 0, "pump should run at least once while waiting");
        handle.join().unwrap();
    }

    #[test]
    fn commands_know_whether_they_need_a_vm() {
        assert!(WorkerCommand::ResetVm.requires_valid_vm());
        assert!(WorkerCommand::SetPaused(true).requires_valid_vm());
        assert!(WorkerCommand::LoadStateFromSlot(1).requires_valid_vm());
        assert!(WorkerCommand::SwitchRenderer(RendererKind::Software).requires_valid_vm());
        assert!(!WorkerCommand::StartVm(Arc::new(BootParameters::default())).requires_valid_vm());
        assert!(!WorkerCommand::ShutdownVm {
            save_resume_state: false,
            done: None
        }
        .requires_valid_vm());
        assert!(!WorkerCommand::Exit.requires_valid_vm());
    }
}
