//! The emulation worker thread.
//!
//! Exactly one worker exists per process. It owns the VM lifecycle
//! state machine and is the only thread that executes frames or
//! mutates VM state. The UI thread drives it through [`WorkerHandle`],
//! whose operations are marshaled over the command queue; the queue is
//! drained strictly between loop iterations, so commands never
//! interleave with a frame.
//!
//! While no VM exists (and while one is paused) the worker blocks on
//! its queue with a timeout that doubles as the background input-poll
//! timer, so devices stay responsive without a frame loop running.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use vmhost_core::{
    BootParameters, GameInfo, InputPoller, RenderBackend, RendererKind, SharedVmState, VmRuntime,
    VmState, WindowInfo,
};

use crate::command::{Completion, WorkerCommand};
use crate::display::{display_channel, DisplayProxy, DisplayRequest};
use crate::events::EmuEvent;
use crate::save_slots::{self, SaveSlotRegistry, QUICK_RESUME_SLOT};

/// Input devices are polled at this rate while no frame loop runs.
pub const BACKGROUND_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Process-wide guard: at most one worker thread may exist.
static WORKER_LIVE: AtomicBool = AtomicBool::new(false);

/// Host preferences snapshotted at spawn time.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub start_fullscreen: bool,
    pub render_to_main: bool,
    pub fast_boot: bool,
    pub resume_on_boot: bool,
    pub save_resume_on_shutdown: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            start_fullscreen: false,
            render_to_main: true,
            fast_boot: true,
            resume_on_boot: false,
            save_resume_on_shutdown: false,
        }
    }
}

/// UI-side facade over the worker: marshaled commands in, events out.
///
/// All command methods may be called from any thread except the worker
/// itself; they enqueue and return immediately unless named
/// `*_blocking`. Dropping the handle asks the worker to exit and joins
/// it; the exit path tears down a still-live VM without waiting on the
/// display channel, so the drop cannot deadlock on an unpumped UI.
pub struct WorkerHandle {
    tx: Sender<WorkerCommand>,
    events_rx: Receiver<EmuEvent>,
    shared: Arc<SharedVmState>,
    worker_thread: ThreadId,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn is_on_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_thread
    }

    pub fn worker_thread_id(&self) -> ThreadId {
        self.worker_thread
    }

    /// Snapshot of the lifecycle state. May be stale by the time a
    /// command issued on the strength of it executes.
    pub fn vm_state(&self) -> Option<VmState> {
        self.shared.get()
    }

    pub fn has_valid_vm(&self) -> bool {
        self.shared.has_valid_vm()
    }

    pub fn shared_state(&self) -> Arc<SharedVmState> {
        Arc::clone(&self.shared)
    }

    /// Drain pending notifications.
    pub fn poll_events(&self) -> Vec<EmuEvent> {
        let mut events = Vec::new();
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }

    pub fn start_vm(&self, boot: Arc<BootParameters>) {
        self.send(WorkerCommand::StartVm(boot));
    }

    pub fn reset_vm(&self) {
        self.send(WorkerCommand::ResetVm);
    }

    pub fn set_paused(&self, paused: bool) {
        self.send(WorkerCommand::SetPaused(paused));
    }

    /// Fire-and-forget shutdown; the `stopped` event reports
    /// completion.
    pub fn shutdown_vm(&self, save_resume_state: bool) {
        self.send(WorkerCommand::ShutdownVm {
            save_resume_state,
            done: None,
        });
    }

    /// Shutdown that returns only once no VM is valid. `pump` runs
    /// between waits and must service display requests, because the
    /// teardown performs a blocking display-destroy round-trip.
    pub fn shutdown_vm_blocking(&self, save_resume_state: bool, pump: impl FnMut()) {
        debug_assert!(
            !self.is_on_worker_thread(),
            "blocking shutdown must not be issued from the worker thread"
        );
        let done = Completion::new();
        if !self.send(WorkerCommand::ShutdownVm {
            save_resume_state,
            done: Some(done.clone()),
        }) {
            return;
        }
        done.wait_pumping(pump);
    }

    pub fn load_state(&self, path: impl Into<PathBuf>) {
        self.send(WorkerCommand::LoadState(path.into()));
    }

    pub fn save_state(&self, path: impl Into<PathBuf>) {
        self.send(WorkerCommand::SaveState(path.into()));
    }

    pub fn load_state_from_slot(&self, slot: i32) {
        self.send(WorkerCommand::LoadStateFromSlot(slot));
    }

    pub fn save_state_to_slot(&self, slot: i32) {
        self.send(WorkerCommand::SaveStateToSlot(slot));
    }

    pub fn change_disc(&self, path: impl Into<PathBuf>) {
        self.send(WorkerCommand::ChangeDisc(path.into()));
    }

    pub fn switch_renderer(&self, kind: RendererKind) {
        self.send(WorkerCommand::SwitchRenderer(kind));
    }

    pub fn toggle_fullscreen(&self) {
        self.send(WorkerCommand::ToggleFullscreen);
    }

    pub fn set_fullscreen(&self, fullscreen: bool) {
        self.send(WorkerCommand::SetFullscreen(fullscreen));
    }

    pub fn reload_input_bindings(&self) {
        self.send(WorkerCommand::ReloadInputBindings);
    }

    pub fn request_display_size(&self, scale: f32) {
        self.send(WorkerCommand::RequestDisplaySize(scale));
    }

    fn send(&self, cmd: WorkerCommand) -> bool {
        if self.tx.send(cmd).is_err() {
            log::warn!("command dropped: worker is gone");
            return false;
        }
        true
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerCommand::Exit);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        WORKER_LIVE.store(false, Ordering::SeqCst);
    }
}

/// Spawn the emulation worker.
///
/// Returns the UI-side handle and the receiver end of the display
/// channel, which must be given to a
/// [`DisplayCoordinator`](crate::display::DisplayCoordinator) on the
/// UI thread.
pub fn spawn(
    runtime: Box<dyn VmRuntime>,
    renderer: Box<dyn RenderBackend>,
    input: Box<dyn InputPoller>,
    registry: SaveSlotRegistry,
    config: WorkerConfig,
) -> (WorkerHandle, Receiver<DisplayRequest>) {
    assert!(
        !WORKER_LIVE.swap(true, Ordering::SeqCst),
        "only one emulation worker may exist per process"
    );

    let (tx, rx) = channel();
    let (events_tx, events_rx) = channel();
    let (display, display_rx) = display_channel();
    let shared = Arc::new(SharedVmState::new());
    let worker_shared = Arc::clone(&shared);

    let join = thread::Builder::new()
        .name("emu-worker".to_string())
        .spawn(move || {
            EmuWorker {
                runtime,
                renderer,
                input,
                registry,
                config,
                rx,
                events: events_tx,
                display,
                shared: worker_shared,
                game: None,
                window: None,
                is_fullscreen: false,
                is_rendering_to_main: false,
                save_resume_on_stop: false,
                pending_shutdown: Vec::new(),
                exit: false,
            }
            .run();
        })
        .expect("failed to spawn emulation worker");
    let worker_thread = join.thread().id();

    (
        WorkerHandle {
            tx,
            events_rx,
            shared,
            worker_thread,
            join: Some(join),
        },
        display_rx,
    )
}

struct EmuWorker {
    runtime: Box<dyn VmRuntime>,
    renderer: Box<dyn RenderBackend>,
    input: Box<dyn InputPoller>,
    registry: SaveSlotRegistry,
    config: WorkerConfig,
    rx: Receiver<WorkerCommand>,
    events: Sender<EmuEvent>,
    display: DisplayProxy,
    shared: Arc<SharedVmState>,
    game: Option<GameInfo>,
    window: Option<WindowInfo>,
    is_fullscreen: bool,
    is_rendering_to_main: bool,
    save_resume_on_stop: bool,
    pending_shutdown: Vec<Completion<()>>,
    exit: bool,
}

impl EmuWorker {
    fn run(mut self) {
        // Pre-flight: without the memory map nothing can ever run.
        if let Err(e) = self.runtime.initialize_memory() {
            log::error!("fatal: failed to reserve VM memory map: {}", e);
            std::process::abort();
        }
        self.input.reload_bindings();
        log::info!("emulation worker started");

        while !self.exit {
            if !self.shared.has_valid_vm() {
                match self.rx.recv_timeout(BACKGROUND_POLL_INTERVAL) {
                    Ok(cmd) => self.apply(cmd),
                    Err(RecvTimeoutError::Timeout) => self.input.poll_devices(),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                self.execute_vm();
            }
        }

        if self.shared.has_valid_vm() {
            // The handle may already be joining us, so nobody is
            // guaranteed to pump the display channel.
            self.destroy_vm(false);
        }
        self.runtime.release_memory();
        log::info!("emulation worker exited");
    }

    /// The per-session loop: drain commands at every boundary, then
    /// act on the current state. Returns when the VM is gone.
    fn execute_vm(&mut self) {
        loop {
            self.drain_commands();
            if self.exit {
                return;
            }
            match self.shared.get() {
                None => return,
                Some(VmState::Initializing) => {
                    // startVM completes the transition before the loop
                    // ever observes this state.
                    debug_assert!(false, "run loop observed a VM still initializing");
                    return;
                }
                Some(VmState::Running) => self.runtime.execute_frame(),
                Some(VmState::Paused) => {
                    match self.rx.recv_timeout(BACKGROUND_POLL_INTERVAL) {
                        Ok(cmd) => self.apply(cmd),
                        Err(RecvTimeoutError::Timeout) => self.input.poll_devices(),
                        Err(RecvTimeoutError::Disconnected) => {
                            self.destroy_vm(false);
                            return;
                        }
                    }
                }
                Some(VmState::Stopping) => {
                    self.destroy_vm(true);
                    return;
                }
            }
        }
    }

    fn drain_commands(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(cmd) => self.apply(cmd),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.exit = true;
                    return;
                }
            }
        }
    }

    fn apply(&mut self, cmd: WorkerCommand) {
        if cmd.requires_valid_vm() {
            let actionable = matches!(
                self.shared.get(),
                Some(VmState::Running) | Some(VmState::Paused)
            );
            if !actionable {
                // Silent no-op: the VM is gone or going, and the
                // caller was told its snapshot may be stale.
                log::debug!("ignoring {:?}: no VM to act on", cmd);
                return;
            }
        }

        match cmd {
            WorkerCommand::StartVm(boot) => self.start_vm(&boot),
            WorkerCommand::ResetVm => self.runtime.reset(),
            WorkerCommand::SetPaused(paused) => self.set_paused(paused),
            WorkerCommand::ShutdownVm {
                save_resume_state,
                done,
            } => self.shutdown_vm(save_resume_state, done),
            WorkerCommand::LoadState(path) => self.load_state(&path),
            WorkerCommand::SaveState(path) => self.save_state(&path),
            WorkerCommand::LoadStateFromSlot(slot) => {
                if let Some(path) = self.slot_path(slot) {
                    self.load_state(&path);
                }
            }
            WorkerCommand::SaveStateToSlot(slot) => {
                if let Some(path) = self.slot_path(slot) {
                    let _ = self.registry.ensure_root();
                    self.save_state(&path);
                }
            }
            WorkerCommand::ChangeDisc(path) => self.change_disc(&path),
            WorkerCommand::SwitchRenderer(kind) => self.switch_renderer(kind),
            WorkerCommand::ToggleFullscreen => self.set_fullscreen(!self.is_fullscreen),
            WorkerCommand::SetFullscreen(fullscreen) => self.set_fullscreen(fullscreen),
            WorkerCommand::ReloadInputBindings => self.input.reload_bindings(),
            WorkerCommand::RequestDisplaySize(scale) => self.request_display_size(scale),
            WorkerCommand::Exit => self.exit = true,
        }
    }

    fn start_vm(&mut self, boot: &BootParameters) {
        if self.shared.has_valid_vm() {
            // Precondition: callers must shut the previous VM down
            // first.
            debug_assert!(false, "startVM issued while a VM is already valid");
            log::error!("ignoring startVM: a VM is already active");
            return;
        }

        self.send_event(EmuEvent::Starting);
        self.shared.set(VmState::Initializing);

        self.is_fullscreen = boot.fullscreen.unwrap_or(self.config.start_fullscreen);
        self.is_rendering_to_main = !self.is_fullscreen && self.config.render_to_main;

        // The display may take a while; it comes first so renderer
        // setup has a target.
        let window = match self.display.create(self.is_fullscreen, self.is_rendering_to_main) {
            Ok(window) => window,
            Err(e) => {
                self.abort_start(format!("failed to create display: {}", e));
                return;
            }
        };

        if let Err(e) = self.renderer.create_render_device(&window) {
            // The widget is useless without a device; round-trip its
            // destruction before reporting failure.
            self.display.destroy();
            self.abort_start(format!("failed to create render device: {}", e));
            return;
        }
        self.window = Some(window);

        let game = match self.runtime.initialize(boot) {
            Ok(game) => game,
            Err(e) => {
                self.renderer.destroy_render_surface();
                self.renderer.destroy_render_device();
                self.display.destroy();
                self.window = None;
                self.abort_start(format!("failed to start VM: {}", e));
                return;
            }
        };

        let fast_boot = boot.fast_boot.unwrap_or(self.config.fast_boot);
        let resume_path = boot.save_state_path.clone().or_else(|| {
            (fast_boot && self.config.resume_on_boot)
                .then(|| {
                    self.registry
                        .state_path(&game.serial, game.crc, QUICK_RESUME_SLOT)
                })
                .filter(|path| path.exists())
        });

        self.game = Some(game.clone());
        self.shared.set(VmState::Running);
        self.send_event(EmuEvent::GameChanged(game));
        self.send_event(EmuEvent::Started);
        log::info!("VM started");

        if let Some(path) = resume_path {
            self.load_state(&path);
        }
    }

    fn abort_start(&mut self, message: String) {
        log::error!("{}", message);
        self.shared.clear();
        self.send_event(EmuEvent::Error(message));
        // A shutdown racing a failed start still has to complete.
        for done in self.pending_shutdown.drain(..) {
            done.signal(());
        }
    }

    fn set_paused(&mut self, paused: bool) {
        match (self.shared.get(), paused) {
            (Some(VmState::Running), true) => {
                self.shared.set(VmState::Paused);
                self.send_event(EmuEvent::Paused);
            }
            (Some(VmState::Paused), false) => {
                self.shared.set(VmState::Running);
                self.send_event(EmuEvent::Resumed);
            }
            _ => {}
        }
    }

    fn shutdown_vm(&mut self, save_resume_state: bool, done: Option<Completion<()>>) {
        if !self.shared.has_valid_vm() {
            // Idempotent teardown: nothing to do, report done now.
            if let Some(done) = done {
                done.signal(());
            }
            return;
        }

        if let Some(done) = done {
            self.pending_shutdown.push(done);
        }
        self.save_resume_on_stop = save_resume_state && self.config.save_resume_on_shutdown;

        // Running: deferred to the frame boundary (the loop drains
        // before every frame). Paused: the blocked wait observes the
        // state change on the next iteration.
        self.shared.set(VmState::Stopping);
    }

    /// Tear down the current session. `wait_for_display` selects the
    /// blocking display round-trip; the exit path passes `false`
    /// because the UI may no longer be servicing requests.
    fn destroy_vm(&mut self, wait_for_display: bool) {
        if self.save_resume_on_stop {
            self.save_resume_on_stop = false;
            if let Some(game) = self.game.clone() {
                let _ = self.registry.ensure_root();
                let path = self
                    .registry
                    .state_path(&game.serial, game.crc, QUICK_RESUME_SLOT);
                if let Err(e) = self.runtime.save_state(&path) {
                    log::warn!("failed to save resume state: {}", e);
                }
            }
        }

        self.runtime.shutdown();
        self.renderer.destroy_render_surface();
        self.renderer.destroy_render_device();
        if wait_for_display {
            self.display.destroy();
        } else {
            self.display.destroy_detached();
        }
        self.window = None;
        self.game = None;
        self.shared.clear();
        self.send_event(EmuEvent::Stopped);
        log::info!("VM stopped");

        for done in self.pending_shutdown.drain(..) {
            done.signal(());
        }
    }

    fn load_state(&mut self, path: &Path) {
        let ok = if path.exists() {
            match self.runtime.load_state(path) {
                Ok(()) => true,
                Err(e) => {
                    log::error!("failed to load state {}: {}", path.display(), e);
                    false
                }
            }
        } else {
            log::warn!("save state {} does not exist", path.display());
            false
        };
        self.send_event(EmuEvent::SaveStateLoaded {
            path: path.to_path_buf(),
            ok,
        });
    }

    fn save_state(&mut self, path: &Path) {
        let ok = match self.runtime.save_state(path) {
            Ok(()) => true,
            Err(e) => {
                log::error!("failed to save state {}: {}", path.display(), e);
                false
            }
        };
        self.send_event(EmuEvent::SaveStateSaved {
            path: path.to_path_buf(),
            ok,
        });
    }

    fn slot_path(&self, slot: i32) -> Option<PathBuf> {
        if !save_slots::is_valid_slot(slot) {
            log::warn!("ignoring out-of-range save slot {}", slot);
            return None;
        }
        match &self.game {
            Some(game) => Some(self.registry.state_path(&game.serial, game.crc, slot)),
            None => {
                log::warn!("no game identity for slot {}", slot);
                None
            }
        }
    }

    fn change_disc(&mut self, path: &Path) {
        match self.runtime.change_disc(path) {
            Ok(game) => {
                self.game = Some(game.clone());
                self.send_event(EmuEvent::GameChanged(game));
            }
            Err(e) => {
                let message = format!("failed to change disc: {}", e);
                log::error!("{}", message);
                self.send_event(EmuEvent::Error(message));
            }
        }
    }

    fn switch_renderer(&mut self, kind: RendererKind) {
        // The device is rebuilt against a fresh surface handle from
        // the UI, like the fullscreen path.
        match self
            .display
            .update(self.is_fullscreen, self.is_rendering_to_main)
        {
            Ok(window) => {
                if let Err(e) = self.renderer.switch_renderer(kind, &window) {
                    let message = format!("failed to switch renderer: {}", e);
                    log::error!("{}", message);
                    self.send_event(EmuEvent::Error(message));
                } else {
                    self.window = Some(window);
                    log::info!("renderer switched to {:?}", kind);
                }
            }
            Err(e) => {
                let message = format!("failed to update display: {}", e);
                log::error!("{}", message);
                self.send_event(EmuEvent::Error(message));
            }
        }
    }

    fn set_fullscreen(&mut self, fullscreen: bool) {
        if self.is_fullscreen == fullscreen {
            return;
        }
        let render_to_main = !fullscreen && self.config.render_to_main;

        match self.display.update(fullscreen, render_to_main) {
            Ok(window) => {
                // Flags track the real surface, so they change only
                // once the UI has reshaped it.
                self.is_fullscreen = fullscreen;
                self.is_rendering_to_main = render_to_main;
                if let Err(e) = self.renderer.change_render_window(&window) {
                    let message = format!("failed to re-target renderer: {}", e);
                    log::error!("{}", message);
                    self.send_event(EmuEvent::Error(message));
                } else {
                    self.window = Some(window);
                }
            }
            Err(e) => {
                let message = format!("failed to update display: {}", e);
                log::error!("{}", message);
                self.send_event(EmuEvent::Error(message));
            }
        }
    }

    fn request_display_size(&mut self, scale: f32) {
        let (width, height) = self.runtime.native_resolution();
        let width = ((width as f32) * scale).round() as u32;
        let height = ((height as f32) * scale).round() as u32;
        self.display.resize(width, height);
        if let Some(window) = &self.window {
            self.renderer
                .resize_render_window(width, height, window.scale);
        }
    }

    fn send_event(&self, event: EmuEvent) {
        log::debug!("event: {}", event.name());
        let _ = self.events.send(event);
    }
}
