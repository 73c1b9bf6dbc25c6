use std::cell::RefCell;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use minifb::{Key, KeyRepeat, ScaleMode, Window, WindowOptions};
use serde::{Deserialize, Serialize};

use vmhost_core::{
    BootParameters, DisplayError, GameInfo, InputPoller, RenderBackend, RendererKind, VmError,
    VmRuntime, WindowGeometry, WindowInfo,
};
use vmhost_shell::display::{DisplayCoordinator, SurfaceHost, SurfaceTopology};
use vmhost_shell::events::EmuEvent;
use vmhost_shell::save_slots::{image_checksum, SaveSlotRegistry};
use vmhost_shell::settings::Settings;
use vmhost_shell::worker::{self, WorkerConfig};

/// Demo VM runtime: validates the boot image, derives the game identity
/// from its contents, and counts frames. Save states are JSON
/// snapshots of the frame counter.
struct ImageRuntime {
    frame: u64,
    disc: Option<PathBuf>,
}

#[derive(Serialize, Deserialize)]
struct SessionSnapshot {
    frame: u64,
    disc: Option<String>,
}

impl ImageRuntime {
    fn new() -> Self {
        Self {
            frame: 0,
            disc: None,
        }
    }

    fn identify(path: &Path) -> Result<GameInfo, VmError> {
        let data = fs::read(path).map_err(|_| VmError::MissingImage {
            path: path.to_path_buf(),
        })?;
        if data.is_empty() {
            return Err(VmError::BadImage {
                reason: "image is empty".to_string(),
            });
        }
        let serial = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_uppercase().replace(' ', "-"))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        Ok(GameInfo {
            serial,
            crc: image_checksum(&data),
            title: path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default(),
            disc_path: Some(path.to_path_buf()),
        })
    }
}

impl VmRuntime for ImageRuntime {
    fn initialize_memory(&mut self) -> Result<(), VmError> {
        Ok(())
    }

    fn release_memory(&mut self) {}

    fn initialize(&mut self, boot: &BootParameters) -> Result<GameInfo, VmError> {
        self.frame = 0;
        match &boot.disc_path {
            Some(path) => {
                let game = Self::identify(path)?;
                self.disc = Some(path.clone());
                Ok(game)
            }
            None => {
                self.disc = None;
                Ok(GameInfo {
                    serial: "BIOS".to_string(),
                    crc: 0,
                    title: "System BIOS".to_string(),
                    disc_path: None,
                })
            }
        }
    }

    fn execute_frame(&mut self) {
        self.frame += 1;
        std::thread::sleep(Duration::from_millis(16));
    }

    fn reset(&mut self) {
        self.frame = 0;
    }

    fn shutdown(&mut self) {
        self.disc = None;
    }

    fn load_state(&mut self, path: &Path) -> Result<(), VmError> {
        let data = fs::read(path)?;
        let snapshot: SessionSnapshot =
            serde_json::from_slice(&data).map_err(|e| VmError::StateIncompatible {
                reason: e.to_string(),
            })?;
        let current = self.disc.as_ref().map(|p| p.to_string_lossy().to_string());
        if snapshot.disc != current {
            return Err(VmError::StateIncompatible {
                reason: "state was taken with a different disc".to_string(),
            });
        }
        self.frame = snapshot.frame;
        Ok(())
    }

    fn save_state(&mut self, path: &Path) -> Result<(), VmError> {
        let snapshot = SessionSnapshot {
            frame: self.frame,
            disc: self.disc.as_ref().map(|p| p.to_string_lossy().to_string()),
        };
        let data = serde_json::to_vec_pretty(&snapshot).map_err(|e| VmError::StateIncompatible {
            reason: e.to_string(),
        })?;
        fs::write(path, data)?;
        Ok(())
    }

    fn change_disc(&mut self, path: &Path) -> Result<GameInfo, VmError> {
        let game = Self::identify(path)?;
        self.disc = Some(path.to_path_buf());
        Ok(game)
    }
}

/// Demo renderer: the shell presents a flat framebuffer itself, so this
/// only tracks the current target for logging.
struct NullRenderer {
    target: Option<WindowInfo>,
}

impl RenderBackend for NullRenderer {
    fn create_render_device(&mut self, window: &WindowInfo) -> Result<(), DisplayError> {
        log::info!(
            "render device created for surface {} ({}x{})",
            window.surface_id,
            window.width,
            window.height
        );
        self.target = Some(*window);
        Ok(())
    }

    fn change_render_window(&mut self, window: &WindowInfo) -> Result<(), DisplayError> {
        log::info!("render target moved to surface {}", window.surface_id);
        self.target = Some(*window);
        Ok(())
    }

    fn switch_renderer(
        &mut self,
        kind: RendererKind,
        window: &WindowInfo,
    ) -> Result<(), DisplayError> {
        log::info!(
            "renderer switched to {:?} on surface {}",
            kind,
            window.surface_id
        );
        self.target = Some(*window);
        Ok(())
    }

    fn resize_render_window(&mut self, width: u32, height: u32, _scale: f32) {
        if let Some(target) = self.target.as_mut() {
            target.width = width;
            target.height = height;
        }
    }

    fn destroy_render_surface(&mut self) {}

    fn destroy_render_device(&mut self) {
        self.target = None;
    }

    fn set_fullscreen(&mut self, _enable: bool, _width: u32, _height: u32, _refresh: f32) -> bool {
        false
    }

    fn supports_exclusive_fullscreen(&self) -> bool {
        false
    }
}

struct NullInput;

impl InputPoller for NullInput {
    fn poll_devices(&mut self) {}

    fn reload_bindings(&mut self) {
        log::debug!("input bindings reloaded");
    }
}

/// Surface host backed by a minifb window on the UI thread.
struct MinifbHost {
    window: Option<Window>,
    surface_id: u64,
    next_id: u64,
}

impl MinifbHost {
    fn new() -> Self {
        Self {
            window: None,
            surface_id: 0,
            next_id: 1,
        }
    }
}

impl SurfaceHost for MinifbHost {
    fn create_surface(
        &mut self,
        topology: SurfaceTopology,
        geometry: Option<WindowGeometry>,
    ) -> Result<WindowInfo, DisplayError> {
        let fullscreen = matches!(
            topology,
            SurfaceTopology::WindowFullscreen | SurfaceTopology::ExclusiveFullscreen
        );
        let (width, height) = if fullscreen {
            (1280, 720)
        } else {
            let geom = geometry.unwrap_or_default();
            (geom.width as usize, geom.height as usize)
        };

        let mut window = Window::new(
            "vmhost",
            width,
            height,
            WindowOptions {
                resize: !fullscreen,
                borderless: fullscreen,
                scale_mode: ScaleMode::AspectRatioStretch,
                ..WindowOptions::default()
            },
        )
        .map_err(|e| DisplayError::CreateFailed(e.to_string()))?;
        if !fullscreen {
            if let Some(geom) = geometry {
                window.set_position(geom.x as isize, geom.y as isize);
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.window = Some(window);
        self.surface_id = id;
        Ok(WindowInfo::new(id, width as u32, height as u32))
    }

    fn destroy_surface(&mut self, surface_id: u64) {
        if surface_id == self.surface_id {
            self.window = None;
        }
    }

    fn surface_geometry(&self, surface_id: u64) -> Option<WindowGeometry> {
        if surface_id != self.surface_id {
            return None;
        }
        let window = self.window.as_ref()?;
        let (x, y) = window.get_position();
        let (width, height) = window.get_size();
        Some(WindowGeometry {
            x: x as i32,
            y: y as i32,
            width: width as u32,
            height: height as u32,
        })
    }

    fn set_surface_fullscreen(&mut self, _surface_id: u64, _fullscreen: bool) -> Option<WindowInfo> {
        // minifb cannot reshape an existing window; force recreation.
        None
    }

    fn resize_surface(&mut self, surface_id: u64, width: u32, height: u32) -> WindowInfo {
        WindowInfo::new(surface_id, width, height)
    }

    fn supports_exclusive_fullscreen(&self) -> bool {
        false
    }
}

const USAGE: &str = "Usage: vmhost [OPTIONS] [DISC]

Options:
  --bios        Boot the BIOS without a disc
  --fullscreen  Start fullscreen
  -h, --help    Show this help

Hotkeys: P pause, F3 open disc, F5 save slot 1, F6 load slot 1,
F10 software renderer toggle, F11 fullscreen, F12 reset, Esc quit";

fn pick_disc() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .add_filter("Disc Images", &["iso", "bin", "img", "chd"])
        .pick_file()
}

fn main() {
    env_logger::init();

    let mut bios_only = false;
    let mut fullscreen_flag = false;
    let mut disc_arg: Option<PathBuf> = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--bios" => bios_only = true,
            "--fullscreen" => fullscreen_flag = true,
            "--help" | "-h" => {
                println!("{}", USAGE);
                return;
            }
            other if other.starts_with("--") => {
                eprintln!("Unknown option: {}", other);
                println!("{}", USAGE);
                return;
            }
            other => {
                if disc_arg.is_none() {
                    disc_arg = Some(PathBuf::from(other));
                }
            }
        }
    }

    let settings = Rc::new(RefCell::new(Settings::load()));
    let registry = {
        let settings = settings.borrow();
        match &settings.savestate_root {
            Some(root) => SaveSlotRegistry::new(root),
            None => SaveSlotRegistry::new(SaveSlotRegistry::default_root()),
        }
    };

    let config = {
        let settings = settings.borrow();
        WorkerConfig {
            start_fullscreen: settings.start_fullscreen || fullscreen_flag,
            render_to_main: false,
            fast_boot: settings.fast_boot,
            resume_on_boot: settings.resume_on_boot,
            save_resume_on_shutdown: settings.save_resume_on_shutdown,
        }
    };

    let (handle, display_rx) = worker::spawn(
        Box::new(ImageRuntime::new()),
        Box::new(NullRenderer { target: None }),
        Box::new(NullInput),
        registry,
        config,
    );

    let saved_geometry = settings.borrow().display_geometry;
    let persist_settings = Rc::clone(&settings);
    let mut coordinator = DisplayCoordinator::new(
        MinifbHost::new(),
        display_rx,
        saved_geometry,
        Box::new(move |geometry| {
            let mut settings = persist_settings.borrow_mut();
            settings.display_geometry = Some(geometry);
            if let Err(e) = settings.save() {
                eprintln!("Warning: failed to save window geometry: {}", e);
            }
        }),
    );

    let boot = if bios_only {
        BootParameters::bios_only()
    } else {
        let disc = disc_arg
            .or_else(|| settings.borrow().last_disc_path.clone().map(PathBuf::from))
            .or_else(pick_disc);
        match disc {
            Some(path) => {
                let mut settings = settings.borrow_mut();
                settings.last_disc_path = Some(path.to_string_lossy().to_string());
                if let Err(e) = settings.save() {
                    eprintln!("Warning: failed to save settings: {}", e);
                }
                drop(settings);
                BootParameters::for_disc(path)
            }
            None => {
                eprintln!("No disc selected.");
                return;
            }
        }
    };
    handle.start_vm(Arc::new(boot));

    let mut title = String::from("vmhost");
    let mut paused = false;
    let mut software_renderer = false;
    let mut was_active = true;
    let mut framebuffer: Vec<u32> = Vec::new();
    let mut exiting = false;

    loop {
        coordinator.pump();

        for event in handle.poll_events() {
            match event {
                EmuEvent::GameChanged(game) => {
                    title = format!("vmhost - {}", game.title);
                    println!("Now playing: {} [{}]", game.title, game.serial);
                }
                EmuEvent::Paused => paused = true,
                EmuEvent::Resumed => paused = false,
                EmuEvent::Stopped => {
                    // Session over, either via hotkey or window close.
                    exiting = true;
                }
                EmuEvent::Error(message) => eprintln!("Error: {}", message),
                EmuEvent::SaveStateSaved { path, ok } => {
                    if ok {
                        println!("State saved to {}", path.display());
                    }
                }
                EmuEvent::SaveStateLoaded { path, ok } => {
                    if ok {
                        println!("State loaded from {}", path.display());
                    }
                }
                EmuEvent::Starting | EmuEvent::Started => {}
            }
        }
        if exiting {
            break;
        }

        let host = coordinator.host_mut();
        let Some(window) = host.window.as_mut() else {
            // No surface yet (or it is being recreated); keep the
            // worker serviced.
            std::thread::sleep(Duration::from_millis(8));
            continue;
        };

        if !window.is_open() || window.is_key_pressed(Key::Escape, KeyRepeat::No) {
            break;
        }

        if window.is_key_pressed(Key::P, KeyRepeat::No) {
            handle.set_paused(!paused);
        }
        if window.is_key_pressed(Key::F12, KeyRepeat::No) {
            handle.reset_vm();
        }
        if window.is_key_pressed(Key::F10, KeyRepeat::No) {
            software_renderer = !software_renderer;
            handle.switch_renderer(if software_renderer {
                RendererKind::Software
            } else {
                RendererKind::Hardware
            });
        }
        if window.is_key_pressed(Key::F11, KeyRepeat::No) {
            handle.toggle_fullscreen();
        }
        if window.is_key_pressed(Key::F5, KeyRepeat::No) {
            handle.save_state_to_slot(1);
        }
        if window.is_key_pressed(Key::F6, KeyRepeat::No) {
            handle.load_state_from_slot(1);
        }
        if window.is_key_pressed(Key::F3, KeyRepeat::No) {
            if let Some(path) = pick_disc() {
                let mut settings = settings.borrow_mut();
                settings.last_disc_path = Some(path.to_string_lossy().to_string());
                if let Err(e) = settings.save() {
                    eprintln!("Warning: failed to save settings: {}", e);
                }
                drop(settings);
                handle.change_disc(path);
            }
        }

        let active = window.is_active();
        if settings.borrow().pause_on_focus_loss && was_active && !active && !paused {
            handle.set_paused(true);
        }
        was_active = active;

        let (width, height) = window.get_size();
        let backdrop = if paused { 0x0030_1020 } else { 0x0010_1018 };
        framebuffer.resize(width * height, backdrop);
        framebuffer.fill(backdrop);
        let shown_title = if paused {
            format!("{} (paused)", title)
        } else {
            title.clone()
        };
        window.set_title(&shown_title);
        if let Err(e) = window.update_with_buffer(&framebuffer, width, height) {
            eprintln!("Window update error: {}", e);
            break;
        }
    }

    let save_resume = settings.borrow().save_resume_on_shutdown;
    handle.shutdown_vm_blocking(save_resume, || coordinator.pump());
    coordinator.pump();
    drop(handle);

    let settings = settings.borrow();
    if let Err(e) = settings.save() {
        eprintln!("Warning: failed to save settings: {}", e);
    }
}
