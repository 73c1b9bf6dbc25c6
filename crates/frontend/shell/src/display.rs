//! Cross-thread display-surface protocol.
//!
//! The render surface is a native window owned by the UI thread, but
//! its creation is requested by the worker, which is the only side
//! that knows when the renderer needs a target. Requests are fully
//! synchronous round-trips: the worker blocks on a [`Completion`]
//! until the UI thread services the request and hands back an opaque
//! [`WindowInfo`], or a failure the worker must treat as aborting the
//! larger operation.
//!
//! The UI side never hands the worker anything but value types; the
//! worker never holds a reference to UI-owned widgets.

use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};

use vmhost_core::{DisplayError, WindowGeometry, WindowInfo};

use crate::command::Completion;

/// Surface lifecycle requests serviced by the UI thread.
#[derive(Debug)]
pub enum DisplayRequest {
    Create {
        fullscreen: bool,
        render_to_main: bool,
        done: Completion<Result<WindowInfo, DisplayError>>,
    },
    Update {
        fullscreen: bool,
        render_to_main: bool,
        done: Completion<Result<WindowInfo, DisplayError>>,
    },
    Resize {
        width: u32,
        height: u32,
        done: Completion<()>,
    },
    Destroy {
        done: Completion<()>,
    },
}

/// The four mutually exclusive surface layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceTopology {
    /// Floating window.
    Window,
    /// Floating borderless fullscreen window.
    WindowFullscreen,
    /// Pane embedded in the main window.
    MainEmbedded,
    /// Exclusive-fullscreen window (display mode switch).
    ExclusiveFullscreen,
}

impl SurfaceTopology {
    pub fn for_request(fullscreen: bool, render_to_main: bool, exclusive_supported: bool) -> Self {
        if fullscreen {
            if exclusive_supported {
                SurfaceTopology::ExclusiveFullscreen
            } else {
                SurfaceTopology::WindowFullscreen
            }
        } else if render_to_main {
            SurfaceTopology::MainEmbedded
        } else {
            SurfaceTopology::Window
        }
    }

    /// Whether this layout is a standalone window whose geometry is
    /// worth persisting.
    pub fn is_standalone_window(self) -> bool {
        self == SurfaceTopology::Window
    }

    /// Whether this layout needs a container widget around the
    /// surface. Two containerless layouts can swap without recreating
    /// the surface.
    pub fn needs_container(self) -> bool {
        self == SurfaceTopology::MainEmbedded
    }
}

/// Worker-side end of the protocol. Every call blocks until the UI
/// thread services it.
#[derive(Debug, Clone)]
pub struct DisplayProxy {
    tx: Sender<DisplayRequest>,
}

impl DisplayProxy {
    pub fn create(&self, fullscreen: bool, render_to_main: bool) -> Result<WindowInfo, DisplayError> {
        let done = Completion::new();
        self.send(DisplayRequest::Create {
            fullscreen,
            render_to_main,
            done: done.clone(),
        })?;
        done.wait()
    }

    pub fn update(&self, fullscreen: bool, render_to_main: bool) -> Result<WindowInfo, DisplayError> {
        let done = Completion::new();
        self.send(DisplayRequest::Update {
            fullscreen,
            render_to_main,
            done: done.clone(),
        })?;
        done.wait()
    }

    pub fn resize(&self, width: u32, height: u32) {
        let done = Completion::new();
        if self
            .send(DisplayRequest::Resize {
                width,
                height,
                done: done.clone(),
            })
            .is_ok()
        {
            done.wait();
        }
    }

    pub fn destroy(&self) {
        let done = Completion::new();
        if self.send(DisplayRequest::Destroy { done: done.clone() }).is_ok() {
            done.wait();
        }
    }

    /// Queue a destroy without waiting for it. Used on the worker's
    /// exit path, where the UI may already be joining the worker and
    /// can no longer service a round-trip.
    pub fn destroy_detached(&self) {
        let _ = self.send(DisplayRequest::Destroy {
            done: Completion::new(),
        });
    }

    fn send(&self, req: DisplayRequest) -> Result<(), DisplayError> {
        self.tx.send(req).map_err(|_| DisplayError::Disconnected)
    }
}

/// Create the worker/UI ends of the display channel.
pub fn display_channel() -> (DisplayProxy, Receiver<DisplayRequest>) {
    let (tx, rx) = channel();
    (DisplayProxy { tx }, rx)
}

/// Constructs and destroys the concrete surface widgets on the UI
/// thread. Implemented with a real windowing backend in the shell
/// binary and with a recording mock in tests.
pub trait SurfaceHost {
    /// Build the surface for `topology`. `geometry` is the restored
    /// placement for standalone windows.
    fn create_surface(
        &mut self,
        topology: SurfaceTopology,
        geometry: Option<WindowGeometry>,
    ) -> Result<WindowInfo, DisplayError>;

    fn destroy_surface(&mut self, surface_id: u64);

    /// Current geometry of a standalone surface, if the host can
    /// report it.
    fn surface_geometry(&self, surface_id: u64) -> Option<WindowGeometry>;

    /// Switch an existing containerless surface between windowed and
    /// borderless fullscreen without recreating it. `None` means the
    /// host cannot and the coordinator must recreate.
    fn set_surface_fullscreen(&mut self, surface_id: u64, fullscreen: bool)
        -> Option<WindowInfo>;

    fn resize_surface(&mut self, surface_id: u64, width: u32, height: u32) -> WindowInfo;

    fn supports_exclusive_fullscreen(&self) -> bool;
}

struct ActiveSurface {
    info: WindowInfo,
    topology: SurfaceTopology,
}

/// UI-side service loop for display requests.
///
/// At most one surface is live at a time. Geometry of a standalone
/// window is persisted through `persist_geometry` before the surface
/// is torn down or reshaped away from standalone.
pub struct DisplayCoordinator<H: SurfaceHost> {
    host: H,
    rx: Receiver<DisplayRequest>,
    active: Option<ActiveSurface>,
    /// Set when any surface in the current session was shown as a
    /// standalone window.
    session_standalone: bool,
    saved_geometry: Option<WindowGeometry>,
    persist_geometry: Box<dyn FnMut(WindowGeometry)>,
}

impl<H: SurfaceHost> DisplayCoordinator<H> {
    pub fn new(
        host: H,
        rx: Receiver<DisplayRequest>,
        saved_geometry: Option<WindowGeometry>,
        persist_geometry: Box<dyn FnMut(WindowGeometry)>,
    ) -> Self {
        Self {
            host,
            rx,
            active: None,
            session_standalone: false,
            saved_geometry,
            persist_geometry,
        }
    }

    pub fn has_live_surface(&self) -> bool {
        self.active.is_some()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Service every pending request. Called from the UI event loop
    /// and from blocking waits that must keep the worker unblocked.
    pub fn pump(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(req) => self.service(req),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
            }
        }
    }

    fn service(&mut self, req: DisplayRequest) {
        match req {
            DisplayRequest::Create {
                fullscreen,
                render_to_main,
                done,
            } => done.signal(self.create(fullscreen, render_to_main)),
            DisplayRequest::Update {
                fullscreen,
                render_to_main,
                done,
            } => done.signal(self.update(fullscreen, render_to_main)),
            DisplayRequest::Resize {
                width,
                height,
                done,
            } => {
                self.resize(width, height);
                done.signal(());
            }
            DisplayRequest::Destroy { done } => {
                self.destroy();
                done.signal(());
            }
        }
    }

    fn topology_for(&self, fullscreen: bool, render_to_main: bool) -> SurfaceTopology {
        SurfaceTopology::for_request(
            fullscreen,
            render_to_main,
            self.host.supports_exclusive_fullscreen(),
        )
    }

    fn create(
        &mut self,
        fullscreen: bool,
        render_to_main: bool,
    ) -> Result<WindowInfo, DisplayError> {
        if self.active.is_some() {
            // One live handle per session; a leaked create is a bug
            // upstream.
            log::warn!("display create requested while a surface is live; destroying old surface");
            self.destroy();
        }

        let topology = self.topology_for(fullscreen, render_to_main);
        let geometry = topology
            .is_standalone_window()
            .then_some(self.saved_geometry)
            .flatten();
        let info = self.host.create_surface(topology, geometry)?;
        self.session_standalone = topology.is_standalone_window();
        self.active = Some(ActiveSurface { info, topology });
        log::debug!("display created: {:?} ({}x{})", topology, info.width, info.height);
        Ok(info)
    }

    fn update(
        &mut self,
        fullscreen: bool,
        render_to_main: bool,
    ) -> Result<WindowInfo, DisplayError> {
        let (old_topology, old_info) = match self.active.as_ref() {
            Some(active) => (active.topology, active.info),
            None => {
                return Err(DisplayError::RetargetFailed(
                    "no live surface to update".to_string(),
                ))
            }
        };

        let topology = self.topology_for(fullscreen, render_to_main);
        if topology == old_topology {
            return Ok(old_info);
        }

        // Toggling fullscreen with render-to-main off keeps the same
        // containerless window; adjust it in place instead of
        // recreating the surface.
        let containerless_swap = !old_topology.needs_container()
            && !topology.needs_container()
            && topology != SurfaceTopology::ExclusiveFullscreen
            && old_topology != SurfaceTopology::ExclusiveFullscreen;
        if containerless_swap {
            let id = old_info.surface_id;
            if old_topology.is_standalone_window() {
                self.stash_geometry(id);
            }
            if let Some(info) = self.host.set_surface_fullscreen(id, fullscreen) {
                let active = self.active.as_mut().unwrap();
                active.info = info;
                active.topology = topology;
                self.session_standalone |= topology.is_standalone_window();
                log::debug!("display toggled in place to {:?}", topology);
                return Ok(info);
            }
        }

        // Full recreation: persist geometry, drop the old widget,
        // build the new layout.
        let id = old_info.surface_id;
        if old_topology.is_standalone_window() {
            self.stash_geometry(id);
        }
        self.host.destroy_surface(id);
        self.active = None;

        let geometry = topology
            .is_standalone_window()
            .then_some(self.saved_geometry)
            .flatten();
        let info = self.host.create_surface(topology, geometry)?;
        self.session_standalone |= topology.is_standalone_window();
        self.active = Some(ActiveSurface { info, topology });
        log::debug!("display recreated as {:?}", topology);
        Ok(info)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if let Some(active) = self.active.as_mut() {
            active.info = self
                .host
                .resize_surface(active.info.surface_id, width, height);
        }
    }

    fn destroy(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        if active.topology.is_standalone_window() {
            self.stash_geometry(active.info.surface_id);
        }
        if self.session_standalone {
            if let Some(geometry) = self.saved_geometry {
                (self.persist_geometry)(geometry);
            }
        }
        self.host.destroy_surface(active.info.surface_id);
        self.session_standalone = false;
        log::debug!("display destroyed");
    }

    fn stash_geometry(&mut self, surface_id: u64) {
        if let Some(geometry) = self.host.surface_geometry(surface_id) {
            self.saved_geometry = Some(geometry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct MockHost {
        next_id: u64,
        live: Vec<u64>,
        created: Vec<(SurfaceTopology, Option<WindowGeometry>)>,
        destroyed: Vec<u64>,
        exclusive_supported: bool,
        inplace_toggle: bool,
        geometry: WindowGeometry,
    }

    impl MockHost {
        fn new() -> Self {
            Self {
                next_id: 1,
                live: Vec::new(),
                created: Vec::new(),
                destroyed: Vec::new(),
                exclusive_supported: false,
                inplace_toggle: false,
                geometry: WindowGeometry {
                    x: 30,
                    y: 40,
                    width: 800,
                    height: 600,
                },
            }
        }
    }

    impl SurfaceHost for MockHost {
        fn create_surface(
            &mut self,
            topology: SurfaceTopology,
            geometry: Option<WindowGeometry>,
        ) -> Result<WindowInfo, DisplayError> {
            let id = self.next_id;
            self.next_id += 1;
            self.live.push(id);
            self.created.push((topology, geometry));
            Ok(WindowInfo::new(id, 640, 480))
        }

        fn destroy_surface(&mut self, surface_id: u64) {
            self.live.retain(|&id| id != surface_id);
            self.destroyed.push(surface_id);
        }

        fn surface_geometry(&self, surface_id: u64) -> Option<WindowGeometry> {
            self.live.contains(&surface_id).then_some(self.geometry)
        }

        fn set_surface_fullscreen(
            &mut self,
            surface_id: u64,
            _fullscreen: bool,
        ) -> Option<WindowInfo> {
            (self.inplace_toggle && self.live.contains(&surface_id))
                .then_some(WindowInfo::new(surface_id, 1920, 1080))
        }

        fn resize_surface(&mut self, surface_id: u64, width: u32, height: u32) -> WindowInfo {
            WindowInfo::new(surface_id, width, height)
        }

        fn supports_exclusive_fullscreen(&self) -> bool {
            self.exclusive_supported
        }
    }

    fn coordinator_with(
        host: MockHost,
    ) -> (
        DisplayCoordinator<MockHost>,
        Rc<RefCell<Vec<WindowGeometry>>>,
    ) {
        let (_proxy, rx) = display_channel();
        let persisted = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&persisted);
        let coordinator = DisplayCoordinator::new(
            host,
            rx,
            None,
            Box::new(move |geometry| sink.borrow_mut().push(geometry)),
        );
        (coordinator, persisted)
    }

    fn create(
        coordinator: &mut DisplayCoordinator<MockHost>,
        fullscreen: bool,
        render_to_main: bool,
    ) -> Result<WindowInfo, DisplayError> {
        coordinator.create(fullscreen, render_to_main)
    }

    #[test]
    fn topology_covers_all_four_layouts() {
        assert_eq!(
            SurfaceTopology::for_request(false, false, false),
            SurfaceTopology::Window
        );
        assert_eq!(
            SurfaceTopology::for_request(false, true, false),
            SurfaceTopology::MainEmbedded
        );
        assert_eq!(
            SurfaceTopology::for_request(true, true, false),
            SurfaceTopology::WindowFullscreen
        );
        assert_eq!(
            SurfaceTopology::for_request(true, false, true),
            SurfaceTopology::ExclusiveFullscreen
        );
        // render-to-main is ignored while fullscreen
        assert_eq!(
            SurfaceTopology::for_request(true, true, true),
            SurfaceTopology::ExclusiveFullscreen
        );
    }

    #[test]
    fn create_update_destroy_leaves_no_live_handle() {
        let (mut coordinator, persisted) = coordinator_with(MockHost::new());

        let info = create(&mut coordinator, false, true).expect("create");
        assert_eq!(coordinator.host().created[0].0, SurfaceTopology::MainEmbedded);

        let updated = coordinator.update(true, true).expect("update");
        assert_ne!(updated.surface_id, info.surface_id, "embedded -> fullscreen recreates");
        assert_eq!(coordinator.host().created[1].0, SurfaceTopology::WindowFullscreen);

        coordinator.destroy();
        assert!(!coordinator.has_live_surface());
        assert!(coordinator.host().live.is_empty());
        // never shown standalone, so nothing was persisted
        assert!(persisted.borrow().is_empty());
    }

    #[test]
    fn standalone_window_geometry_is_persisted_on_destroy() {
        let (mut coordinator, persisted) = coordinator_with(MockHost::new());

        create(&mut coordinator, false, false).expect("create");
        assert_eq!(coordinator.host().created[0].0, SurfaceTopology::Window);

        coordinator.destroy();
        let persisted = persisted.borrow();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].width, 800);
    }

    #[test]
    fn update_with_unchanged_topology_keeps_the_surface() {
        let (mut coordinator, _) = coordinator_with(MockHost::new());

        let info = create(&mut coordinator, false, true).expect("create");
        let again = coordinator.update(false, true).expect("update");
        assert_eq!(again.surface_id, info.surface_id);
        assert_eq!(coordinator.host().created.len(), 1);
    }

    #[test]
    fn containerless_fullscreen_toggle_skips_recreation() {
        let mut host = MockHost::new();
        host.inplace_toggle = true;
        let (mut coordinator, _) = coordinator_with(host);

        let info = create(&mut coordinator, false, false).expect("create");
        let toggled = coordinator.update(true, false).expect("toggle");
        assert_eq!(toggled.surface_id, info.surface_id);
        assert_eq!(coordinator.host().created.len(), 1, "no new surface built");
        assert!(coordinator.host().destroyed.is_empty());
    }

    #[test]
    fn recreated_standalone_window_restores_saved_geometry() {
        let (mut coordinator, _) = coordinator_with(MockHost::new());

        create(&mut coordinator, false, false).expect("create");
        coordinator.update(true, false).expect("to fullscreen");
        coordinator.update(false, false).expect("back to windowed");

        let last_create = coordinator.host().created.last().unwrap();
        assert_eq!(last_create.0, SurfaceTopology::Window);
        assert_eq!(
            last_create.1,
            Some(WindowGeometry {
                x: 30,
                y: 40,
                width: 800,
                height: 600,
            })
        );
    }

    #[test]
    fn exclusive_fullscreen_requires_host_support() {
        let mut host = MockHost::new();
        host.exclusive_supported = true;
        let (mut coordinator, _) = coordinator_with(host);

        create(&mut coordinator, true, false).expect("create");
        assert_eq!(
            coordinator.host().created[0].0,
            SurfaceTopology::ExclusiveFullscreen
        );
    }

    #[test]
    fn update_without_surface_is_an_error() {
        let (mut coordinator, _) = coordinator_with(MockHost::new());
        assert!(coordinator.update(true, false).is_err());
    }

    #[test]
    fn resize_round_trip_updates_window_info() {
        let (mut coordinator, _) = coordinator_with(MockHost::new());
        create(&mut coordinator, false, true).expect("create");
        coordinator.resize(1024, 768);
        let active = coordinator.active.as_ref().unwrap();
        assert_eq!((active.info.width, active.info.height), (1024, 768));
    }

    #[test]
    fn destroy_with_no_surface_is_a_no_op() {
        let (mut coordinator, persisted) = coordinator_with(MockHost::new());
        coordinator.destroy();
        assert!(persisted.borrow().is_empty());
        assert!(coordinator.host().destroyed.is_empty());
    }

    #[test]
    fn proxy_round_trip_through_the_channel() {
        let (proxy, rx) = display_channel();
        let persisted = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&persisted);
        let mut coordinator = DisplayCoordinator::new(
            MockHost::new(),
            rx,
            None,
            Box::new(move |geometry| sink.borrow_mut().push(geometry)),
        );

        // Service the blocking request from another thread acting as
        // the worker.
        let worker = std::thread::spawn(move || {
            let info = proxy.create(false, true).expect("create");
            proxy.destroy();
            info
        });
        while !worker.is_finished() {
            coordinator.pump();
            std::thread::yield_now();
        }
        coordinator.pump();
        let info = worker.join().expect("worker thread");
        assert_eq!(info.width, 640);
        assert!(!coordinator.has_live_surface());
    }
}

