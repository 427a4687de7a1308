use super::{
    render_thread::{self, Renderer},
    NativeWindow, SurfaceCallbacks, SurfaceState,
};
use crate::{
    context::{ContextHints, GraphicsBinding},
    error::{Error, Result},
    event::{EventKind, SurfaceEvent},
    event_loop::EventSender,
    handle::{ContextHandle, DisplayHandle, SurfaceHandle, WindowHandle},
};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    ffi::c_void,
    fmt,
    ptr::NonNull,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub context: ContextHints,
    /// Context to share objects with when creating this surface's context.
    pub share: Option<ContextHandle>,
    /// Sleep between frames. `None` renders back to back.
    pub frame_interval: Option<Duration>,
    pub thread_name: String,
}

impl CoordinatorConfig {
    pub fn with_context(mut self, context: ContextHints) -> Self {
        self.context = context;
        self
    }

    pub fn with_share(mut self, share: ContextHandle) -> Self {
        self.share = Some(share);
        self
    }

    pub fn with_frame_interval(mut self, frame_interval: Option<Duration>) -> Self {
        self.frame_interval = frame_interval;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            context: ContextHints::default(),
            share: None,
            frame_interval: Some(Duration::from_millis(16)),
            thread_name: String::from("tether-render"),
        }
    }
}

pub(super) struct Inner {
    pub(super) state: SurfaceState,
    pub(super) native: Option<NativeWindow>,
    pub(super) display: Option<DisplayHandle>,
    pub(super) context: Option<ContextHandle>,
    pub(super) surface: Option<SurfaceHandle>,
    pub(super) viewport: (u32, u32),
    pub(super) pending_resize: Option<(u32, u32)>,
    pub(super) generation: u64,
    pub(super) frames: u64,
    pub(super) running: bool,
    thread: Option<JoinHandle<Box<dyn Renderer>>>,
    renderer: Option<Box<dyn Renderer>>,
}

impl Inner {
    pub(super) fn teardown_graphics(
        &mut self,
        graphics: &GraphicsBinding,
        events: &EventSender,
        window: Option<WindowHandle>,
    ) {
        let display = match self.display {
            Some(display) => display,
            None => return,
        };
        if let Some(surface) = self.surface.take() {
            if let Err(e) = graphics.destroy_surface(display, surface) {
                events.diagnostic(window, "destroy_surface", &e);
            }
        }
        if let Some(context) = self.context.take() {
            if let Err(e) = graphics.destroy_context(display, context) {
                events.diagnostic(window, "destroy_context", &e);
            }
        }
    }
}

pub(super) struct Shared {
    pub(super) inner: Mutex<Inner>,
    /// Signalled by the render thread once it has vacated the surface.
    pub(super) exited: Condvar,
    /// Read by the render thread once per frame without taking the lock.
    pub(super) stop: AtomicBool,
    pub(super) graphics: GraphicsBinding,
    pub(super) events: EventSender,
    pub(super) window: Option<WindowHandle>,
    pub(super) config: CoordinatorConfig,
}

/// Binds one OS-owned native surface to a render thread and a graphics context.
///
/// The coordinator is driven by the three [`SurfaceCallbacks`]. A single mutex
/// per coordinator serializes them against the render thread; the render
/// thread only ever swaps while holding it, so a surface is never presented
/// while a callback tears it down.
///
/// `surface_destroyed` blocks until the render thread has finished its current
/// frame, released the context and exited. Its latency is therefore bounded
/// by one frame plus `frame_interval`.
pub struct SurfaceCoordinator {
    shared: Arc<Shared>,
}

impl fmt::Debug for SurfaceCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (state, running) = self.status();
        f.debug_struct("SurfaceCoordinator")
            .field("window", &self.shared.window)
            .field("state", &state)
            .field("running", &running)
            .finish()
    }
}

impl SurfaceCoordinator {
    pub fn new(
        graphics: GraphicsBinding,
        events: EventSender,
        window: Option<WindowHandle>,
        renderer: Box<dyn Renderer>,
        config: CoordinatorConfig,
    ) -> Self {
        let inner = Inner {
            state: SurfaceState::Absent,
            native: None,
            display: None,
            context: None,
            surface: None,
            viewport: (0, 0),
            pending_resize: None,
            generation: 0,
            frames: 0,
            running: false,
            thread: None,
            renderer: Some(renderer),
        };
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                exited: Condvar::new(),
                stop: AtomicBool::new(false),
                graphics,
                events,
                window,
                config,
            }),
        }
    }

    pub fn window(&self) -> Option<WindowHandle> {
        self.shared.window
    }

    pub fn state(&self) -> SurfaceState {
        self.shared.inner.lock().state
    }

    /// State and whether the render thread is running, read atomically.
    pub fn status(&self) -> (SurfaceState, bool) {
        let inner = self.shared.inner.lock();
        (inner.state, inner.running)
    }

    pub fn is_rendering(&self) -> bool {
        self.shared.inner.lock().running
    }

    pub fn viewport(&self) -> Option<(u32, u32)> {
        let inner = self.shared.inner.lock();
        match inner.state {
            SurfaceState::Ready => Some(inner.viewport),
            _ => None,
        }
    }

    pub fn surface(&self) -> Option<SurfaceHandle> {
        self.shared.inner.lock().surface
    }

    pub fn context(&self) -> Option<ContextHandle> {
        self.shared.inner.lock().context
    }

    /// Increments every time a new window surface reaches `Ready`.
    pub fn generation(&self) -> u64 {
        self.shared.inner.lock().generation
    }

    pub fn frames_rendered(&self) -> u64 {
        self.shared.inner.lock().frames
    }

    pub fn graphics(&self) -> &GraphicsBinding {
        &self.shared.graphics
    }

    /// Entry point lookup for external graphics API loaders.
    pub fn get_proc_address(&self, name: &str) -> Option<NonNull<c_void>> {
        self.shared.graphics.get_proc_address(name)
    }

    fn report(&self, source: &'static str, error: &dyn fmt::Display) {
        self.shared.events.diagnostic(self.shared.window, source, error);
    }

    fn raise(&self, kind: EventKind) {
        if let Err(e) = self.shared.events.raise(self.shared.window, kind) {
            debug!("dropping surface event: {}", e);
        }
    }

    /// Joins a render thread that has already acknowledged its exit and takes
    /// the renderer back.
    fn reap(&self, inner: &mut Inner) {
        if inner.running {
            return;
        }
        if let Some(thread) = inner.thread.take() {
            match thread.join() {
                Ok(renderer) => inner.renderer = Some(renderer),
                Err(_) => self.report("render thread", &"render thread panicked"),
            }
        }
    }

    fn stop_render_thread(&self, inner: &mut MutexGuard<'_, Inner>) {
        if inner.running {
            self.shared.stop.store(true, Ordering::Release);
            while inner.running {
                self.shared.exited.wait(inner);
            }
        }
        self.reap(inner);
        self.shared.stop.store(false, Ordering::Release);
    }

    fn create_graphics(&self, inner: &mut Inner, width: u32, height: u32) -> Result<()> {
        let graphics = &self.shared.graphics;
        let native = inner
            .native
            .ok_or_else(|| Error::Other("no native surface".into()))?;
        let display = match inner.display {
            Some(display) => display,
            None => {
                let display = graphics.initialize()?;
                inner.display = Some(display);
                display
            }
        };
        let hints = &self.shared.config.context;
        let config = graphics.choose_config(display, hints)?;
        if inner.context.is_none() {
            inner.context =
                Some(graphics.create_context(display, config, self.shared.config.share, hints)?);
        }
        inner.surface = Some(graphics.create_window_surface(display, config, &native, width, height)?);
        Ok(())
    }

    /// `Created -> Ready`: build context and surface, then start rendering.
    fn bring_up(&self, inner: &mut Inner, width: u32, height: u32) {
        if let Err(e) = self.create_graphics(inner, width, height) {
            inner.teardown_graphics(&self.shared.graphics, &self.shared.events, self.shared.window);
            self.report("surface bring-up", &e);
            return;
        }
        let renderer = match inner.renderer.take() {
            Some(renderer) => renderer,
            None => {
                inner.teardown_graphics(&self.shared.graphics, &self.shared.events, self.shared.window);
                self.report("surface bring-up", &"renderer was lost with a previous render thread");
                return;
            }
        };
        inner.state = SurfaceState::Ready;
        inner.viewport = (width, height);
        inner.pending_resize = None;
        inner.generation += 1;
        self.raise(EventKind::Resize { width, height });
        self.raise(EventKind::Surface(SurfaceEvent::Changed { width, height }));

        // The thread blocks on the lock we hold until this callback returns.
        match render_thread::spawn(self.shared.clone(), renderer) {
            Ok(thread) => {
                inner.running = true;
                inner.thread = Some(thread);
                info!(
                    "surface ready at {}x{} (generation {})",
                    width, height, inner.generation
                );
            }
            Err(e) => {
                inner.state = SurfaceState::Created;
                inner.teardown_graphics(&self.shared.graphics, &self.shared.events, self.shared.window);
                self.report("render thread spawn", &e);
            }
        }
    }

    fn resize_in_place(&self, inner: &mut Inner, width: u32, height: u32) {
        if inner.viewport == (width, height) {
            debug!("surface changed without a size change");
            return;
        }
        if let (Some(display), Some(surface)) = (inner.display, inner.surface) {
            if let Err(e) = self.shared.graphics.resize_surface(display, surface, width, height) {
                self.report("resize_surface", &e);
                return;
            }
        }
        inner.viewport = (width, height);
        inner.pending_resize = Some((width, height));
        self.raise(EventKind::Resize { width, height });
        self.raise(EventKind::Surface(SurfaceEvent::Changed { width, height }));
    }

    /// Stops rendering and drops context and surface, keeping the native surface.
    fn fall_back_to_created(&self, inner: &mut MutexGuard<'_, Inner>) {
        inner.state = SurfaceState::Destroying;
        self.stop_render_thread(inner);
        inner.teardown_graphics(&self.shared.graphics, &self.shared.events, self.shared.window);
        inner.pending_resize = None;
        inner.state = SurfaceState::Created;
    }
}

impl SurfaceCallbacks for SurfaceCoordinator {
    fn surface_created(&self, native: NativeWindow) {
        let mut inner = self.shared.inner.lock();
        self.reap(&mut inner);
        let state = inner.state;
        match state {
            SurfaceState::Absent | SurfaceState::Created => {}
            SurfaceState::Ready => {
                self.report("surface_created", &"new native surface while rendering; replacing");
                self.fall_back_to_created(&mut inner);
            }
            SurfaceState::Destroying => {
                self.report("surface_created", &"callback arrived during teardown");
                return;
            }
        }
        inner.native = Some(native);
        inner.state = SurfaceState::Created;
        drop(inner);
        debug!("native surface created: {:?}", native);
        self.raise(EventKind::Surface(SurfaceEvent::Created));
    }

    fn surface_changed(&self, native: NativeWindow, width: u32, height: u32) {
        let mut inner = self.shared.inner.lock();
        self.reap(&mut inner);
        let state = inner.state;
        match state {
            SurfaceState::Absent => {
                self.report("surface_changed", &"no native surface was created");
            }
            SurfaceState::Destroying => {
                self.report("surface_changed", &"callback arrived during teardown");
            }
            SurfaceState::Created => {
                inner.native = Some(native);
                self.bring_up(&mut inner, width, height);
            }
            SurfaceState::Ready if inner.native != Some(native) => {
                debug!("native surface replaced, rebuilding window surface");
                self.fall_back_to_created(&mut inner);
                inner.native = Some(native);
                self.bring_up(&mut inner, width, height);
            }
            SurfaceState::Ready => self.resize_in_place(&mut inner, width, height),
        }
    }

    fn surface_destroyed(&self) {
        let mut inner = self.shared.inner.lock();
        let state = inner.state;
        match state {
            SurfaceState::Absent => {
                self.report("surface_destroyed", &"no native surface to destroy");
                return;
            }
            SurfaceState::Destroying => {
                self.report("surface_destroyed", &"teardown already in progress");
                return;
            }
            SurfaceState::Created | SurfaceState::Ready => {}
        }
        inner.state = SurfaceState::Destroying;
        self.stop_render_thread(&mut inner);
        inner.teardown_graphics(&self.shared.graphics, &self.shared.events, self.shared.window);
        inner.native = None;
        inner.pending_resize = None;
        inner.state = SurfaceState::Absent;
        drop(inner);
        debug!("native surface destroyed");
        self.raise(EventKind::Surface(SurfaceEvent::Destroyed));
    }
}

impl Drop for SurfaceCoordinator {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        if inner.state != SurfaceState::Absent || inner.thread.is_some() {
            warn!("surface coordinator dropped in state {}", inner.state);
            self.stop_render_thread(&mut inner);
            inner.teardown_graphics(&self.shared.graphics, &self.shared.events, self.shared.window);
            inner.state = SurfaceState::Absent;
        }
        if let Some(display) = inner.display.take() {
            if let Err(e) = self.shared.graphics.terminate(display) {
                debug!("terminate on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::soft::SoftGraphics, event_loop::EventQueue, surface::Frame};
    use raw_window_handle::{
        RawDisplayHandle, RawWindowHandle, WebDisplayHandle, WebWindowHandle,
    };
    use std::{
        sync::atomic::AtomicU32,
        thread,
        time::Instant,
    };

    fn native(id: u32) -> NativeWindow {
        let mut window = WebWindowHandle::empty();
        window.id = id;
        NativeWindow::new(
            RawWindowHandle::Web(window),
            RawDisplayHandle::Web(WebDisplayHandle::empty()),
        )
    }

    /// Publishes how many times this one instance has been resumed.
    struct Sessions {
        resumed: u32,
        seen: Arc<AtomicU32>,
        fail: bool,
    }

    impl Renderer for Sessions {
        fn resumed(&mut self, _graphics: &GraphicsBinding) {
            self.resumed += 1;
            self.seen.store(self.resumed, Ordering::SeqCst);
        }

        fn render(&mut self, _frame: &mut Frame<'_>) -> Result<()> {
            if self.fail {
                self.fail = false;
                return Err(Error::ContextLost);
            }
            Ok(())
        }
    }

    fn coordinator(fail: bool) -> (SurfaceCoordinator, Arc<SoftGraphics>, Arc<AtomicU32>, EventQueue) {
        let _ = env_logger::builder().is_test(true).try_init();
        let soft = Arc::new(SoftGraphics::new());
        let queue = EventQueue::new();
        let seen = Arc::new(AtomicU32::new(0));
        let renderer = Sessions {
            resumed: 0,
            seen: seen.clone(),
            fail,
        };
        let coordinator = SurfaceCoordinator::new(
            GraphicsBinding::new(soft.clone()),
            queue.sender(),
            None,
            Box::new(renderer),
            CoordinatorConfig::default().with_frame_interval(Some(Duration::from_millis(1))),
        );
        (coordinator, soft, seen, queue)
    }

    fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn holds_renderer(coordinator: &SurfaceCoordinator) -> (bool, bool) {
        let inner = coordinator.shared.inner.lock();
        (inner.thread.is_some(), inner.renderer.is_some())
    }

    #[test]
    fn destroy_joins_the_render_thread_and_takes_the_renderer_back() {
        let (coordinator, soft, seen, _queue) = coordinator(false);
        coordinator.surface_created(native(1));
        coordinator.surface_changed(native(1), 64, 48);
        assert_eq!(coordinator.status(), (SurfaceState::Ready, true));
        assert_eq!(holds_renderer(&coordinator), (true, false));
        wait_for("the first session", || seen.load(Ordering::SeqCst) == 1);

        coordinator.surface_destroyed();
        assert_eq!(coordinator.status(), (SurfaceState::Absent, false));
        assert_eq!(holds_renderer(&coordinator), (false, true));
        assert!(!coordinator.shared.stop.load(Ordering::Acquire));
        assert_eq!(soft.bound_surfaces(), 0);

        coordinator.surface_created(native(2));
        coordinator.surface_changed(native(2), 64, 48);
        assert_eq!(coordinator.status(), (SurfaceState::Ready, true));
        assert_eq!(coordinator.generation(), 2);
        wait_for("a second session", || seen.load(Ordering::SeqCst) == 2);
        coordinator.surface_destroyed();
    }

    #[test]
    fn a_render_thread_that_gave_up_is_reaped_by_the_next_callback() {
        let (coordinator, soft, seen, _queue) = coordinator(true);
        coordinator.surface_created(native(1));
        coordinator.surface_changed(native(1), 32, 32);
        wait_for("the render thread to give up", || !coordinator.is_rendering());
        assert_eq!(coordinator.state(), SurfaceState::Created);
        // Exited but not yet joined.
        assert_eq!(holds_renderer(&coordinator), (true, false));
        assert_eq!(soft.live_surfaces(), 0);

        coordinator.surface_changed(native(1), 32, 32);
        assert_eq!(coordinator.status(), (SurfaceState::Ready, true));
        assert_eq!(coordinator.generation(), 2);
        wait_for("a second session", || seen.load(Ordering::SeqCst) == 2);
        coordinator.surface_destroyed();
        assert_eq!(holds_renderer(&coordinator), (false, true));
    }
}
