use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle, WebDisplayHandle, WebWindowHandle};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tether::{
    context::{soft::SoftGraphics, GraphicsBinding},
    event::SurfaceEvent,
    surface::{
        CoordinatorConfig, Frame, NativeWindow, Renderer, SurfaceCallbacks, SurfaceCoordinator,
    },
    Error, EventKind, EventQueue, SurfaceState,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn native(id: u32) -> NativeWindow {
    let mut window = WebWindowHandle::empty();
    window.id = id;
    NativeWindow::new(
        RawWindowHandle::Web(window),
        RawDisplayHandle::Web(WebDisplayHandle::empty()),
    )
}

fn wait_until<F: FnMut() -> bool>(what: &str, mut condition: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

#[derive(Default)]
struct PainterState {
    frames: AtomicU64,
    resumed: AtomicUsize,
    suspended: AtomicUsize,
    viewport: Mutex<(u32, u32)>,
}

/// Paints every frame with its index and remembers what it saw.
struct Painter {
    soft: Arc<SoftGraphics>,
    state: Arc<PainterState>,
}

impl Renderer for Painter {
    fn resumed(&mut self, _graphics: &GraphicsBinding) {
        self.state.resumed.fetch_add(1, Ordering::SeqCst);
    }

    fn render(&mut self, frame: &mut Frame<'_>) -> tether::Result<()> {
        let index = frame.index();
        self.soft.with_back_buffer(frame.surface(), |pixels, width, height| {
            assert_eq!((width, height), frame.viewport());
            for pixel in pixels.iter_mut() {
                *pixel = index as u32;
            }
        });
        *self.state.viewport.lock() = frame.viewport();
        self.state.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn suspended(&mut self) {
        self.state.suspended.fetch_add(1, Ordering::SeqCst);
    }
}

struct Fixture {
    soft: Arc<SoftGraphics>,
    queue: EventQueue,
    coordinator: Arc<SurfaceCoordinator>,
    painter: Arc<PainterState>,
}

fn fixture() -> Fixture {
    init();
    let soft = Arc::new(SoftGraphics::new());
    let queue = EventQueue::new();
    let painter = Arc::new(PainterState::default());
    let renderer = Painter {
        soft: soft.clone(),
        state: painter.clone(),
    };
    let coordinator = SurfaceCoordinator::new(
        GraphicsBinding::new(soft.clone()),
        queue.sender(),
        None,
        Box::new(renderer),
        CoordinatorConfig::default().with_frame_interval(Some(Duration::from_millis(1))),
    );
    Fixture {
        soft,
        queue,
        coordinator: Arc::new(coordinator),
        painter,
    }
}

fn drain(queue: &mut EventQueue) -> Vec<EventKind> {
    let mut kinds = Vec::new();
    queue.drain(|event| kinds.push(event.kind));
    kinds
}

#[test]
fn render_thread_runs_exactly_while_ready() {
    let f = fixture();
    let done = Arc::new(AtomicBool::new(false));
    let sampler = {
        let coordinator = f.coordinator.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut samples = 0u64;
            while !done.load(Ordering::Acquire) {
                match coordinator.status() {
                    (SurfaceState::Ready, running) => assert!(running),
                    (SurfaceState::Absent, running) | (SurfaceState::Created, running) => {
                        assert!(!running)
                    }
                    // The render thread is being stopped.
                    (SurfaceState::Destroying, _) => {}
                }
                samples += 1;
            }
            samples
        })
    };

    for cycle in 0..3u32 {
        f.coordinator.surface_created(native(cycle + 1));
        assert_eq!(f.coordinator.status(), (SurfaceState::Created, false));
        f.coordinator.surface_changed(native(cycle + 1), 640, 480);
        assert_eq!(f.coordinator.status(), (SurfaceState::Ready, true));
        for step in 1..=10 {
            f.coordinator
                .surface_changed(native(cycle + 1), 640 + step * 8, 480);
            assert_eq!(f.coordinator.status(), (SurfaceState::Ready, true));
            thread::sleep(Duration::from_millis(2));
        }
        f.coordinator.surface_destroyed();
        assert_eq!(f.coordinator.status(), (SurfaceState::Absent, false));
    }

    done.store(true, Ordering::Release);
    assert!(sampler.join().unwrap() > 0);
    assert_eq!(f.painter.resumed.load(Ordering::SeqCst), 3);
    assert_eq!(f.painter.suspended.load(Ordering::SeqCst), 3);
}

#[test]
fn destroyed_surface_is_fully_released() {
    let f = fixture();
    f.coordinator.surface_created(native(1));
    f.coordinator.surface_changed(native(1), 320, 240);
    wait_until("a few frames", || f.coordinator.frames_rendered() >= 5);
    let surface = f.coordinator.surface().unwrap();

    f.coordinator.surface_destroyed();
    assert_eq!(f.soft.live_surfaces(), 0);
    assert_eq!(f.soft.live_contexts(), 0);
    assert_eq!(f.soft.bound_surfaces(), 0);
    assert!(!f.soft.is_surface_bound(surface));
    assert!(f.coordinator.surface().is_none());

    let swaps = f.soft.swap_count();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(f.soft.swap_count(), swaps);
}

#[test]
fn resize_reaches_the_next_swap() {
    let mut f = fixture();
    f.coordinator.surface_created(native(1));
    f.coordinator.surface_changed(native(1), 800, 600);
    wait_until("100 frames", || f.coordinator.frames_rendered() >= 100);
    assert!(f
        .soft
        .last_swap()
        .map_or(false, |s| (s.width, s.height) == (800, 600)));

    f.coordinator.surface_changed(native(1), 400, 300);
    let serial = f.soft.swap_count();
    wait_until("a swap after the resize", || f.soft.swap_count() > serial);
    let after = f.soft.swaps_since(serial);
    assert!(!after.is_empty());
    for swap in after {
        assert_eq!((swap.width, swap.height), (400, 300));
    }
    assert_eq!(*f.painter.viewport.lock(), (400, 300));
    assert_eq!(f.coordinator.viewport(), Some((400, 300)));

    let kinds = drain(&mut f.queue);
    let resizes: Vec<_> = kinds
        .iter()
        .filter_map(|k| match k {
            EventKind::Resize { width, height } => Some((*width, *height)),
            _ => None,
        })
        .collect();
    assert_eq!(resizes, vec![(800, 600), (400, 300)]);
    f.coordinator.surface_destroyed();
}

/// Blocks inside `render` until released, so a frame is reliably in flight.
struct Stalling {
    started: flume::Sender<u64>,
    release: flume::Receiver<()>,
    finished: Arc<AtomicU64>,
}

impl Renderer for Stalling {
    fn render(&mut self, frame: &mut Frame<'_>) -> tether::Result<()> {
        let _ = self.started.send(frame.index());
        if frame.index() == 1 {
            let _ = self.release.recv_timeout(Duration::from_secs(5));
        }
        self.finished.store(frame.index(), Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn destroy_waits_for_the_frame_in_flight() {
    init();
    let soft = Arc::new(SoftGraphics::new());
    let queue = EventQueue::new();
    let (started_tx, started) = flume::unbounded();
    let (release, release_rx) = flume::unbounded();
    let finished = Arc::new(AtomicU64::new(0));
    let coordinator = Arc::new(SurfaceCoordinator::new(
        GraphicsBinding::new(soft.clone()),
        queue.sender(),
        None,
        Box::new(Stalling {
            started: started_tx,
            release: release_rx,
            finished: finished.clone(),
        }),
        CoordinatorConfig::default(),
    ));
    coordinator.surface_created(native(1));
    coordinator.surface_changed(native(1), 64, 64);
    assert_eq!(started.recv_timeout(Duration::from_secs(5)).unwrap(), 1);

    let returned = Arc::new(AtomicBool::new(false));
    let destroyer = {
        let coordinator = coordinator.clone();
        let returned = returned.clone();
        thread::spawn(move || {
            coordinator.surface_destroyed();
            returned.store(true, Ordering::SeqCst);
        })
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!returned.load(Ordering::SeqCst), "destroy returned mid-frame");
    assert_eq!(soft.swap_count(), 0);

    release.send(()).unwrap();
    destroyer.join().unwrap();
    // The frame in flight completed and was presented before teardown.
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(soft.swap_count(), 1);
    assert_eq!(soft.live_surfaces(), 0);
    assert_eq!(coordinator.status(), (SurfaceState::Absent, false));

    thread::sleep(Duration::from_millis(20));
    assert_eq!(soft.swap_count(), 1);
}

#[test]
fn lost_context_falls_back_to_created_and_recovers() {
    let mut f = fixture();
    f.coordinator.surface_created(native(1));
    f.coordinator.surface_changed(native(1), 200, 100);
    wait_until("first frame", || f.coordinator.frames_rendered() > 0);

    let context = f.coordinator.context().unwrap();
    assert!(f.soft.lose_context(context));
    wait_until("fallback", || {
        f.coordinator.status() == (SurfaceState::Created, false)
    });
    assert_eq!(f.soft.live_contexts(), 0);
    assert!(drain(&mut f.queue).iter().any(|k| matches!(
        k,
        EventKind::Diagnostic(d) if d.message == Error::ContextLost.to_string()
    )));

    f.coordinator.surface_changed(native(1), 200, 100);
    assert_eq!(f.coordinator.status(), (SurfaceState::Ready, true));
    assert_eq!(f.coordinator.generation(), 2);
    let frames = f.coordinator.frames_rendered();
    wait_until("rendering again", || f.coordinator.frames_rendered() > frames);
    assert_eq!(f.painter.resumed.load(Ordering::SeqCst), 2);
    f.coordinator.surface_destroyed();
}

#[test]
fn failed_bring_up_stays_created() {
    let mut f = fixture();
    f.soft.fail_next(
        tether::context::soft::SoftCall::CreateWindowSurface,
        tether::NativeError::BadAlloc,
    );
    f.coordinator.surface_created(native(1));
    f.coordinator.surface_changed(native(1), 200, 100);
    assert_eq!(f.coordinator.status(), (SurfaceState::Created, false));
    assert_eq!(f.soft.live_surfaces(), 0);
    assert_eq!(f.soft.live_contexts(), 0);
    assert!(drain(&mut f.queue).iter().any(|k| matches!(k, EventKind::Diagnostic(_))));

    // The next surface-changed retries.
    f.coordinator.surface_changed(native(1), 200, 100);
    assert_eq!(f.coordinator.status(), (SurfaceState::Ready, true));
    f.coordinator.surface_destroyed();
}

#[test]
fn replaced_native_surface_rebuilds_the_window_surface() {
    let f = fixture();
    f.coordinator.surface_created(native(1));
    f.coordinator.surface_changed(native(1), 100, 100);
    let first = f.coordinator.surface().unwrap();
    f.coordinator.surface_changed(native(2), 100, 100);
    assert_eq!(f.coordinator.status(), (SurfaceState::Ready, true));
    assert_eq!(f.coordinator.generation(), 2);
    assert_ne!(f.coordinator.surface(), Some(first));
    assert_eq!(f.soft.live_surfaces(), 1);
    f.coordinator.surface_destroyed();
    assert_eq!(f.soft.live_surfaces(), 0);
}

#[test]
fn out_of_order_callbacks_are_reported() {
    let mut f = fixture();
    f.coordinator.surface_changed(native(1), 100, 100);
    f.coordinator.surface_destroyed();
    assert_eq!(f.coordinator.status(), (SurfaceState::Absent, false));
    let diagnostics = drain(&mut f.queue)
        .into_iter()
        .filter(|k| matches!(k, EventKind::Diagnostic(_)))
        .count();
    assert_eq!(diagnostics, 2);
}

#[test]
fn surface_events_are_queued_in_callback_order() {
    let mut f = fixture();
    f.coordinator.surface_created(native(1));
    f.coordinator.surface_changed(native(1), 10, 10);
    f.coordinator.surface_destroyed();
    let surface_events: Vec<_> = drain(&mut f.queue)
        .into_iter()
        .filter_map(|k| match k {
            EventKind::Surface(e) => Some(e),
            _ => None,
        })
        .collect();
    assert_eq!(
        surface_events,
        vec![
            SurfaceEvent::Created,
            SurfaceEvent::Changed {
                width: 10,
                height: 10
            },
            SurfaceEvent::Destroyed,
        ]
    );
}
