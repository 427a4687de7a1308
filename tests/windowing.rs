use std::{
    cell::RefCell,
    rc::Rc,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tether::{
    context::{soft::SoftGraphics, ContextHints, GraphicsApi},
    event::SurfaceEvent,
    headless::HeadlessConfig,
    surface::{CoordinatorConfig, Frame, Renderer},
    window::{BorderStyle, WindowMode},
    ControlFlow, Error, EventKind, EventLoop, Platform, SurfaceState, WindowHints,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn headless(config: HeadlessConfig) -> (EventLoop, Arc<SoftGraphics>) {
    init();
    let soft = Arc::new(SoftGraphics::new());
    let el = EventLoop::with_platform(Platform::Headless(config.with_graphics(soft.clone())))
        .unwrap();
    (el, soft)
}

fn wait_until<F: FnMut() -> bool>(what: &str, mut condition: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

struct Counter(Arc<AtomicU64>);

impl Renderer for Counter {
    fn render(&mut self, _frame: &mut Frame<'_>) -> tether::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn fast() -> CoordinatorConfig {
    CoordinatorConfig::default().with_frame_interval(Some(Duration::from_millis(1)))
}

fn collect(el: &mut EventLoop) -> Rc<RefCell<Vec<EventKind>>> {
    let kinds = Rc::new(RefCell::new(Vec::new()));
    let sink = kinds.clone();
    el.set_handler(move |event, _| sink.borrow_mut().push(event.kind));
    kinds
}

#[test]
fn destroying_a_window_stops_its_renderer_first() {
    let (mut el, soft) = headless(HeadlessConfig::default());
    let window = WindowHints::new()
        .with_title("render")
        .with_size(320, 200)
        .build(&el)
        .unwrap();
    let frames = Arc::new(AtomicU64::new(0));
    let coordinator = window.attach_renderer(Counter(frames.clone()), fast()).unwrap();
    assert_eq!(coordinator.status(), (SurfaceState::Ready, true));
    wait_until("frames", || frames.load(Ordering::SeqCst) >= 3);
    assert_eq!(soft.last_swap().map(|s| (s.width, s.height)), Some((320, 200)));

    window.clone().destroy().unwrap();
    assert!(window.is_destroyed());
    assert_eq!(coordinator.status(), (SurfaceState::Absent, false));
    assert_eq!(soft.live_surfaces(), 0);
    assert_eq!(soft.bound_surfaces(), 0);
    let swaps = soft.swap_count();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(soft.swap_count(), swaps);

    let kinds = collect(&mut el);
    el.process_events(false).unwrap();
    let kinds = kinds.borrow();
    assert_eq!(kinds.last(), Some(&EventKind::Destroyed));
    let created = kinds
        .iter()
        .position(|k| *k == EventKind::Surface(SurfaceEvent::Created))
        .unwrap();
    let destroyed = kinds
        .iter()
        .position(|k| *k == EventKind::Surface(SurfaceEvent::Destroyed))
        .unwrap();
    assert!(created < destroyed);
    assert!(!kinds.iter().any(|k| matches!(k, EventKind::Diagnostic(_))));

    assert!(matches!(
        window.set_title("gone"),
        Err(Error::InvalidHandle(_))
    ));
}

#[test]
fn minimizing_drops_the_surface_and_restoring_rebuilds_it() {
    let (el, soft) = headless(HeadlessConfig::default());
    let window = WindowHints::new().build(&el).unwrap();
    let frames = Arc::new(AtomicU64::new(0));
    let coordinator = window.attach_renderer(Counter(frames.clone()), fast()).unwrap();
    let first = window.native_window().unwrap();

    window.set_mode(WindowMode::Minimized).unwrap();
    assert_eq!(coordinator.status(), (SurfaceState::Absent, false));
    assert_eq!(soft.live_surfaces(), 0);
    assert!(matches!(
        window.focus(),
        Err(Error::UnsupportedValue { .. })
    ));

    window.set_mode(WindowMode::Normal).unwrap();
    assert_eq!(coordinator.status(), (SurfaceState::Ready, true));
    assert_eq!(coordinator.generation(), 2);
    assert_ne!(window.native_window().unwrap(), first);
    window.destroy().unwrap();
}

#[test]
fn resizing_the_window_reaches_the_swap_chain() {
    let (el, soft) = headless(HeadlessConfig::default());
    let window = WindowHints::new().with_size(800, 600).build(&el).unwrap();
    let frames = Arc::new(AtomicU64::new(0));
    let coordinator = window.attach_renderer(Counter(frames.clone()), fast()).unwrap();
    wait_until("frames", || frames.load(Ordering::SeqCst) >= 10);

    window.set_client_size(tether::size(400, 300)).unwrap();
    let serial = soft.swap_count();
    wait_until("a swap after resizing", || soft.swap_count() > serial);
    for swap in soft.swaps_since(serial) {
        assert_eq!((swap.width, swap.height), (400, 300));
    }
    assert_eq!(coordinator.viewport(), Some((400, 300)));
    window.destroy().unwrap();
}

#[test]
fn unsupported_graphics_api_creates_nothing() {
    let (el, soft) = headless(HeadlessConfig::default());
    let result = WindowHints::new()
        .with_context(ContextHints::new(GraphicsApi::Vulkan))
        .build(&el);
    assert!(matches!(result, Err(Error::UnsupportedHint(_))));
    assert_eq!(el.driver().window_count(), 0);
    assert_eq!(soft.live_contexts(), 0);

    let none = WindowHints::new()
        .with_context(ContextHints::new(GraphicsApi::None))
        .build(&el)
        .unwrap();
    assert_eq!(el.driver().window_count(), 1);
    none.destroy().unwrap();
}

#[test]
fn gated_setters_are_refused_without_side_effects() {
    let mut capabilities = HeadlessConfig::default().capabilities;
    capabilities.can_set_icon = false;
    capabilities.supported_styles = vec![BorderStyle::Resizable];
    let (el, _soft) = headless(HeadlessConfig::default().with_capabilities(capabilities));
    let window = WindowHints::new().with_title("gated").build(&el).unwrap();
    let size = window.size().unwrap();

    assert!(matches!(
        window.set_icon(None),
        Err(Error::NotSupported(_))
    ));
    assert!(matches!(
        window.set_border_style(BorderStyle::Borderless),
        Err(Error::UnsupportedValue { .. })
    ));
    assert_eq!(window.title().unwrap(), "gated");
    assert_eq!(window.size().unwrap(), size);
    assert!(el.driver().display(window.handle()).is_ok());
}

#[test]
fn client_and_screen_coordinates_round_trip() {
    let (el, _soft) = headless(HeadlessConfig::default());
    let window = WindowHints::new()
        .with_position(200, 100)
        .with_border_style(BorderStyle::Fixed)
        .build(&el)
        .unwrap();
    for &(x, y) in &[(0, 0), (15, 7), (-40, 300), (799, 599)] {
        let client = tether::client_point(x, y);
        let screen = window.client_to_screen(client).unwrap();
        assert_eq!(window.screen_to_client(screen).unwrap(), client);
    }
    // The client origin sits inside the frame.
    let origin = window.client_to_screen(tether::client_point(0, 0)).unwrap();
    assert!(origin.x > 200 && origin.y > 100);
}

#[test]
fn run_returns_once_the_last_window_is_gone() {
    let (el, _soft) = headless(HeadlessConfig::default());
    let window = WindowHints::new().build(&el).unwrap();
    let handle = window.handle();
    let sender = el.sender();
    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        sender.raise(Some(handle), EventKind::CloseRequested).unwrap();
    });

    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    let mut window = Some(window);
    el.run(move |event, control_flow| {
        log.borrow_mut().push(event.kind.clone());
        if event.kind == EventKind::CloseRequested {
            if let Some(window) = window.take() {
                window.destroy().unwrap();
            }
        }
        *control_flow = ControlFlow::Wait;
    })
    .unwrap();
    closer.join().unwrap();

    let seen = seen.borrow();
    let close = seen
        .iter()
        .position(|k| *k == EventKind::CloseRequested)
        .unwrap();
    assert_eq!(seen[close + 1..], [EventKind::Destroyed]);
}
