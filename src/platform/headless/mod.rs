//! A driver that needs no windowing system.
//!
//! Windows live in memory on a virtual display. The OS side is simulated by a
//! channel of [`NativeEvent`]s, which `process_events` pumps into the event
//! queue, and by a dedicated thread that delivers surface callbacks the way a
//! mobile runtime does: a window gets a surface while it is visible and not
//! minimized, and loses it again when minimized or destroyed.

mod callbacks;
mod events;
mod window;

pub use self::events::NativeEvent;

use self::{
    callbacks::{CallbackThread, Delivery},
    window::HeadlessWindow,
};
use super::{check_size, Capabilities, Driver};
use crate::{
    context::{soft::SoftGraphics, GraphicsBinding, NativeGraphics},
    error::{Error, Result},
    event::EventKind,
    event_loop::{EventSender, Waker},
    handle::{
        CursorHandle, DisplayHandle, HandleRegistry, IconHandle, JoystickHandle, Kind,
        WindowHandle,
    },
    surface::{NativeWindow, SurfaceCallbacks},
    window::{BorderStyle, CursorShape, WindowHints, WindowMode, WindowState},
    ClientPoint, ScreenPoint, Size,
};
use log::{debug, info, trace};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};

#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub display_size: Size,
    pub capabilities: Capabilities,
    /// Backend shared by every window. A fresh one is created when `None`.
    pub graphics: Option<Arc<SoftGraphics>>,
}

impl HeadlessConfig {
    pub fn with_display_size(mut self, width: u32, height: u32) -> Self {
        self.display_size = crate::size(width, height);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_graphics(mut self, graphics: Arc<SoftGraphics>) -> Self {
        self.graphics = Some(graphics);
        self
    }
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            display_size: crate::size(1920, 1080),
            capabilities: Capabilities {
                can_set_icon: true,
                can_get_display: true,
                can_set_cursor: true,
                supported_modes: vec![
                    WindowMode::Normal,
                    WindowMode::Minimized,
                    WindowMode::Maximized,
                    WindowMode::Fullscreen,
                ],
                supported_styles: vec![
                    BorderStyle::Borderless,
                    BorderStyle::Fixed,
                    BorderStyle::Resizable,
                ],
                supported_apis: SoftGraphics::new().supported_apis(),
            },
            graphics: None,
        }
    }
}

pub struct HeadlessDriver {
    registry: HandleRegistry,
    display: DisplayHandle,
    config: HeadlessConfig,
    soft: Arc<SoftGraphics>,
    graphics: GraphicsBinding,
    graphics_display: DisplayHandle,
    events: EventSender,
    native_tx: flume::Sender<NativeEvent>,
    native_rx: flume::Receiver<NativeEvent>,
    wake_pending: Arc<AtomicBool>,
    windows: RwLock<BTreeMap<WindowHandle, Arc<RwLock<HeadlessWindow>>>>,
    icons: Mutex<BTreeMap<IconHandle, Size>>,
    cursors: Mutex<BTreeMap<CursorHandle, CursorShape>>,
    joysticks: Mutex<BTreeSet<JoystickHandle>>,
    native_ids: AtomicU32,
    focus_lock: Mutex<()>,
    callback_thread: CallbackThread,
}

impl fmt::Debug for HeadlessDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessDriver")
            .field("display_size", &self.config.display_size)
            .field("windows", &self.windows.read().len())
            .field("graphics", &self.soft)
            .finish()
    }
}

impl HeadlessDriver {
    pub fn new(config: HeadlessConfig, events: EventSender) -> Result<Self> {
        let soft = config
            .graphics
            .clone()
            .unwrap_or_else(|| Arc::new(SoftGraphics::new()));
        let graphics = GraphicsBinding::new(soft.clone());
        let graphics_display = graphics.initialize()?;
        let registry = HandleRegistry::new();
        let display = registry.allocate();
        let (native_tx, native_rx) = flume::unbounded();
        let callback_thread = CallbackThread::spawn()?;
        info!(
            "headless display {}x{}",
            config.display_size.width, config.display_size.height
        );
        Ok(Self {
            registry,
            display,
            config,
            soft,
            graphics,
            graphics_display,
            events,
            native_tx,
            native_rx,
            wake_pending: Arc::new(AtomicBool::new(false)),
            windows: RwLock::new(BTreeMap::new()),
            icons: Mutex::new(BTreeMap::new()),
            cursors: Mutex::new(BTreeMap::new()),
            joysticks: Mutex::new(BTreeSet::new()),
            native_ids: AtomicU32::new(1),
            focus_lock: Mutex::new(()),
            callback_thread,
        })
    }

    /// The software backend every window surface of this driver is created on.
    pub fn soft(&self) -> &Arc<SoftGraphics> {
        &self.soft
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Feeds an event into the simulated OS event source. It reaches the
    /// event queue on the next `process_events`.
    pub fn inject(&self, event: NativeEvent) -> Result<()> {
        self.native_tx.send(event).map_err(|_| Error::Disconnected)
    }

    pub fn connect_joystick(&self) -> Result<JoystickHandle> {
        let joystick = self.registry.allocate();
        self.joysticks.lock().insert(joystick);
        self.inject(NativeEvent::JoystickConnected(joystick))?;
        Ok(joystick)
    }

    pub fn disconnect_joystick(&self, joystick: JoystickHandle) -> Result<()> {
        self.registry.validate(joystick)?;
        self.joysticks.lock().remove(&joystick);
        self.registry.invalidate(joystick);
        self.inject(NativeEvent::JoystickDisconnected(joystick))
    }

    fn window(&self, handle: WindowHandle) -> Result<Arc<RwLock<HeadlessWindow>>> {
        self.registry.validate(handle)?;
        self.windows
            .read()
            .get(&handle)
            .cloned()
            .ok_or(Error::InvalidHandle(Kind::Window))
    }

    fn read<R, F>(&self, handle: WindowHandle, f: F) -> Result<R>
    where
        F: FnOnce(&WindowState) -> R,
    {
        let window = self.window(handle)?;
        let window = window.read();
        Ok(f(&window.state))
    }

    /// Mutates a window and lets the OS side react: geometry events are
    /// raised and surface callbacks delivered before this returns. Nothing
    /// changes if `f` fails.
    fn update<R, F>(&self, handle: WindowHandle, f: F) -> Result<R>
    where
        F: FnOnce(&mut WindowState) -> Result<R>,
    {
        let window = self.window(handle)?;
        let mut window = window.write();
        if window.state.destroyed {
            return Err(Error::InvalidHandle(Kind::Window));
        }
        let mut state = window.state.clone();
        let result = f(&mut state)?;
        let moved = state.position != window.state.position;
        let resized = state.client_size != window.state.client_size;
        window.state = state;

        if moved {
            self.raise(
                handle,
                EventKind::Move {
                    position: window.state.position,
                },
            );
        }
        if resized && !window.has_callbacks() {
            let size = window.state.client_size;
            self.raise(
                handle,
                EventKind::Resize {
                    width: size.width,
                    height: size.height,
                },
            );
        }
        let deliveries = window.sync_surface(&self.native_ids);
        self.dispatch(window, deliveries)?;
        Ok(result)
    }

    /// Submits surface callbacks while the window lock is still held, so
    /// they stay in order per window, then waits for them without it.
    fn dispatch<G>(&self, guard: G, deliveries: Vec<Delivery>) -> Result<()> {
        let pending = self.callback_thread.submit(deliveries)?;
        drop(guard);
        self.callback_thread.wait(pending)
    }

    /// Moves keyboard focus to `handle`, unfocusing every other window first.
    /// Returns whether the target gained focus; the caller raises its event.
    fn take_focus(&self, handle: WindowHandle) -> Result<bool> {
        let _moving = self.focus_lock.lock();
        let target = self.window(handle)?;
        {
            let target = target.read();
            if target.state.destroyed {
                return Err(Error::InvalidHandle(Kind::Window));
            }
            if target.is_minimized() {
                return Err(Error::UnsupportedValue {
                    property: "focus",
                    value: String::from("minimized window"),
                });
            }
        }
        let others: Vec<(WindowHandle, Arc<RwLock<HeadlessWindow>>)> = self
            .windows
            .read()
            .iter()
            .filter(|(other, _)| **other != handle)
            .map(|(other, window)| (*other, window.clone()))
            .collect();
        for (other, window) in others {
            let mut window = window.write();
            if window.state.focused {
                window.state.focused = false;
                self.raise(other, EventKind::Focus(false));
            }
        }
        // Destroy may have run since the check above.
        let mut target = target.write();
        if target.state.destroyed {
            return Err(Error::InvalidHandle(Kind::Window));
        }
        if target.state.focused {
            return Ok(false);
        }
        target.state.focused = true;
        Ok(true)
    }

    fn raise(&self, window: WindowHandle, kind: EventKind) {
        if let Err(e) = self.events.raise(Some(window), kind) {
            debug!("event for {:?} dropped: {}", window, e);
        }
    }
}

impl Drop for HeadlessDriver {
    fn drop(&mut self) {
        let handles: Vec<WindowHandle> = self.windows.read().keys().copied().collect();
        for handle in handles {
            if let Err(e) = self.destroy(handle) {
                debug!("destroying {:?} on shutdown: {}", handle, e);
            }
        }
        self.callback_thread.shutdown();
        if let Err(e) = self.graphics.terminate(self.graphics_display) {
            debug!("terminating graphics display: {}", e);
        }
    }
}

impl Driver for HeadlessDriver {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.config.capabilities
    }

    fn events(&self) -> EventSender {
        self.events.clone()
    }

    fn graphics(&self) -> GraphicsBinding {
        self.graphics.clone()
    }

    fn waker(&self) -> Waker {
        let sender = self.native_tx.clone();
        let pending = self.wake_pending.clone();
        Arc::new(move || {
            if !pending.swap(true, Ordering::AcqRel) {
                let _ = sender.send(NativeEvent::Wake);
            }
        })
    }

    fn create(&self, hints: &WindowHints) -> Result<WindowHandle> {
        self.config.capabilities.check_hints(hints)?;
        check_size("client_size", hints.client_size)?;

        let mut state = WindowState::new(hints, self.display);
        if hints.position.is_none() {
            let (x, y) = window::centered(state.frame_size(), self.config.display_size);
            state.position = crate::screen_point(x, y);
        }
        state.apply_mode(hints.mode, self.config.display_size);

        let handle = self.registry.allocate();
        let native_id = self.native_ids.fetch_add(1, Ordering::Relaxed);
        let record = HeadlessWindow::new(state, native_id);
        debug!("created {:?}: {:?}", handle, record);
        self.windows
            .write()
            .insert(handle, Arc::new(RwLock::new(record)));
        Ok(handle)
    }

    fn destroy(&self, handle: WindowHandle) -> Result<()> {
        self.registry.validate(handle)?;
        let window = self
            .windows
            .write()
            .remove(&handle)
            .ok_or(Error::InvalidHandle(Kind::Window))?;
        self.registry.invalidate(handle);
        let mut window = window.write();
        window.state.destroyed = true;
        window.state.focused = false;
        let deliveries = window.sync_surface(&self.native_ids);
        self.dispatch(window, deliveries)?;
        debug!("destroyed {:?}", handle);
        self.raise(handle, EventKind::Destroyed);
        Ok(())
    }

    fn is_window_destroyed(&self, handle: WindowHandle) -> bool {
        self.window(handle).is_err()
    }

    fn window_count(&self) -> usize {
        self.windows.read().len()
    }

    fn title(&self, handle: WindowHandle) -> Result<String> {
        self.read(handle, |s| s.title.clone())
    }

    fn set_title(&self, handle: WindowHandle, title: &str) -> Result<()> {
        self.update(handle, |s| {
            s.title = title.to_owned();
            Ok(())
        })
    }

    fn position(&self, handle: WindowHandle) -> Result<ScreenPoint> {
        self.read(handle, |s| s.position)
    }

    fn set_position(&self, handle: WindowHandle, position: ScreenPoint) -> Result<()> {
        self.update(handle, |s| {
            s.position = position;
            Ok(())
        })
    }

    fn size(&self, handle: WindowHandle) -> Result<Size> {
        self.read(handle, |s| s.frame_size())
    }

    fn set_size(&self, handle: WindowHandle, size: Size) -> Result<()> {
        check_size("size", size)?;
        self.update(handle, |s| {
            s.set_frame_size(size);
            Ok(())
        })
    }

    fn client_size(&self, handle: WindowHandle) -> Result<Size> {
        self.read(handle, |s| s.client_size)
    }

    fn set_client_size(&self, handle: WindowHandle, size: Size) -> Result<()> {
        check_size("client_size", size)?;
        self.update(handle, |s| {
            s.set_client_size(size);
            Ok(())
        })
    }

    fn min_client_size(&self, handle: WindowHandle) -> Result<Option<Size>> {
        self.read(handle, |s| s.min_client_size)
    }

    fn set_min_client_size(&self, handle: WindowHandle, size: Option<Size>) -> Result<()> {
        if let Some(size) = size {
            check_size("min_client_size", size)?;
        }
        self.update(handle, |s| s.set_min_client_size(size))
    }

    fn max_client_size(&self, handle: WindowHandle) -> Result<Option<Size>> {
        self.read(handle, |s| s.max_client_size)
    }

    fn set_max_client_size(&self, handle: WindowHandle, size: Option<Size>) -> Result<()> {
        if let Some(size) = size {
            check_size("max_client_size", size)?;
        }
        self.update(handle, |s| s.set_max_client_size(size))
    }

    fn border_style(&self, handle: WindowHandle) -> Result<BorderStyle> {
        self.read(handle, |s| s.border_style)
    }

    fn set_border_style(&self, handle: WindowHandle, style: BorderStyle) -> Result<()> {
        self.config.capabilities.check_style(style)?;
        self.update(handle, |s| {
            s.border_style = style;
            Ok(())
        })
    }

    fn mode(&self, handle: WindowHandle) -> Result<WindowMode> {
        self.read(handle, |s| s.mode)
    }

    fn set_mode(&self, handle: WindowHandle, mode: WindowMode) -> Result<()> {
        self.config.capabilities.check_mode(mode)?;
        let display_size = self.config.display_size;
        self.update(handle, |s| {
            s.apply_mode(mode, display_size);
            if mode == WindowMode::Minimized {
                s.focused = false;
            }
            Ok(())
        })
    }

    fn always_on_top(&self, handle: WindowHandle) -> Result<bool> {
        self.read(handle, |s| s.always_on_top)
    }

    fn set_always_on_top(&self, handle: WindowHandle, always_on_top: bool) -> Result<()> {
        self.update(handle, |s| {
            s.always_on_top = always_on_top;
            Ok(())
        })
    }

    fn focus(&self, handle: WindowHandle) -> Result<()> {
        if self.take_focus(handle)? {
            self.raise(handle, EventKind::Focus(true));
        }
        Ok(())
    }

    fn is_focused(&self, handle: WindowHandle) -> Result<bool> {
        self.read(handle, |s| s.focused)
    }

    fn screen_to_client(&self, handle: WindowHandle, point: ScreenPoint) -> Result<ClientPoint> {
        self.read(handle, |s| s.screen_to_client(point))
    }

    fn client_to_screen(&self, handle: WindowHandle, point: ClientPoint) -> Result<ScreenPoint> {
        self.read(handle, |s| s.client_to_screen(point))
    }

    fn create_icon(&self, width: u32, height: u32, rgba: &[u8]) -> Result<IconHandle> {
        self.config.capabilities.require_icon()?;
        let size = crate::size(width, height);
        check_size("icon", size)?;
        if rgba.len() != width as usize * height as usize * 4 {
            return Err(Error::UnsupportedValue {
                property: "icon",
                value: format!("{} bytes for {}x{}", rgba.len(), width, height),
            });
        }
        let icon = self.registry.allocate();
        self.icons.lock().insert(icon, size);
        Ok(icon)
    }

    fn destroy_icon(&self, icon: IconHandle) -> Result<()> {
        self.registry.validate(icon)?;
        self.icons.lock().remove(&icon);
        self.registry.invalidate(icon);
        for window in self.windows.read().values() {
            let mut window = window.write();
            if window.state.icon == Some(icon) {
                window.state.icon = None;
            }
        }
        Ok(())
    }

    fn set_icon(&self, handle: WindowHandle, icon: Option<IconHandle>) -> Result<()> {
        self.config.capabilities.require_icon()?;
        if let Some(icon) = icon {
            self.registry.validate(icon)?;
        }
        self.update(handle, |s| {
            s.icon = icon;
            Ok(())
        })
    }

    fn create_cursor(&self, shape: CursorShape) -> Result<CursorHandle> {
        self.config.capabilities.require_cursor()?;
        let cursor = self.registry.allocate();
        self.cursors.lock().insert(cursor, shape);
        trace!("created {:?} ({:?})", cursor, shape);
        Ok(cursor)
    }

    fn destroy_cursor(&self, cursor: CursorHandle) -> Result<()> {
        self.registry.validate(cursor)?;
        self.cursors.lock().remove(&cursor);
        self.registry.invalidate(cursor);
        for window in self.windows.read().values() {
            let mut window = window.write();
            if window.state.cursor == Some(cursor) {
                window.state.cursor = None;
            }
        }
        Ok(())
    }

    fn set_cursor(&self, handle: WindowHandle, cursor: Option<CursorHandle>) -> Result<()> {
        self.config.capabilities.require_cursor()?;
        if let Some(cursor) = cursor {
            self.registry.validate(cursor)?;
        }
        self.update(handle, |s| {
            s.cursor = cursor;
            Ok(())
        })
    }

    fn display(&self, handle: WindowHandle) -> Result<DisplayHandle> {
        self.config.capabilities.require_display()?;
        self.read(handle, |s| s.display)
    }

    fn native_window(&self, handle: WindowHandle) -> Result<NativeWindow> {
        let window = self.window(handle)?;
        let window = window.read();
        Ok(window.native())
    }

    fn register_surface_callbacks(
        &self,
        handle: WindowHandle,
        callbacks: Arc<dyn SurfaceCallbacks>,
    ) -> Result<()> {
        let window = self.window(handle)?;
        let mut window = window.write();
        let deliveries = window.set_callbacks(callbacks, &self.native_ids);
        trace!(
            "{:?} registered surface callbacks (surface live: {})",
            handle,
            window.has_live_surface()
        );
        self.dispatch(window, deliveries)
    }

    fn process_events(&self, wait_for_events: bool) -> Result<()> {
        self.poll_native(wait_for_events)
    }

    fn swap_buffers(&self, handle: WindowHandle) -> Result<()> {
        let native = self.native_window(handle)?;
        self.graphics.swap_current(self.graphics_display, &native)
    }
}
