//! X11 driver over `x11rb`. Window surfaces are software surfaces that are
//! blitted into the window with `put_image` on every swap.

use crate::{
    context::{soft::SoftGraphics, GraphicsBinding, NativeGraphics},
    error::{Error, Result},
    event::EventKind,
    event_loop::{EventSender, Waker},
    handle::{CursorHandle, DisplayHandle, HandleRegistry, IconHandle, Kind, WindowHandle},
    platform::{check_size, Capabilities, Driver},
    surface::{NativeWindow, SurfaceCallbacks},
    window::{BorderStyle, CursorShape, WindowHints, WindowMode, WindowState},
    ClientPoint, ScreenPoint, Size,
};
use log::{debug, info};
use parking_lot::RwLock;
use std::{collections::BTreeMap, fmt, sync::Arc};
use x11rb::{
    atom_manager,
    connection::Connection,
    protocol::xproto::{self, ConnectionExt},
    xcb_ffi::XCBConnection,
    COPY_DEPTH_FROM_PARENT, CURRENT_TIME,
};

mod errors;
mod events;
mod present;
mod window;

use self::{
    present::XcbPresenter,
    window::{deliver, XcbWindow},
};

atom_manager! {
    pub AtomCollection: AtomCollectionCookie {
        WM_PROTOCOLS,
        WM_DELETE_WINDOW,
        WM_CHANGE_STATE,
        UTF8_STRING,
        _NET_WM_NAME,
        _NET_WM_STATE,
        _NET_WM_STATE_ABOVE,
        _NET_WM_STATE_FULLSCREEN,
        _MOTIF_WM_HINTS,
        TETHER_WAKE: b"_TETHER_WAKE",
    }
}

pub struct XcbDriver {
    conn: Arc<XCBConnection>,
    screen_num: usize,
    atoms: AtomCollection,
    hidden_window: xproto::Window,
    registry: HandleRegistry,
    display: DisplayHandle,
    capabilities: Capabilities,
    graphics: GraphicsBinding,
    graphics_display: DisplayHandle,
    events: EventSender,
    windows: RwLock<BTreeMap<WindowHandle, Arc<RwLock<XcbWindow>>>>,
    by_id: RwLock<BTreeMap<xproto::Window, WindowHandle>>,
}

impl fmt::Debug for XcbDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XcbDriver")
            .field("screen_num", &self.screen_num)
            .field("hidden_window", &self.hidden_window)
            .field("windows", &self.windows.read().len())
            .finish()
    }
}

impl XcbDriver {
    pub fn connect(events: EventSender) -> Result<Self> {
        let (conn, screen_num) = XCBConnection::connect(None)?;
        let conn = Arc::new(conn);
        let atoms = AtomCollection::new(&*conn)?;
        let screen = &conn.setup().roots[screen_num];
        let (root, root_depth) = (screen.root, screen.root_depth);

        let hidden_window = conn.generate_id()?;
        conn.create_window(
            COPY_DEPTH_FROM_PARENT,
            hidden_window,
            root,
            -10,
            -10,
            1,
            1,
            0,
            xproto::WindowClass::InputOutput,
            0,
            &xproto::CreateWindowAux::new(),
        )?;
        let gcontext = conn.generate_id()?;
        conn.create_gc(
            gcontext,
            hidden_window,
            &xproto::CreateGCAux::new().graphics_exposures(0),
        )?;
        let atoms = atoms.reply()?;
        conn.flush()?;

        let presenter = XcbPresenter::new(conn.clone(), gcontext, root_depth);
        let soft = Arc::new(SoftGraphics::with_presenter(Arc::new(presenter)));
        let graphics = GraphicsBinding::new(soft.clone());
        let graphics_display = graphics.initialize()?;

        let registry = HandleRegistry::new();
        let display = registry.allocate();
        let capabilities = Capabilities {
            can_set_icon: false,
            can_get_display: true,
            can_set_cursor: false,
            supported_modes: vec![
                WindowMode::Normal,
                WindowMode::Minimized,
                WindowMode::Fullscreen,
            ],
            supported_styles: vec![BorderStyle::Borderless, BorderStyle::Resizable],
            supported_apis: soft.supported_apis(),
        };
        info!("connected to X11 screen {}", screen_num);

        Ok(Self {
            conn,
            screen_num,
            atoms,
            hidden_window,
            registry,
            display,
            capabilities,
            graphics,
            graphics_display,
            events,
            windows: RwLock::new(BTreeMap::new()),
            by_id: RwLock::new(BTreeMap::new()),
        })
    }

    fn screen(&self) -> &xproto::Screen {
        &self.conn.setup().roots[self.screen_num]
    }

    fn display_size(&self) -> Size {
        let screen = self.screen();
        crate::size(
            screen.width_in_pixels.into(),
            screen.height_in_pixels.into(),
        )
    }

    fn window(&self, handle: WindowHandle) -> Result<Arc<RwLock<XcbWindow>>> {
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

    /// Applies `f` to a copy of the window state, then `write` pushes the
    /// result to the server. The state is kept only if both succeed.
    fn update<R, F, W>(&self, handle: WindowHandle, f: F, write: W) -> Result<R>
    where
        F: FnOnce(&mut WindowState) -> Result<R>,
        W: FnOnce(xproto::Window, &WindowState, &WindowState) -> Result<()>,
    {
        let window = self.window(handle)?;
        let mut window = window.write();
        if window.state.destroyed {
            return Err(Error::InvalidHandle(Kind::Window));
        }
        let mut state = window.state.clone();
        let result = f(&mut state)?;
        write(window.id, &window.state, &state)?;
        self.conn.flush()?;
        window.state = state;
        let native = self.native_for(window.id);
        let change = window.sync_surface(native);
        drop(window);
        deliver(change);
        Ok(result)
    }

    fn raise(&self, window: WindowHandle, kind: EventKind) {
        if let Err(e) = self.events.raise(Some(window), kind) {
            debug!("event for {:?} dropped: {}", window, e);
        }
    }
}

impl Drop for XcbDriver {
    fn drop(&mut self) {
        let handles: Vec<WindowHandle> = self.windows.read().keys().copied().collect();
        for handle in handles {
            if let Err(e) = self.destroy(handle) {
                debug!("destroying {:?} on shutdown: {}", handle, e);
            }
        }
        if let Err(e) = self.graphics.terminate(self.graphics_display) {
            debug!("terminating graphics display: {}", e);
        }
        if let Err(e) = self.conn.destroy_window(self.hidden_window) {
            debug!("destroying hidden window: {}", e);
        }
        let _ = self.conn.flush();
    }
}

impl Driver for XcbDriver {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn events(&self) -> EventSender {
        self.events.clone()
    }

    fn graphics(&self) -> GraphicsBinding {
        self.graphics.clone()
    }

    /// Sends a client message to the hidden window, which makes a blocked
    /// `wait_for_event` return.
    fn waker(&self) -> Waker {
        let conn = self.conn.clone();
        let window = self.hidden_window;
        let type_ = self.atoms.TETHER_WAKE;
        Arc::new(move || {
            let event = xproto::ClientMessageEvent {
                response_type: xproto::CLIENT_MESSAGE_EVENT,
                format: 32,
                sequence: 0,
                window,
                type_,
                data: [0u32; 5].into(),
            };
            let sent = conn
                .send_event(false, window, xproto::EventMask::NoEvent, event)
                .map(|_| ())
                .and_then(|_| conn.flush());
            if let Err(e) = sent {
                debug!("wake-up failed: {}", e);
            }
        })
    }

    fn create(&self, hints: &WindowHints) -> Result<WindowHandle> {
        self.capabilities.check_hints(hints)?;
        check_size("client_size", hints.client_size)?;

        let mut state = WindowState::new(hints, self.display);
        state.apply_mode(hints.mode, self.display_size());
        let window = self.create_x_window(hints, &state)?;
        let id = window.id;
        let handle = self.registry.allocate();
        self.windows
            .write()
            .insert(handle, Arc::new(RwLock::new(window)));
        self.by_id.write().insert(id, handle);
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
        let id = window.id;
        let change = window.sync_surface(self.native_for(id));
        drop(window);
        // The renderer must be off the window before the server frees it.
        deliver(change);
        self.destroy_x_window(handle, id)?;
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
        self.update(
            handle,
            |s| {
                s.title = title.to_owned();
                Ok(())
            },
            |id, _, _| self.write_title(id, title),
        )
    }

    fn position(&self, handle: WindowHandle) -> Result<ScreenPoint> {
        self.read(handle, |s| s.position)
    }

    fn set_position(&self, handle: WindowHandle, position: ScreenPoint) -> Result<()> {
        self.update(
            handle,
            |s| {
                s.position = position;
                Ok(())
            },
            |id, _, new| self.write_geometry(id, new),
        )
    }

    fn size(&self, handle: WindowHandle) -> Result<Size> {
        self.read(handle, |s| s.frame_size())
    }

    fn set_size(&self, handle: WindowHandle, size: Size) -> Result<()> {
        check_size("size", size)?;
        self.update(
            handle,
            |s| {
                s.set_frame_size(size);
                Ok(())
            },
            |id, _, new| self.write_geometry(id, new),
        )
    }

    fn client_size(&self, handle: WindowHandle) -> Result<Size> {
        self.read(handle, |s| s.client_size)
    }

    fn set_client_size(&self, handle: WindowHandle, size: Size) -> Result<()> {
        check_size("client_size", size)?;
        self.update(
            handle,
            |s| {
                s.set_client_size(size);
                Ok(())
            },
            |id, _, new| self.write_geometry(id, new),
        )
    }

    fn min_client_size(&self, handle: WindowHandle) -> Result<Option<Size>> {
        self.read(handle, |s| s.min_client_size)
    }

    fn set_min_client_size(&self, handle: WindowHandle, size: Option<Size>) -> Result<()> {
        if let Some(size) = size {
            check_size("min_client_size", size)?;
        }
        self.update(
            handle,
            |s| s.set_min_client_size(size),
            |id, _, new| self.write_geometry(id, new),
        )
    }

    fn max_client_size(&self, handle: WindowHandle) -> Result<Option<Size>> {
        self.read(handle, |s| s.max_client_size)
    }

    fn set_max_client_size(&self, handle: WindowHandle, size: Option<Size>) -> Result<()> {
        if let Some(size) = size {
            check_size("max_client_size", size)?;
        }
        self.update(
            handle,
            |s| s.set_max_client_size(size),
            |id, _, new| self.write_geometry(id, new),
        )
    }

    fn border_style(&self, handle: WindowHandle) -> Result<BorderStyle> {
        self.read(handle, |s| s.border_style)
    }

    fn set_border_style(&self, handle: WindowHandle, style: BorderStyle) -> Result<()> {
        self.capabilities.check_style(style)?;
        self.update(
            handle,
            |s| {
                s.border_style = style;
                Ok(())
            },
            |id, _, _| self.write_border_style(id, style),
        )
    }

    fn mode(&self, handle: WindowHandle) -> Result<WindowMode> {
        self.read(handle, |s| s.mode)
    }

    fn set_mode(&self, handle: WindowHandle, mode: WindowMode) -> Result<()> {
        self.capabilities.check_mode(mode)?;
        let display_size = self.display_size();
        self.update(
            handle,
            |s| {
                s.apply_mode(mode, display_size);
                Ok(())
            },
            |id, old, _| self.write_mode(id, old.mode, mode),
        )
    }

    fn always_on_top(&self, handle: WindowHandle) -> Result<bool> {
        self.read(handle, |s| s.always_on_top)
    }

    fn set_always_on_top(&self, handle: WindowHandle, always_on_top: bool) -> Result<()> {
        self.update(
            handle,
            |s| {
                s.always_on_top = always_on_top;
                Ok(())
            },
            |id, _, _| self.send_net_wm_state(id, always_on_top, self.atoms._NET_WM_STATE_ABOVE),
        )
    }

    fn focus(&self, handle: WindowHandle) -> Result<()> {
        let window = self.window(handle)?;
        let id = window.read().id;
        self.conn
            .set_input_focus(xproto::InputFocus::Parent, id, CURRENT_TIME)?;
        self.conn.flush()?;
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

    fn create_icon(&self, _width: u32, _height: u32, _rgba: &[u8]) -> Result<IconHandle> {
        self.capabilities.require_icon()?;
        Err(Error::NotSupported("create_icon"))
    }

    fn destroy_icon(&self, icon: IconHandle) -> Result<()> {
        self.registry.validate(icon)
    }

    fn set_icon(&self, handle: WindowHandle, _icon: Option<IconHandle>) -> Result<()> {
        self.capabilities.require_icon()?;
        self.registry.validate(handle)
    }

    fn create_cursor(&self, _shape: CursorShape) -> Result<CursorHandle> {
        self.capabilities.require_cursor()?;
        Err(Error::NotSupported("create_cursor"))
    }

    fn destroy_cursor(&self, cursor: CursorHandle) -> Result<()> {
        self.registry.validate(cursor)
    }

    fn set_cursor(&self, handle: WindowHandle, _cursor: Option<CursorHandle>) -> Result<()> {
        self.capabilities.require_cursor()?;
        self.registry.validate(handle)
    }

    fn display(&self, handle: WindowHandle) -> Result<DisplayHandle> {
        self.capabilities.require_display()?;
        self.read(handle, |s| s.display)
    }

    fn native_window(&self, handle: WindowHandle) -> Result<NativeWindow> {
        let window = self.window(handle)?;
        let id = window.read().id;
        Ok(self.native_for(id))
    }

    fn register_surface_callbacks(
        &self,
        handle: WindowHandle,
        callbacks: Arc<dyn SurfaceCallbacks>,
    ) -> Result<()> {
        let window = self.window(handle)?;
        let mut window = window.write();
        window.set_callbacks(callbacks);
        let native = self.native_for(window.id);
        let change = window.sync_surface(native);
        drop(window);
        deliver(change);
        Ok(())
    }

    fn process_events(&self, wait_for_events: bool) -> Result<()> {
        self.poll_x(wait_for_events)
    }

    fn swap_buffers(&self, handle: WindowHandle) -> Result<()> {
        let native = self.native_window(handle)?;
        self.graphics.swap_current(self.graphics_display, &native)
    }
}
