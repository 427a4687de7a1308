use super::XcbDriver;
use crate::{
    error::Result,
    handle::WindowHandle,
    surface::{NativeWindow, SurfaceCallbacks},
    window::{BorderStyle, WindowHints, WindowMode, WindowState},
};
use log::debug;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle, XcbDisplayHandle, XcbWindowHandle};
use std::{fmt, sync::Arc};
use x11rb::{
    connection::Connection,
    protocol::xproto::{self, ConnectionExt},
    wrapper::ConnectionExt as WrapperConnectionExt,
    COPY_DEPTH_FROM_PARENT,
};

const MWM_HINTS_DECORATIONS: u32 = 1 << 1;
const ICONIC_STATE: u32 = 3;
const NET_WM_STATE_REMOVE: u32 = 0;
const NET_WM_STATE_ADD: u32 = 1;

pub(super) enum SurfaceChange {
    Created(NativeWindow, u32, u32),
    Changed(NativeWindow, u32, u32),
    Destroyed,
}

pub(super) struct XcbWindow {
    pub(super) id: xproto::Window,
    pub(super) state: WindowState,
    pub(super) mapped: bool,
    callbacks: Option<Arc<dyn SurfaceCallbacks>>,
    surface: Option<(u32, u32)>,
}

impl fmt::Debug for XcbWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XcbWindow")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("mapped", &self.mapped)
            .field("surface", &self.surface)
            .finish()
    }
}

impl XcbWindow {
    pub(super) fn has_callbacks(&self) -> bool {
        self.callbacks.is_some()
    }

    pub(super) fn set_callbacks(&mut self, callbacks: Arc<dyn SurfaceCallbacks>) {
        self.callbacks = Some(callbacks);
        self.surface = None;
    }

    /// What the surface callbacks must be told to match the mapped state.
    pub(super) fn sync_surface(
        &mut self,
        native: NativeWindow,
    ) -> Option<(Arc<dyn SurfaceCallbacks>, SurfaceChange)> {
        let callbacks = self.callbacks.clone()?;
        let visible = self.mapped && !self.state.destroyed && self.state.mode != WindowMode::Minimized;
        let size = self.state.client_size;
        let current = (size.width, size.height);
        let change = match (visible, self.surface) {
            (true, None) => SurfaceChange::Created(native, current.0, current.1),
            (true, Some(last)) if last != current => {
                SurfaceChange::Changed(native, current.0, current.1)
            }
            (false, Some(_)) => SurfaceChange::Destroyed,
            _ => return None,
        };
        self.surface = if visible { Some(current) } else { None };
        Some((callbacks, change))
    }
}

pub(super) fn deliver(change: Option<(Arc<dyn SurfaceCallbacks>, SurfaceChange)>) {
    if let Some((callbacks, change)) = change {
        match change {
            SurfaceChange::Created(native, width, height) => {
                callbacks.surface_created(native);
                callbacks.surface_changed(native, width, height);
            }
            SurfaceChange::Changed(native, width, height) => {
                callbacks.surface_changed(native, width, height)
            }
            SurfaceChange::Destroyed => callbacks.surface_destroyed(),
        }
    }
}

impl XcbDriver {
    pub(super) fn native_for(&self, id: xproto::Window) -> NativeWindow {
        let mut window = XcbWindowHandle::empty();
        window.window = id;
        window.visual_id = self.screen().root_visual;
        let mut display = XcbDisplayHandle::empty();
        display.connection = self.conn.get_raw_xcb_connection();
        display.screen = self.screen_num as i32;
        NativeWindow::new(RawWindowHandle::Xcb(window), RawDisplayHandle::Xcb(display))
    }

    pub(super) fn create_x_window(&self, hints: &WindowHints, state: &WindowState) -> Result<XcbWindow> {
        let screen = self.screen();
        let id = self.conn.generate_id()?;
        let origin = state.client_origin();
        let size = state.client_size;

        let win_aux = xproto::CreateWindowAux::new()
            .win_gravity(xproto::Gravity::NorthWest)
            .event_mask(
                xproto::EventMask::Exposure
                    | xproto::EventMask::StructureNotify
                    | xproto::EventMask::KeyPress
                    | xproto::EventMask::KeyRelease
                    | xproto::EventMask::ButtonPress
                    | xproto::EventMask::ButtonRelease
                    | xproto::EventMask::PointerMotion
                    | xproto::EventMask::FocusChange,
            );

        self.conn.create_window(
            COPY_DEPTH_FROM_PARENT,
            id,
            screen.root,
            origin.x as i16,
            origin.y as i16,
            size.width as u16,
            size.height as u16,
            0,
            xproto::WindowClass::InputOutput,
            0,
            &win_aux,
        )?;

        self.conn.change_property32(
            xproto::PropMode::Replace,
            id,
            self.atoms.WM_PROTOCOLS,
            xproto::AtomEnum::ATOM,
            &[self.atoms.WM_DELETE_WINDOW],
        )?;
        self.write_title(id, &state.title)?;
        self.write_border_style(id, state.border_style)?;

        if hints.visible {
            self.conn.map_window(id)?;
        }
        if state.always_on_top {
            self.send_net_wm_state(id, true, self.atoms._NET_WM_STATE_ABOVE)?;
        }
        if state.mode == WindowMode::Fullscreen {
            self.send_net_wm_state(id, true, self.atoms._NET_WM_STATE_FULLSCREEN)?;
        }
        self.conn.flush()?;
        debug!("created X window {:#x}", id);

        Ok(XcbWindow {
            id,
            state: state.clone(),
            mapped: false,
            callbacks: None,
            surface: None,
        })
    }

    pub(super) fn write_title(&self, id: xproto::Window, title: &str) -> Result<()> {
        self.conn.change_property8(
            xproto::PropMode::Replace,
            id,
            xproto::AtomEnum::WM_NAME,
            xproto::AtomEnum::STRING,
            title.as_bytes(),
        )?;
        self.conn.change_property8(
            xproto::PropMode::Replace,
            id,
            self.atoms._NET_WM_NAME,
            self.atoms.UTF8_STRING,
            title.as_bytes(),
        )?;
        Ok(())
    }

    pub(super) fn write_border_style(&self, id: xproto::Window, style: BorderStyle) -> Result<()> {
        let decorations = match style {
            BorderStyle::Borderless => 0,
            BorderStyle::Fixed | BorderStyle::Resizable => 1,
        };
        self.conn.change_property32(
            xproto::PropMode::Replace,
            id,
            self.atoms._MOTIF_WM_HINTS,
            self.atoms._MOTIF_WM_HINTS,
            &[MWM_HINTS_DECORATIONS, 0, decorations, 0, 0],
        )?;
        Ok(())
    }

    /// Moves and resizes the client window to match `state`.
    pub(super) fn write_geometry(&self, id: xproto::Window, state: &WindowState) -> Result<()> {
        let origin = state.client_origin();
        let size = state.client_size;
        self.conn.configure_window(
            id,
            &xproto::ConfigureWindowAux::new()
                .x(origin.x)
                .y(origin.y)
                .width(size.width)
                .height(size.height),
        )?;
        Ok(())
    }

    pub(super) fn write_mode(&self, id: xproto::Window, from: WindowMode, to: WindowMode) -> Result<()> {
        if from == WindowMode::Fullscreen {
            self.send_net_wm_state(id, false, self.atoms._NET_WM_STATE_FULLSCREEN)?;
        }
        match to {
            WindowMode::Minimized => {
                self.send_root_message(id, self.atoms.WM_CHANGE_STATE, [ICONIC_STATE, 0, 0, 0, 0])?
            }
            WindowMode::Fullscreen => {
                self.conn.map_window(id)?;
                self.send_net_wm_state(id, true, self.atoms._NET_WM_STATE_FULLSCREEN)?
            }
            WindowMode::Normal | WindowMode::Maximized => {
                self.conn.map_window(id)?;
            }
        }
        Ok(())
    }

    pub(super) fn send_net_wm_state(&self, id: xproto::Window, add: bool, atom: xproto::Atom) -> Result<()> {
        let action = if add {
            NET_WM_STATE_ADD
        } else {
            NET_WM_STATE_REMOVE
        };
        self.send_root_message(id, self.atoms._NET_WM_STATE, [action, atom, 0, 1, 0])
    }

    fn send_root_message(&self, id: xproto::Window, type_: xproto::Atom, data: [u32; 5]) -> Result<()> {
        let event = xproto::ClientMessageEvent {
            response_type: xproto::CLIENT_MESSAGE_EVENT,
            format: 32,
            sequence: 0,
            window: id,
            type_,
            data: data.into(),
        };
        self.conn.send_event(
            false,
            self.screen().root,
            xproto::EventMask::SubstructureRedirect | xproto::EventMask::SubstructureNotify,
            event,
        )?;
        Ok(())
    }

    pub(super) fn destroy_x_window(&self, handle: WindowHandle, id: xproto::Window) -> Result<()> {
        self.by_id.write().remove(&id);
        self.conn.destroy_window(id)?;
        self.conn.flush()?;
        debug!("destroyed X window {:#x} ({:?})", id, handle);
        Ok(())
    }
}
