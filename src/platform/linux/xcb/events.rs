use super::{window::deliver, XcbDriver};
use crate::{
    error::Result,
    event::{EventKind, InputEvent, Modifiers, MouseButtons},
    handle::WindowHandle,
};
use log::trace;
use x11rb::{
    connection::Connection,
    protocol::{
        xproto::{self, ConnectionExt},
        Event as XEvent,
    },
};

fn buttons(detail: u8) -> Option<MouseButtons> {
    match detail {
        1 => Some(MouseButtons::LEFT_BUTTON),
        2 => Some(MouseButtons::MIDDLE_BUTTON),
        3 => Some(MouseButtons::RIGHT_BUTTON),
        _ => None,
    }
}

fn modifiers(state: u16) -> Modifiers {
    let mut modifiers = Modifiers::empty();
    let mask = |bit: xproto::KeyButMask| state & u16::from(bit) != 0;
    modifiers.set(Modifiers::SHIFT, mask(xproto::KeyButMask::Shift));
    modifiers.set(Modifiers::CONTROL, mask(xproto::KeyButMask::Control));
    modifiers.set(Modifiers::ALT, mask(xproto::KeyButMask::Mod1));
    modifiers.set(Modifiers::LOGO, mask(xproto::KeyButMask::Mod4));
    modifiers
}

impl XcbDriver {
    pub(super) fn poll_x(&self, wait_for_events: bool) -> Result<()> {
        let mut next = if wait_for_events {
            Some(self.conn.wait_for_event()?)
        } else {
            self.conn.poll_for_event()?
        };
        while let Some(xevent) = next {
            if let Some((window, kind)) = self.try_convert_event(xevent)? {
                self.events.raise_local(window, kind)?;
            }
            next = self.conn.poll_for_event()?;
        }
        Ok(())
    }

    fn handle_of(&self, id: xproto::Window) -> Option<WindowHandle> {
        self.by_id.read().get(&id).copied()
    }

    fn try_convert_event(
        &self,
        xevent: XEvent,
    ) -> Result<Option<(Option<WindowHandle>, EventKind)>> {
        let (id, kind) = match xevent {
            XEvent::ClientMessage(event) => {
                let data = event.data.as_data32();
                if event.format == 32
                    && event.type_ == self.atoms.WM_PROTOCOLS
                    && data[0] == self.atoms.WM_DELETE_WINDOW
                {
                    (event.window, EventKind::CloseRequested)
                } else {
                    // Also covers wake-ups sent to the hidden window.
                    return Ok(None);
                }
            }
            XEvent::ConfigureNotify(event) => return self.configure_notify(event.window),
            XEvent::MapNotify(event) => {
                self.set_mapped(event.window, true);
                return Ok(None);
            }
            XEvent::UnmapNotify(event) => {
                self.set_mapped(event.window, false);
                return Ok(None);
            }
            XEvent::FocusIn(event) => (event.event, self.set_focus(event.event, true)?),
            XEvent::FocusOut(event) => (event.event, self.set_focus(event.event, false)?),
            XEvent::ButtonPress(event) => {
                let buttons = match buttons(event.detail) {
                    Some(buttons) => buttons,
                    None => return Ok(None),
                };
                let position = crate::client_point(event.event_x.into(), event.event_y.into());
                (
                    event.event,
                    EventKind::Input(InputEvent::MouseDown { position, buttons }),
                )
            }
            XEvent::ButtonRelease(event) => {
                let buttons = match buttons(event.detail) {
                    Some(buttons) => buttons,
                    None => return Ok(None),
                };
                let position = crate::client_point(event.event_x.into(), event.event_y.into());
                (
                    event.event,
                    EventKind::Input(InputEvent::MouseUp { position, buttons }),
                )
            }
            XEvent::MotionNotify(event) => {
                let position = crate::client_point(event.event_x.into(), event.event_y.into());
                (event.event, EventKind::Input(InputEvent::MouseMove { position }))
            }
            XEvent::KeyPress(event) => (
                event.event,
                EventKind::Input(InputEvent::Key {
                    scancode: event.detail.into(),
                    pressed: true,
                    modifiers: modifiers(u16::from(event.state)),
                }),
            ),
            XEvent::KeyRelease(event) => (
                event.event,
                EventKind::Input(InputEvent::Key {
                    scancode: event.detail.into(),
                    pressed: false,
                    modifiers: modifiers(u16::from(event.state)),
                }),
            ),
            XEvent::Error(e) => {
                let message = format!("{:?}", e);
                self.events.diagnostic(None, "x11", &message);
                return Ok(None);
            }
            other => {
                trace!("ignoring {:?}", other);
                return Ok(None);
            }
        };
        Ok(self.handle_of(id).map(|handle| (Some(handle), kind)))
    }

    fn set_focus(&self, id: xproto::Window, focused: bool) -> Result<EventKind> {
        if let Some(window) = self.handle_of(id).and_then(|h| self.window(h).ok()) {
            window.write().state.focused = focused;
        }
        Ok(EventKind::Focus(focused))
    }

    fn set_mapped(&self, id: xproto::Window, mapped: bool) {
        let window = match self.handle_of(id).and_then(|h| self.window(h).ok()) {
            Some(window) => window,
            None => return,
        };
        let mut window = window.write();
        window.mapped = mapped;
        let change = window.sync_surface(self.native_for(id));
        drop(window);
        deliver(change);
    }

    /// The window manager moved or resized a window. Coordinates in the event
    /// are relative to a possibly reparented frame, so ask for root ones.
    fn configure_notify(
        &self,
        id: xproto::Window,
    ) -> Result<Option<(Option<WindowHandle>, EventKind)>> {
        let handle = match self.handle_of(id) {
            Some(handle) => handle,
            None => return Ok(None),
        };
        let window = match self.window(handle) {
            Ok(window) => window,
            Err(_) => return Ok(None),
        };
        let geometry = self.conn.get_geometry(id)?.reply()?;
        let origin = self
            .conn
            .translate_coordinates(id, self.screen().root, 0, 0)?
            .reply()?;

        let mut window = window.write();
        let insets = window.state.insets();
        let position = crate::screen_point(
            i32::from(origin.dst_x) - insets.left as i32,
            i32::from(origin.dst_y) - insets.top as i32,
        );
        let size = crate::size(geometry.width.into(), geometry.height.into());
        let moved = position != window.state.position;
        let resized = size != window.state.client_size;
        window.state.position = position;
        window.state.client_size = size;
        let reports_resize = resized && !window.has_callbacks();
        let change = window.sync_surface(self.native_for(id));
        drop(window);
        deliver(change);

        if reports_resize {
            self.events.raise_local(
                Some(handle),
                EventKind::Resize {
                    width: size.width,
                    height: size.height,
                },
            )?;
        }
        Ok(if moved {
            Some((Some(handle), EventKind::Move { position }))
        } else {
            None
        })
    }
}
