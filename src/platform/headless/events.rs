use super::HeadlessDriver;
use crate::{
    error::{Error, Result},
    event::{EventKind, InputEvent, Modifiers, MouseButtons, TouchPhase},
    handle::{JoystickHandle, WindowHandle},
    ScreenPoint,
};
use log::trace;
use std::sync::atomic::Ordering;

/// What the simulated OS reports. Positions are in display coordinates, as a
/// real windowing system would report them before translation.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    /// Interrupts a blocking `process_events`. Produces no event.
    Wake,
    CloseRequested(WindowHandle),
    FocusChanged {
        window: WindowHandle,
        focused: bool,
    },
    PointerMoved {
        window: WindowHandle,
        position: ScreenPoint,
    },
    PointerButton {
        window: WindowHandle,
        position: ScreenPoint,
        buttons: MouseButtons,
        pressed: bool,
    },
    Touch {
        window: WindowHandle,
        id: u64,
        phase: TouchPhase,
        position: ScreenPoint,
    },
    Key {
        window: WindowHandle,
        scancode: u32,
        pressed: bool,
        modifiers: Modifiers,
    },
    JoystickConnected(JoystickHandle),
    JoystickDisconnected(JoystickHandle),
    JoystickAxis {
        joystick: JoystickHandle,
        axis: u8,
        value: f32,
    },
    JoystickButton {
        joystick: JoystickHandle,
        button: u8,
        pressed: bool,
    },
}

impl HeadlessDriver {
    pub(super) fn poll_native(&self, wait_for_events: bool) -> Result<()> {
        let mut next = if wait_for_events {
            Some(self.native_rx.recv().map_err(|_| Error::Disconnected)?)
        } else {
            self.native_rx.try_recv().ok()
        };
        while let Some(native) = next {
            if let Some((window, kind)) = self.try_convert_event(native) {
                self.events.raise_local(window, kind)?;
            }
            next = self.native_rx.try_recv().ok();
        }
        Ok(())
    }

    fn try_convert_event(&self, native: NativeEvent) -> Option<(Option<WindowHandle>, EventKind)> {
        let (window, kind) = match native {
            NativeEvent::Wake => {
                self.wake_pending.store(false, Ordering::Release);
                return None;
            }
            NativeEvent::CloseRequested(window) => {
                self.window(window).ok()?;
                (window, EventKind::CloseRequested)
            }
            NativeEvent::FocusChanged {
                window,
                focused: true,
            } => match self.take_focus(window) {
                Ok(true) => (window, EventKind::Focus(true)),
                Ok(false) => return None,
                Err(e) => {
                    trace!("focus change for {:?} ignored: {}", window, e);
                    return None;
                }
            },
            NativeEvent::FocusChanged {
                window,
                focused: false,
            } => {
                let record = self.window(window).ok()?;
                let mut record = record.write();
                if record.state.destroyed || !record.state.focused {
                    return None;
                }
                record.state.focused = false;
                (window, EventKind::Focus(false))
            }
            NativeEvent::PointerMoved { window, position } => {
                let position = self.screen_to_client_of(window, position)?;
                (window, EventKind::Input(InputEvent::MouseMove { position }))
            }
            NativeEvent::PointerButton {
                window,
                position,
                buttons,
                pressed,
            } => {
                let position = self.screen_to_client_of(window, position)?;
                let input = if pressed {
                    InputEvent::MouseDown { position, buttons }
                } else {
                    InputEvent::MouseUp { position, buttons }
                };
                (window, EventKind::Input(input))
            }
            NativeEvent::Touch {
                window,
                id,
                phase,
                position,
            } => {
                let position = self.screen_to_client_of(window, position)?;
                (
                    window,
                    EventKind::Input(InputEvent::Touch {
                        id,
                        phase,
                        position,
                    }),
                )
            }
            NativeEvent::Key {
                window,
                scancode,
                pressed,
                modifiers,
            } => {
                self.window(window).ok()?;
                (
                    window,
                    EventKind::Input(InputEvent::Key {
                        scancode,
                        pressed,
                        modifiers,
                    }),
                )
            }
            NativeEvent::JoystickConnected(joystick) => {
                return Some((None, EventKind::Input(InputEvent::JoystickConnected(joystick))));
            }
            NativeEvent::JoystickDisconnected(joystick) => {
                return Some((
                    None,
                    EventKind::Input(InputEvent::JoystickDisconnected(joystick)),
                ));
            }
            NativeEvent::JoystickAxis {
                joystick,
                axis,
                value,
            } => {
                if !self.joysticks.lock().contains(&joystick) {
                    trace!("dropping axis event of unplugged {:?}", joystick);
                    return None;
                }
                return Some((
                    None,
                    EventKind::Input(InputEvent::JoystickAxis {
                        joystick,
                        axis,
                        value,
                    }),
                ));
            }
            NativeEvent::JoystickButton {
                joystick,
                button,
                pressed,
            } => {
                if !self.joysticks.lock().contains(&joystick) {
                    trace!("dropping button event of unplugged {:?}", joystick);
                    return None;
                }
                return Some((
                    None,
                    EventKind::Input(InputEvent::JoystickButton {
                        joystick,
                        button,
                        pressed,
                    }),
                ));
            }
        };
        Some((Some(window), kind))
    }

    fn screen_to_client_of(
        &self,
        window: WindowHandle,
        position: ScreenPoint,
    ) -> Option<crate::ClientPoint> {
        match self.window(window) {
            Ok(record) => Some(record.read().state.screen_to_client(position)),
            Err(_) => {
                trace!("dropping pointer event for {:?}", window);
                None
            }
        }
    }
}
