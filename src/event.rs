use crate::{
    handle::{JoystickHandle, WindowHandle},
    ClientPoint, ScreenPoint,
};
use bitflags::bitflags;
use std::time::Instant;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct MouseButtons: u8 {
        const LEFT_BUTTON = 0b00000001;
        const RIGHT_BUTTON = 0b00000010;
        const MIDDLE_BUTTON = 0b00000100;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b00000001;
        const CONTROL = 0b00000010;
        const ALT = 0b00000100;
        const LOGO = 0b00001000;
    }
}

/// One event as handed to the application.
///
/// `window` is `None` for global events (joystick hot-plug, diagnostics not
/// tied to a window). `sequence` is the position in the consumed stream and
/// is assigned by the queue when the event is delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub window: Option<WindowHandle>,
    pub timestamp: Instant,
    pub sequence: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Resize { width: u32, height: u32 },
    Move { position: ScreenPoint },
    CloseRequested,
    Destroyed,
    Focus(bool),
    Input(InputEvent),
    Surface(SurfaceEvent),
    Diagnostic(Diagnostic),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    MouseDown {
        position: ClientPoint,
        buttons: MouseButtons,
    },
    MouseUp {
        position: ClientPoint,
        buttons: MouseButtons,
    },
    MouseMove {
        position: ClientPoint,
    },
    Touch {
        id: u64,
        phase: TouchPhase,
        position: ClientPoint,
    },
    Key {
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

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum TouchPhase {
    Started,
    Moved,
    Ended,
    Cancelled,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SurfaceEvent {
    Created,
    Changed { width: u32, height: u32 },
    Destroyed,
}

/// A failure that happened somewhere the caller could not be handed a `Result`,
/// typically an OS callback or the render thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub source: &'static str,
    pub message: String,
}

impl Diagnostic {
    pub fn new(source: &'static str, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
        }
    }
}

impl Event {
    pub fn is_diagnostic(&self) -> bool {
        matches!(self.kind, EventKind::Diagnostic(_))
    }
}
