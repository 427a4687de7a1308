mod platform;

pub mod context;
pub mod error;
pub mod event;
pub mod event_loop;
pub mod handle;
pub mod surface;
pub mod window;

pub use crate::{
    error::{Error, NativeError, Result},
    event::{Event, EventKind},
    event_loop::{ControlFlow, EventLoop, EventQueue, EventSender},
    handle::*,
    platform::{headless, Capabilities, Driver, Platform},
    surface::{SurfaceCoordinator, SurfaceState},
    window::{Window, WindowHints},
};

#[cfg(all(target_os = "linux", feature = "x11"))]
pub use crate::platform::xcb;

/// Unit for display-relative coordinates, origin at the top-left of the display.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ScreenSpace {}

/// Unit for coordinates relative to the top-left of a window's client area.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ClientSpace {}

pub type ScreenPoint = euclid::Point2D<i32, ScreenSpace>;
pub type ClientPoint = euclid::Point2D<i32, ClientSpace>;
pub type Size = euclid::Size2D<u32, ScreenSpace>;
pub type Offset = euclid::Vector2D<i32, ScreenSpace>;

pub fn screen_point(x: i32, y: i32) -> ScreenPoint {
    euclid::point2(x, y)
}

pub fn client_point(x: i32, y: i32) -> ClientPoint {
    euclid::point2(x, y)
}

pub fn size(width: u32, height: u32) -> Size {
    euclid::size2(width, height)
}
