mod coordinator;
mod render_thread;

pub use self::{
    coordinator::{CoordinatorConfig, SurfaceCoordinator},
    render_thread::{Frame, Renderer},
};

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::fmt;

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum SurfaceState {
    /// No native surface.
    Absent,
    /// The OS handed over a native surface; nothing is rendering to it yet.
    Created,
    /// Context and window surface exist and the render thread is running.
    Ready,
    /// Teardown in progress; the render thread is being stopped.
    Destroying,
}

impl fmt::Display for SurfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The OS-owned drawable a window surface is created on.
///
/// Equality is identity of the native object: a recreated native surface
/// compares unequal to the one it replaces.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct NativeWindow {
    pub window: RawWindowHandle,
    pub display: RawDisplayHandle,
}

// Raw handles are plain identifiers here; nothing in this crate dereferences
// them off the thread that owns the native connection.
unsafe impl Send for NativeWindow {}
unsafe impl Sync for NativeWindow {}

impl NativeWindow {
    pub fn new(window: RawWindowHandle, display: RawDisplayHandle) -> Self {
        Self { window, display }
    }
}

/// What the OS calls when the native surface behind a window comes and goes.
///
/// All three are delivered on a single OS-owned thread, never the render thread.
/// `surface_destroyed` must not return while anything still renders to the
/// surface.
pub trait SurfaceCallbacks: Send + Sync {
    fn surface_created(&self, native: NativeWindow);
    fn surface_changed(&self, native: NativeWindow, width: u32, height: u32);
    fn surface_destroyed(&self);
}
