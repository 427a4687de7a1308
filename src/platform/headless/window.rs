use super::callbacks::{Delivery, SurfaceCommand};
use crate::{
    surface::{NativeWindow, SurfaceCallbacks},
    window::{WindowMode, WindowState},
    Size,
};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle, WebDisplayHandle, WebWindowHandle};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

pub(super) struct HeadlessWindow {
    pub(super) state: WindowState,
    native_id: u32,
    callbacks: Option<Arc<dyn SurfaceCallbacks>>,
    /// Size last reported through `surface_changed`, while a surface exists.
    surface: Option<(u32, u32)>,
}

impl fmt::Debug for HeadlessWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessWindow")
            .field("state", &self.state)
            .field("native_id", &self.native_id)
            .field("callbacks", &self.callbacks.is_some())
            .field("surface", &self.surface)
            .finish()
    }
}

/// The native surface of a headless window. The id changes every time the
/// surface is recreated, the way a mobile OS hands out a new native window.
pub(super) fn native_window(id: u32) -> NativeWindow {
    let mut window = WebWindowHandle::empty();
    window.id = id;
    NativeWindow::new(
        RawWindowHandle::Web(window),
        RawDisplayHandle::Web(WebDisplayHandle::empty()),
    )
}

/// Where a window without a requested position lands.
pub(super) fn centered(frame: Size, display: Size) -> (i32, i32) {
    let offset = |display: u32, frame: u32| {
        let centered = (i64::from(display) - i64::from(frame)) / 2;
        centered.clamp(0, i64::from(i32::MAX)) as i32
    };
    (
        offset(display.width, frame.width),
        offset(display.height, frame.height),
    )
}

impl HeadlessWindow {
    pub(super) fn new(state: WindowState, native_id: u32) -> Self {
        Self {
            state,
            native_id,
            callbacks: None,
            surface: None,
        }
    }

    pub(super) fn native(&self) -> NativeWindow {
        native_window(self.native_id)
    }

    pub(super) fn has_callbacks(&self) -> bool {
        self.callbacks.is_some()
    }

    pub(super) fn has_live_surface(&self) -> bool {
        self.surface.is_some()
    }

    /// Replaces the surface callbacks. The previous receiver, if it was told
    /// about a surface, is told that surface is gone.
    pub(super) fn set_callbacks(
        &mut self,
        callbacks: Arc<dyn SurfaceCallbacks>,
        ids: &AtomicU32,
    ) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        if let (Some(previous), Some(_)) = (self.callbacks.take(), self.surface.take()) {
            deliveries.push((previous, SurfaceCommand::Destroyed));
        }
        self.callbacks = Some(callbacks);
        deliveries.extend(self.sync_surface(ids));
        deliveries
    }

    /// Compares what the OS would currently back this window with against
    /// what the callbacks were last told, and returns the callbacks that
    /// bring them in line.
    pub(super) fn sync_surface(&mut self, ids: &AtomicU32) -> Vec<Delivery> {
        let callbacks = match &self.callbacks {
            Some(callbacks) => callbacks.clone(),
            None => return Vec::new(),
        };
        let size = self.state.client_size;
        let current = (size.width, size.height);
        match (self.state.has_surface(), self.surface) {
            (true, None) => {
                self.native_id = ids.fetch_add(1, Ordering::Relaxed);
                let native = self.native();
                self.surface = Some(current);
                vec![
                    (callbacks.clone(), SurfaceCommand::Created(native)),
                    (
                        callbacks,
                        SurfaceCommand::Changed(native, current.0, current.1),
                    ),
                ]
            }
            (true, Some(last)) if last != current => {
                self.surface = Some(current);
                vec![(
                    callbacks,
                    SurfaceCommand::Changed(self.native(), current.0, current.1),
                )]
            }
            (false, Some(_)) => {
                self.surface = None;
                vec![(callbacks, SurfaceCommand::Destroyed)]
            }
            _ => Vec::new(),
        }
    }

    pub(super) fn is_minimized(&self) -> bool {
        self.state.mode == WindowMode::Minimized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{handle::HandleRegistry, window::WindowHints};

    struct Ignore;

    impl SurfaceCallbacks for Ignore {
        fn surface_created(&self, _native: NativeWindow) {}
        fn surface_changed(&self, _native: NativeWindow, _width: u32, _height: u32) {}
        fn surface_destroyed(&self) {}
    }

    fn commands(deliveries: Vec<Delivery>) -> Vec<SurfaceCommand> {
        deliveries.into_iter().map(|(_, command)| command).collect()
    }

    #[test]
    fn surface_follows_window_state() {
        let registry = HandleRegistry::new();
        let ids = AtomicU32::new(10);
        let hints = WindowHints::new().with_size(320, 200);
        let mut window = HeadlessWindow::new(WindowState::new(&hints, registry.allocate()), 1);
        assert!(window.sync_surface(&ids).is_empty());

        let created = commands(window.set_callbacks(Arc::new(Ignore), &ids));
        assert_eq!(
            created,
            vec![
                SurfaceCommand::Created(native_window(10)),
                SurfaceCommand::Changed(native_window(10), 320, 200),
            ]
        );
        assert!(window.sync_surface(&ids).is_empty());

        window.state.set_client_size(crate::size(640, 400));
        assert_eq!(
            commands(window.sync_surface(&ids)),
            vec![SurfaceCommand::Changed(native_window(10), 640, 400)]
        );

        window.state.mode = WindowMode::Minimized;
        assert_eq!(commands(window.sync_surface(&ids)), vec![SurfaceCommand::Destroyed]);

        window.state.mode = WindowMode::Normal;
        let recreated = commands(window.sync_surface(&ids));
        assert_eq!(recreated[0], SurfaceCommand::Created(native_window(11)));
    }

    #[test]
    fn replacing_callbacks_retires_the_old_surface() {
        let registry = HandleRegistry::new();
        let ids = AtomicU32::new(1);
        let hints = WindowHints::new();
        let mut window = HeadlessWindow::new(WindowState::new(&hints, registry.allocate()), 0);
        let _ = window.set_callbacks(Arc::new(Ignore), &ids);
        let replaced = commands(window.set_callbacks(Arc::new(Ignore), &ids));
        assert_eq!(replaced[0], SurfaceCommand::Destroyed);
        assert!(matches!(replaced[1], SurfaceCommand::Created(_)));
    }

    #[test]
    fn windows_are_centered_on_the_display() {
        assert_eq!(centered(crate::size(800, 600), crate::size(1920, 1080)), (560, 240));
        assert_eq!(centered(crate::size(4000, 600), crate::size(1920, 1080)), (0, 240));
        assert_eq!(
            centered(crate::size(10, 10), crate::size(u32::MAX, 1080)),
            (2_147_483_642, 535)
        );
    }
}
