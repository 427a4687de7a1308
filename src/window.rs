use crate::{
    context::ContextHints,
    error::{Error, Result},
    event_loop::EventLoop,
    handle::{CursorHandle, DisplayHandle, IconHandle, WindowHandle},
    platform::Driver,
    surface::{CoordinatorConfig, NativeWindow, Renderer, SurfaceCoordinator},
    ClientPoint, ScreenPoint, Size,
};
use std::{fmt, sync::Arc};

const TITLE_BAR_HEIGHT: u32 = 24;
const BORDER_WIDTH: u32 = 4;

/// Largest client width or height a driver accepts. A frame around it still
/// fits in `i32` screen coordinates.
pub const MAX_CLIENT_EXTENT: u32 = i32::MAX as u32 - (TITLE_BAR_HEIGHT + 2 * BORDER_WIDTH);

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum WindowMode {
    Normal,
    Minimized,
    Maximized,
    Fullscreen,
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum BorderStyle {
    Borderless,
    Fixed,
    Resizable,
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum CursorShape {
    Arrow,
    Hand,
    Text,
    Crosshair,
    Hidden,
}

/// Distance from each frame edge to the client area.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct Insets {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl BorderStyle {
    pub fn insets(self) -> Insets {
        match self {
            BorderStyle::Borderless => Insets::default(),
            BorderStyle::Fixed => Insets {
                left: 1,
                top: TITLE_BAR_HEIGHT + 1,
                right: 1,
                bottom: 1,
            },
            BorderStyle::Resizable => Insets {
                left: BORDER_WIDTH,
                top: TITLE_BAR_HEIGHT + BORDER_WIDTH,
                right: BORDER_WIDTH,
                bottom: BORDER_WIDTH,
            },
        }
    }
}

impl fmt::Display for WindowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for BorderStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a caller asks for when creating a window.
///
/// Geometry here is a request; drivers may place the window elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowHints {
    pub(crate) title: String,
    pub(crate) position: Option<ScreenPoint>,
    pub(crate) client_size: Size,
    pub(crate) border_style: BorderStyle,
    pub(crate) mode: WindowMode,
    pub(crate) always_on_top: bool,
    pub(crate) visible: bool,
    pub(crate) context: ContextHints,
}

impl WindowHints {
    pub fn new() -> WindowHints {
        WindowHints {
            title: String::from("Window"),
            position: None,
            client_size: crate::size(800, 600),
            border_style: BorderStyle::Resizable,
            mode: WindowMode::Normal,
            always_on_top: false,
            visible: true,
            context: ContextHints::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_position(mut self, x: i32, y: i32) -> Self {
        self.position = Some(crate::screen_point(x, y));
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.client_size = crate::size(width, height);
        self
    }

    pub fn with_border_style(mut self, border_style: BorderStyle) -> Self {
        self.border_style = border_style;
        self
    }

    pub fn with_mode(mut self, mode: WindowMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_always_on_top(mut self, always_on_top: bool) -> Self {
        self.always_on_top = always_on_top;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_context(mut self, context: ContextHints) -> Self {
        self.context = context;
        self
    }

    pub fn context(&self) -> &ContextHints {
        &self.context
    }

    pub fn build(self, el: &EventLoop) -> Result<Window> {
        el.create_window(&self)
    }
}

impl Default for WindowHints {
    fn default() -> Self {
        Self::new()
    }
}

/// Driver-independent bookkeeping for one native window.
///
/// Positions are frame positions in screen space; sizes without a `frame_`
/// prefix are client sizes.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowState {
    pub title: String,
    pub position: ScreenPoint,
    pub client_size: Size,
    pub min_client_size: Option<Size>,
    pub max_client_size: Option<Size>,
    pub border_style: BorderStyle,
    pub mode: WindowMode,
    pub always_on_top: bool,
    pub visible: bool,
    pub focused: bool,
    pub destroyed: bool,
    pub icon: Option<IconHandle>,
    pub cursor: Option<CursorHandle>,
    pub display: DisplayHandle,
    restore: Option<(ScreenPoint, Size)>,
}

impl WindowState {
    pub fn new(hints: &WindowHints, display: DisplayHandle) -> Self {
        Self {
            title: hints.title.clone(),
            position: hints.position.unwrap_or_else(ScreenPoint::zero),
            client_size: hints.client_size,
            min_client_size: None,
            max_client_size: None,
            border_style: hints.border_style,
            mode: WindowMode::Normal,
            always_on_top: hints.always_on_top,
            visible: hints.visible,
            focused: false,
            destroyed: false,
            icon: None,
            cursor: None,
            display,
            restore: None,
        }
    }

    pub fn insets(&self) -> Insets {
        if self.mode == WindowMode::Fullscreen {
            Insets::default()
        } else {
            self.border_style.insets()
        }
    }

    pub fn frame_size(&self) -> Size {
        let insets = self.insets();
        crate::size(
            self.client_size
                .width
                .saturating_add(insets.left + insets.right),
            self.client_size
                .height
                .saturating_add(insets.top + insets.bottom),
        )
    }

    pub fn client_origin(&self) -> ScreenPoint {
        let insets = self.insets();
        crate::screen_point(
            self.position.x.saturating_add(insets.left as i32),
            self.position.y.saturating_add(insets.top as i32),
        )
    }

    pub fn clamp(&self, size: Size) -> Size {
        let mut size = size;
        if let Some(min) = self.min_client_size {
            size = size.max(min);
        }
        if let Some(max) = self.max_client_size {
            size = size.min(max);
        }
        size
    }

    /// Returns the client size actually applied.
    pub fn set_client_size(&mut self, size: Size) -> Size {
        self.client_size = self.clamp(size);
        self.client_size
    }

    /// A frame smaller than the decorations keeps a 1x1 client area.
    pub fn set_frame_size(&mut self, size: Size) -> Size {
        let insets = self.insets();
        let extent = |frame: u32, inset: u32| {
            frame.saturating_sub(inset).clamp(1, MAX_CLIENT_EXTENT)
        };
        let client = crate::size(
            extent(size.width, insets.left + insets.right),
            extent(size.height, insets.top + insets.bottom),
        );
        self.set_client_size(client)
    }

    pub fn set_min_client_size(&mut self, min: Option<Size>) -> Result<()> {
        if let (Some(min), Some(max)) = (min, self.max_client_size) {
            if min.width > max.width || min.height > max.height {
                return Err(Error::UnsupportedValue {
                    property: "min_client_size",
                    value: format!("{}x{}", min.width, min.height),
                });
            }
        }
        self.min_client_size = min;
        self.client_size = self.clamp(self.client_size);
        Ok(())
    }

    pub fn set_max_client_size(&mut self, max: Option<Size>) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min_client_size, max) {
            if min.width > max.width || min.height > max.height {
                return Err(Error::UnsupportedValue {
                    property: "max_client_size",
                    value: format!("{}x{}", max.width, max.height),
                });
            }
        }
        self.max_client_size = max;
        self.client_size = self.clamp(self.client_size);
        Ok(())
    }

    pub fn screen_to_client(&self, point: ScreenPoint) -> ClientPoint {
        let origin = self.client_origin();
        crate::client_point(
            point.x.wrapping_sub(origin.x),
            point.y.wrapping_sub(origin.y),
        )
    }

    pub fn client_to_screen(&self, point: ClientPoint) -> ScreenPoint {
        let origin = self.client_origin();
        crate::screen_point(
            point.x.wrapping_add(origin.x),
            point.y.wrapping_add(origin.y),
        )
    }

    /// Applies a mode change against a display of `display_size`. Maximized
    /// and fullscreen windows remember their normal geometry for restoring.
    pub fn apply_mode(&mut self, mode: WindowMode, display_size: Size) {
        if mode == self.mode {
            return;
        }
        let was_normal = matches!(self.mode, WindowMode::Normal | WindowMode::Minimized);
        if was_normal && matches!(mode, WindowMode::Maximized | WindowMode::Fullscreen) {
            self.restore = Some((self.position, self.client_size));
        }
        self.mode = mode;
        match mode {
            WindowMode::Maximized | WindowMode::Fullscreen => {
                self.position = ScreenPoint::zero();
                self.set_frame_size(display_size);
            }
            WindowMode::Normal => {
                if let Some((position, client_size)) = self.restore.take() {
                    self.position = position;
                    self.set_client_size(client_size);
                }
            }
            WindowMode::Minimized => {}
        }
    }

    /// Whether the OS would back this window with a drawable surface.
    pub fn has_surface(&self) -> bool {
        self.visible && !self.destroyed && self.mode != WindowMode::Minimized
    }
}

/// Convenience wrapper pairing a window handle with the driver that owns it.
#[derive(Clone)]
pub struct Window {
    pub(crate) handle: WindowHandle,
    pub(crate) driver: Arc<dyn Driver>,
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("handle", &self.handle)
            .field("driver", &self.driver.name())
            .finish()
    }
}

impl Window {
    pub fn handle(&self) -> WindowHandle {
        self.handle
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn title(&self) -> Result<String> {
        self.driver.title(self.handle)
    }

    pub fn set_title(&self, title: &str) -> Result<()> {
        self.driver.set_title(self.handle, title)
    }

    pub fn position(&self) -> Result<ScreenPoint> {
        self.driver.position(self.handle)
    }

    pub fn set_position(&self, position: ScreenPoint) -> Result<()> {
        self.driver.set_position(self.handle, position)
    }

    pub fn size(&self) -> Result<Size> {
        self.driver.size(self.handle)
    }

    pub fn client_size(&self) -> Result<Size> {
        self.driver.client_size(self.handle)
    }

    pub fn set_client_size(&self, size: Size) -> Result<()> {
        self.driver.set_client_size(self.handle, size)
    }

    pub fn set_mode(&self, mode: WindowMode) -> Result<()> {
        self.driver.set_mode(self.handle, mode)
    }

    pub fn set_border_style(&self, style: BorderStyle) -> Result<()> {
        self.driver.set_border_style(self.handle, style)
    }

    pub fn focus(&self) -> Result<()> {
        self.driver.focus(self.handle)
    }

    pub fn is_focused(&self) -> Result<bool> {
        self.driver.is_focused(self.handle)
    }

    pub fn set_icon(&self, icon: Option<IconHandle>) -> Result<()> {
        self.driver.set_icon(self.handle, icon)
    }

    pub fn native_window(&self) -> Result<NativeWindow> {
        self.driver.native_window(self.handle)
    }

    pub fn screen_to_client(&self, point: ScreenPoint) -> Result<ClientPoint> {
        self.driver.screen_to_client(self.handle, point)
    }

    pub fn client_to_screen(&self, point: ClientPoint) -> Result<ScreenPoint> {
        self.driver.client_to_screen(self.handle, point)
    }

    pub fn is_destroyed(&self) -> bool {
        self.driver.is_window_destroyed(self.handle)
    }

    /// Creates a surface coordinator for this window and registers it for the
    /// driver's surface callbacks. Rendering starts once the OS reports a
    /// usable surface.
    pub fn attach_renderer<R: Renderer>(
        &self,
        renderer: R,
        config: CoordinatorConfig,
    ) -> Result<Arc<SurfaceCoordinator>> {
        let coordinator = Arc::new(SurfaceCoordinator::new(
            self.driver.graphics(),
            self.driver.events(),
            Some(self.handle),
            Box::new(renderer),
            config,
        ));
        self.driver
            .register_surface_callbacks(self.handle, coordinator.clone())?;
        Ok(coordinator)
    }

    pub fn destroy(self) -> Result<()> {
        self.driver.destroy(self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleRegistry;

    fn state(style: BorderStyle) -> WindowState {
        let registry = HandleRegistry::new();
        let hints = WindowHints::new()
            .with_position(100, 50)
            .with_size(640, 480)
            .with_border_style(style);
        WindowState::new(&hints, registry.allocate())
    }

    #[test]
    fn frame_wraps_client_by_insets() {
        let window = state(BorderStyle::Resizable);
        assert_eq!(window.frame_size(), crate::size(648, 512));
        assert_eq!(window.client_origin(), crate::screen_point(104, 78));

        let borderless = state(BorderStyle::Borderless);
        assert_eq!(borderless.frame_size(), borderless.client_size);
        assert_eq!(borderless.client_origin(), borderless.position);
    }

    #[test]
    fn client_screen_conversion_round_trips() {
        let window = state(BorderStyle::Fixed);
        for &(x, y) in &[(0, 0), (-30, 12), (639, 479), (5000, -7000)] {
            let p = crate::client_point(x, y);
            assert_eq!(window.screen_to_client(window.client_to_screen(p)), p);
            let s = crate::screen_point(x, y);
            assert_eq!(window.client_to_screen(window.screen_to_client(s)), s);
        }
    }

    #[test]
    fn client_size_respects_limits() {
        let mut window = state(BorderStyle::Resizable);
        window.set_min_client_size(Some(crate::size(200, 100))).unwrap();
        window.set_max_client_size(Some(crate::size(1024, 768))).unwrap();
        assert_eq!(window.set_client_size(crate::size(50, 2000)), crate::size(200, 768));
        assert!(matches!(
            window.set_min_client_size(Some(crate::size(2000, 10))),
            Err(Error::UnsupportedValue { .. })
        ));
        assert_eq!(window.min_client_size, Some(crate::size(200, 100)));
    }

    #[test]
    fn shrinking_max_reclamps_current_size() {
        let mut window = state(BorderStyle::Borderless);
        window.set_max_client_size(Some(crate::size(320, 240))).unwrap();
        assert_eq!(window.client_size, crate::size(320, 240));
    }

    #[test]
    fn fullscreen_restores_previous_geometry() {
        let mut window = state(BorderStyle::Resizable);
        window.apply_mode(WindowMode::Fullscreen, crate::size(1920, 1080));
        assert_eq!(window.client_size, crate::size(1920, 1080));
        assert_eq!(window.position, ScreenPoint::zero());

        window.apply_mode(WindowMode::Normal, crate::size(1920, 1080));
        assert_eq!(window.client_size, crate::size(640, 480));
        assert_eq!(window.position, crate::screen_point(100, 50));
    }

    #[test]
    fn frame_smaller_than_decorations_keeps_a_client_area() {
        let mut window = state(BorderStyle::Resizable);
        assert_eq!(window.set_frame_size(crate::size(1, 1)), crate::size(1, 1));
        assert_eq!(window.frame_size(), crate::size(9, 33));

        window.set_min_client_size(Some(crate::size(20, 10))).unwrap();
        assert_eq!(window.set_frame_size(crate::size(1, 1)), crate::size(20, 10));
    }

    #[test]
    fn huge_frames_stay_in_screen_space() {
        let mut window = state(BorderStyle::Resizable);
        window.set_frame_size(crate::size(u32::MAX, u32::MAX));
        assert_eq!(
            window.client_size,
            crate::size(MAX_CLIENT_EXTENT, MAX_CLIENT_EXTENT)
        );
        assert!(window.frame_size().height <= i32::MAX as u32);

        window.position = crate::screen_point(i32::MAX, i32::MIN);
        let p = crate::client_point(i32::MAX, -1);
        assert_eq!(window.screen_to_client(window.client_to_screen(p)), p);
    }

    #[test]
    fn minimized_windows_have_no_surface() {
        let mut window = state(BorderStyle::Resizable);
        assert!(window.has_surface());
        window.apply_mode(WindowMode::Minimized, crate::size(1920, 1080));
        assert!(!window.has_surface());
    }
}
