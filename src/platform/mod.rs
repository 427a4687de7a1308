//! The window component contract and the drivers implementing it.

pub mod headless;

#[cfg(all(target_os = "linux", feature = "x11"))]
mod linux;

#[cfg(all(target_os = "linux", feature = "x11"))]
pub use self::linux::xcb;

use crate::{
    context::{ApiSupport, ContextHints, GraphicsBinding},
    error::{Error, Result},
    event_loop::{EventSender, Waker},
    handle::{CursorHandle, DisplayHandle, IconHandle, WindowHandle},
    surface::{NativeWindow, SurfaceCallbacks},
    window::{BorderStyle, CursorShape, WindowHints, WindowMode, MAX_CLIENT_EXTENT},
    ClientPoint, ScreenPoint, Size,
};
use log::info;
use std::{env, fmt, sync::Arc};

/// Environment variable overriding platform detection.
pub const PLATFORM_ENV: &str = "TETHER_PLATFORM";

/// Optional features a driver advertises. Callers are expected to check these
/// before calling the gated operations; drivers still reject the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub can_set_icon: bool,
    pub can_get_display: bool,
    pub can_set_cursor: bool,
    pub supported_modes: Vec<WindowMode>,
    pub supported_styles: Vec<BorderStyle>,
    pub supported_apis: Vec<ApiSupport>,
}

impl Capabilities {
    pub fn require_icon(&self) -> Result<()> {
        if self.can_set_icon {
            Ok(())
        } else {
            Err(Error::NotSupported("set_icon"))
        }
    }

    pub fn require_display(&self) -> Result<()> {
        if self.can_get_display {
            Ok(())
        } else {
            Err(Error::NotSupported("display"))
        }
    }

    pub fn require_cursor(&self) -> Result<()> {
        if self.can_set_cursor {
            Ok(())
        } else {
            Err(Error::NotSupported("set_cursor"))
        }
    }

    pub fn check_mode(&self, mode: WindowMode) -> Result<()> {
        if self.supported_modes.contains(&mode) {
            Ok(())
        } else {
            Err(Error::UnsupportedValue {
                property: "mode",
                value: mode.to_string(),
            })
        }
    }

    pub fn check_style(&self, style: BorderStyle) -> Result<()> {
        if self.supported_styles.contains(&style) {
            Ok(())
        } else {
            Err(Error::UnsupportedValue {
                property: "border_style",
                value: style.to_string(),
            })
        }
    }

    /// `GraphicsApi::None` needs no context and is always accepted.
    pub fn check_context(&self, hints: &ContextHints) -> Result<()> {
        if hints.api == crate::context::GraphicsApi::None
            || self.supported_apis.iter().any(|s| s.satisfies(hints))
        {
            Ok(())
        } else {
            Err(Error::UnsupportedHint(format!(
                "{:?} {}.{} {:?}",
                hints.api, hints.version.0, hints.version.1, hints.profile
            )))
        }
    }

    /// Validates everything in `hints` a driver cannot honor.
    pub fn check_hints(&self, hints: &WindowHints) -> Result<()> {
        self.check_context(hints.context())?;
        self.check_style(hints.border_style).map_err(|_| {
            Error::UnsupportedHint(format!("border style {}", hints.border_style))
        })?;
        self.check_mode(hints.mode)
            .map_err(|_| Error::UnsupportedHint(format!("mode {}", hints.mode)))
    }
}

/// A platform window driver.
///
/// Every operation taking a window handle fails with `InvalidHandle` when the
/// handle is null, destroyed, or was issued by another driver.
pub trait Driver: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;
    fn capabilities(&self) -> &Capabilities;
    /// Sender for the queue this driver pumps native events into.
    fn events(&self) -> EventSender;
    fn graphics(&self) -> GraphicsBinding;
    fn waker(&self) -> Waker;

    /// Interrupts a `process_events(true)` blocked on another thread.
    fn wake(&self) {
        (self.waker())()
    }

    /// Fails with `UnsupportedHint` without allocating anything when the
    /// hints cannot be honored.
    fn create(&self, hints: &WindowHints) -> Result<WindowHandle>;
    fn destroy(&self, window: WindowHandle) -> Result<()>;
    fn is_window_destroyed(&self, window: WindowHandle) -> bool;
    fn window_count(&self) -> usize;

    fn title(&self, window: WindowHandle) -> Result<String>;
    fn set_title(&self, window: WindowHandle, title: &str) -> Result<()>;

    /// Frame position in display coordinates.
    fn position(&self, window: WindowHandle) -> Result<ScreenPoint>;
    fn set_position(&self, window: WindowHandle, position: ScreenPoint) -> Result<()>;
    /// Frame size.
    fn size(&self, window: WindowHandle) -> Result<Size>;
    fn set_size(&self, window: WindowHandle, size: Size) -> Result<()>;
    fn client_size(&self, window: WindowHandle) -> Result<Size>;
    fn set_client_size(&self, window: WindowHandle, size: Size) -> Result<()>;
    fn min_client_size(&self, window: WindowHandle) -> Result<Option<Size>>;
    fn set_min_client_size(&self, window: WindowHandle, size: Option<Size>) -> Result<()>;
    fn max_client_size(&self, window: WindowHandle) -> Result<Option<Size>>;
    fn set_max_client_size(&self, window: WindowHandle, size: Option<Size>) -> Result<()>;

    fn border_style(&self, window: WindowHandle) -> Result<BorderStyle>;
    fn set_border_style(&self, window: WindowHandle, style: BorderStyle) -> Result<()>;
    fn mode(&self, window: WindowHandle) -> Result<WindowMode>;
    fn set_mode(&self, window: WindowHandle, mode: WindowMode) -> Result<()>;
    fn always_on_top(&self, window: WindowHandle) -> Result<bool>;
    fn set_always_on_top(&self, window: WindowHandle, always_on_top: bool) -> Result<()>;
    fn focus(&self, window: WindowHandle) -> Result<()>;
    fn is_focused(&self, window: WindowHandle) -> Result<bool>;

    fn screen_to_client(&self, window: WindowHandle, point: ScreenPoint) -> Result<ClientPoint>;
    fn client_to_screen(&self, window: WindowHandle, point: ClientPoint) -> Result<ScreenPoint>;

    /// Gated by `can_set_icon`. `rgba` holds `width * height` pixels.
    fn create_icon(&self, width: u32, height: u32, rgba: &[u8]) -> Result<IconHandle>;
    fn destroy_icon(&self, icon: IconHandle) -> Result<()>;
    fn set_icon(&self, window: WindowHandle, icon: Option<IconHandle>) -> Result<()>;
    /// Gated by `can_set_cursor`.
    fn create_cursor(&self, shape: CursorShape) -> Result<CursorHandle>;
    fn destroy_cursor(&self, cursor: CursorHandle) -> Result<()>;
    fn set_cursor(&self, window: WindowHandle, cursor: Option<CursorHandle>) -> Result<()>;
    /// Gated by `can_get_display`.
    fn display(&self, window: WindowHandle) -> Result<DisplayHandle>;

    fn native_window(&self, window: WindowHandle) -> Result<NativeWindow>;
    /// The callbacks fire immediately if the window already has a surface.
    fn register_surface_callbacks(
        &self,
        window: WindowHandle,
        callbacks: Arc<dyn SurfaceCallbacks>,
    ) -> Result<()>;

    /// Pumps the native event source into the event queue. With
    /// `wait_for_events`, may block until something arrives or `waker` fires.
    fn process_events(&self, wait_for_events: bool) -> Result<()>;

    /// Presents the surface bound to the context current on the calling thread.
    fn swap_buffers(&self, window: WindowHandle) -> Result<()>;
}

/// Rejects empty sizes and sizes whose frame would not fit in screen space.
pub fn check_size(property: &'static str, size: Size) -> Result<()> {
    let fits = |extent: u32| (1..=MAX_CLIENT_EXTENT).contains(&extent);
    if !fits(size.width) || !fits(size.height) {
        return Err(Error::UnsupportedValue {
            property,
            value: format!("{}x{}", size.width, size.height),
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub enum Platform {
    Headless(headless::HeadlessConfig),
    #[cfg(all(target_os = "linux", feature = "x11"))]
    Xcb,
}

impl Platform {
    /// Picks a driver from `TETHER_PLATFORM`, falling back to X11 when built
    /// with it and `DISPLAY` is set, and to the headless driver otherwise.
    pub fn detect() -> Result<Platform> {
        match env::var(PLATFORM_ENV) {
            Ok(name) => Self::from_name(&name),
            Err(_) => Ok(Self::fallback()),
        }
    }

    pub fn from_name(name: &str) -> Result<Platform> {
        match name.trim().to_ascii_lowercase().as_str() {
            "headless" => Ok(Platform::Headless(Default::default())),
            #[cfg(all(target_os = "linux", feature = "x11"))]
            "x11" | "xcb" => Ok(Platform::Xcb),
            _ => Err(Error::UnsupportedValue {
                property: PLATFORM_ENV,
                value: name.to_owned(),
            }),
        }
    }

    #[cfg(all(target_os = "linux", feature = "x11"))]
    fn fallback() -> Platform {
        if env::var_os("DISPLAY").is_some() {
            Platform::Xcb
        } else {
            Platform::Headless(Default::default())
        }
    }

    #[cfg(not(all(target_os = "linux", feature = "x11")))]
    fn fallback() -> Platform {
        Platform::Headless(Default::default())
    }

    pub fn connect(self, events: EventSender) -> Result<Arc<dyn Driver>> {
        let driver: Arc<dyn Driver> = match self {
            Platform::Headless(config) => Arc::new(headless::HeadlessDriver::new(config, events)?),
            #[cfg(all(target_os = "linux", feature = "x11"))]
            Platform::Xcb => Arc::new(xcb::XcbDriver::connect(events)?),
        };
        info!("connected {} driver", driver.name());
        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{GraphicsApi, Profile};

    fn caps() -> Capabilities {
        Capabilities {
            can_set_icon: false,
            can_get_display: true,
            can_set_cursor: true,
            supported_modes: vec![WindowMode::Normal, WindowMode::Minimized],
            supported_styles: vec![BorderStyle::Resizable],
            supported_apis: vec![ApiSupport {
                api: GraphicsApi::Software,
                max_version: (1, 0),
                profiles: vec![],
            }],
        }
    }

    #[test]
    fn gated_operations_are_rejected() {
        let caps = caps();
        assert!(matches!(caps.require_icon(), Err(Error::NotSupported("set_icon"))));
        assert!(caps.require_cursor().is_ok());
        assert!(matches!(
            caps.check_mode(WindowMode::Fullscreen),
            Err(Error::UnsupportedValue { property: "mode", .. })
        ));
        assert!(caps.check_style(BorderStyle::Resizable).is_ok());
    }

    #[test]
    fn unsupported_context_is_a_hint_error() {
        let caps = caps();
        let hints = WindowHints::new().with_context(
            ContextHints::new(GraphicsApi::OpenGl)
                .with_version(3, 3)
                .with_profile(Profile::Core),
        );
        assert!(matches!(caps.check_hints(&hints), Err(Error::UnsupportedHint(_))));
        assert!(caps
            .check_hints(&WindowHints::new().with_context(ContextHints::new(GraphicsApi::None)))
            .is_ok());
    }

    #[test]
    fn platform_names_parse() {
        assert!(matches!(Platform::from_name(" Headless "), Ok(Platform::Headless(_))));
        assert!(matches!(
            Platform::from_name("cocoa"),
            Err(Error::UnsupportedValue { .. })
        ));
    }
}
