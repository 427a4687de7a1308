//! Binding a rendering context and a window surface to a thread.
//!
//! [`NativeGraphics`] is the raw boundary to a platform graphics library and
//! follows its conventions: calls report failure through a sentinel return
//! value and leave the reason in a per-thread "last error" slot that the next
//! call overwrites. [`GraphicsBinding`] is the only code that talks to it and
//! reads that slot immediately after every fallible call.

pub mod soft;

use crate::{
    error::{Error, NativeError, Result},
    handle::{ContextHandle, DisplayHandle, SurfaceHandle},
    surface::NativeWindow,
};
use log::{debug, trace};
use std::{ffi::c_void, fmt, ptr::NonNull, sync::Arc};

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum GraphicsApi {
    /// The window is never rendered to through a context.
    None,
    Software,
    OpenGl,
    OpenGlEs,
    Vulkan,
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum Profile {
    Core,
    Compatibility,
    Embedded,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ContextHints {
    pub api: GraphicsApi,
    pub profile: Option<Profile>,
    pub version: (u8, u8),
    pub color_bits: (u8, u8, u8, u8),
    pub depth_bits: u8,
    pub stencil_bits: u8,
    pub debug: bool,
}

impl ContextHints {
    pub fn new(api: GraphicsApi) -> Self {
        Self {
            api,
            ..Self::default()
        }
    }

    pub fn with_version(mut self, major: u8, minor: u8) -> Self {
        self.version = (major, minor);
        self
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_depth_bits(mut self, depth_bits: u8) -> Self {
        self.depth_bits = depth_bits;
        self
    }

    pub fn with_stencil_bits(mut self, stencil_bits: u8) -> Self {
        self.stencil_bits = stencil_bits;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

impl Default for ContextHints {
    fn default() -> Self {
        Self {
            api: GraphicsApi::Software,
            profile: None,
            version: (1, 0),
            color_bits: (8, 8, 8, 8),
            depth_bits: 0,
            stencil_bits: 0,
            debug: false,
        }
    }
}

/// One API a graphics backend can create contexts for.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ApiSupport {
    pub api: GraphicsApi,
    pub max_version: (u8, u8),
    pub profiles: Vec<Profile>,
}

impl ApiSupport {
    pub fn satisfies(&self, hints: &ContextHints) -> bool {
        self.api == hints.api
            && hints.version <= self.max_version
            && hints.profile.map_or(true, |p| self.profiles.contains(&p))
    }
}

/// A framebuffer configuration picked by [`NativeGraphics::choose_config`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Config {
    pub id: u32,
    pub api: GraphicsApi,
    pub version: (u8, u8),
}

/// Creation-time attributes, passed as a list the way native APIs take them.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Attribute {
    Width(u32),
    Height(u32),
    ContextVersion(u8, u8),
    Profile(Profile),
    Debug(bool),
}

/// The raw native graphics boundary.
///
/// Every method that can fail returns `None`/`false`/null and records the
/// reason for the calling thread, retrievable once through [`last_error`].
///
/// [`last_error`]: NativeGraphics::last_error
pub trait NativeGraphics: Send + Sync + fmt::Debug {
    fn supported_apis(&self) -> Vec<ApiSupport>;
    fn initialize(&self) -> Option<DisplayHandle>;
    fn terminate(&self, display: DisplayHandle) -> bool;
    fn choose_config(&self, display: DisplayHandle, hints: &ContextHints) -> Option<Config>;
    fn create_context(
        &self,
        display: DisplayHandle,
        config: Config,
        share: Option<ContextHandle>,
        attributes: &[Attribute],
    ) -> Option<ContextHandle>;
    fn create_window_surface(
        &self,
        display: DisplayHandle,
        config: Config,
        native: &NativeWindow,
        attributes: &[Attribute],
    ) -> Option<SurfaceHandle>;
    fn make_current(
        &self,
        display: DisplayHandle,
        draw: Option<SurfaceHandle>,
        read: Option<SurfaceHandle>,
        context: Option<ContextHandle>,
    ) -> bool;
    fn current_context(&self) -> Option<ContextHandle>;
    fn current_surface(&self) -> Option<SurfaceHandle>;
    fn swap_buffers(&self, display: DisplayHandle, surface: SurfaceHandle) -> bool;
    fn resize_surface(
        &self,
        display: DisplayHandle,
        surface: SurfaceHandle,
        width: u32,
        height: u32,
    ) -> bool;
    fn surface_size(&self, display: DisplayHandle, surface: SurfaceHandle) -> Option<(u32, u32)>;
    fn surface_native_window(
        &self,
        display: DisplayHandle,
        surface: SurfaceHandle,
    ) -> Option<NativeWindow>;
    fn destroy_surface(&self, display: DisplayHandle, surface: SurfaceHandle) -> bool;
    fn destroy_context(&self, display: DisplayHandle, context: ContextHandle) -> bool;
    fn get_proc_address(&self, name: &str) -> *const c_void;
    /// Returns and clears the calling thread's last error.
    fn last_error(&self) -> NativeError;
}

#[derive(Clone)]
pub struct GraphicsBinding {
    native: Arc<dyn NativeGraphics>,
}

impl fmt::Debug for GraphicsBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GraphicsBinding").field(&self.native).finish()
    }
}

impl GraphicsBinding {
    pub fn new(native: Arc<dyn NativeGraphics>) -> Self {
        Self { native }
    }

    pub fn native(&self) -> &Arc<dyn NativeGraphics> {
        &self.native
    }

    fn check(&self, call: &'static str) -> Error {
        let code = self.native.last_error();
        debug!("{} failed: {}", call, code);
        match code {
            NativeError::ContextLost => Error::ContextLost,
            NativeError::Success => Error::Other(format!("{} failed without an error code", call)),
            code => Error::Native { call, code },
        }
    }

    pub fn initialize(&self) -> Result<DisplayHandle> {
        self.native
            .initialize()
            .ok_or_else(|| self.check("initialize"))
    }

    pub fn terminate(&self, display: DisplayHandle) -> Result<()> {
        if self.native.terminate(display) {
            Ok(())
        } else {
            Err(self.check("terminate"))
        }
    }

    /// Fails with `UnsupportedHint` when the backend has no matching configuration.
    pub fn choose_config(&self, display: DisplayHandle, hints: &ContextHints) -> Result<Config> {
        match self.native.choose_config(display, hints) {
            Some(config) => Ok(config),
            None => match self.native.last_error() {
                NativeError::Success | NativeError::BadConfig | NativeError::BadMatch => {
                    Err(Error::UnsupportedHint(format!(
                        "{:?} {}.{} {:?}",
                        hints.api, hints.version.0, hints.version.1, hints.profile
                    )))
                }
                code => Err(Error::Native {
                    call: "choose_config",
                    code,
                }),
            },
        }
    }

    pub fn create_context(
        &self,
        display: DisplayHandle,
        config: Config,
        share: Option<ContextHandle>,
        hints: &ContextHints,
    ) -> Result<ContextHandle> {
        let mut attributes = vec![Attribute::ContextVersion(hints.version.0, hints.version.1)];
        if let Some(profile) = hints.profile {
            attributes.push(Attribute::Profile(profile));
        }
        if hints.debug {
            attributes.push(Attribute::Debug(true));
        }
        let context = self
            .native
            .create_context(display, config, share, &attributes)
            .ok_or_else(|| self.check("create_context"))?;
        trace!("created {:?} for {:?}", context, config);
        Ok(context)
    }

    pub fn create_window_surface(
        &self,
        display: DisplayHandle,
        config: Config,
        native: &NativeWindow,
        width: u32,
        height: u32,
    ) -> Result<SurfaceHandle> {
        let attributes = [Attribute::Width(width), Attribute::Height(height)];
        let surface = self
            .native
            .create_window_surface(display, config, native, &attributes)
            .ok_or_else(|| self.check("create_window_surface"))?;
        trace!("created {:?} ({}x{}) on {:?}", surface, width, height, native);
        Ok(surface)
    }

    pub fn make_current(
        &self,
        display: DisplayHandle,
        surface: SurfaceHandle,
        context: ContextHandle,
    ) -> Result<()> {
        if self
            .native
            .make_current(display, Some(surface), Some(surface), Some(context))
        {
            Ok(())
        } else {
            Err(match self.check("make_current") {
                Error::Native {
                    code: NativeError::BadSurface,
                    ..
                }
                | Error::Native {
                    code: NativeError::BadNativeWindow,
                    ..
                } => Error::StaleSurface,
                e => e,
            })
        }
    }

    /// Unbinds whatever context is current on the calling thread.
    pub fn release_current(&self, display: DisplayHandle) -> Result<()> {
        if self.native.make_current(display, None, None, None) {
            Ok(())
        } else {
            Err(self.check("make_current"))
        }
    }

    pub fn current(&self) -> Option<(ContextHandle, Option<SurfaceHandle>)> {
        self.native
            .current_context()
            .map(|context| (context, self.native.current_surface()))
    }

    pub fn swap_buffers(&self, display: DisplayHandle, surface: SurfaceHandle) -> Result<()> {
        if self.native.swap_buffers(display, surface) {
            return Ok(());
        }
        Err(match self.check("swap_buffers") {
            Error::Native {
                code: NativeError::BadContext,
                ..
            } => Error::NoCurrentContext,
            Error::Native {
                code: NativeError::BadSurface,
                ..
            } => Error::StaleSurface,
            e => e,
        })
    }

    pub fn resize_surface(
        &self,
        display: DisplayHandle,
        surface: SurfaceHandle,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if self.native.resize_surface(display, surface, width, height) {
            Ok(())
        } else {
            Err(self.check("resize_surface"))
        }
    }

    pub fn surface_size(&self, display: DisplayHandle, surface: SurfaceHandle) -> Result<(u32, u32)> {
        self.native
            .surface_size(display, surface)
            .ok_or_else(|| self.check("surface_size"))
    }

    pub fn surface_native_window(
        &self,
        display: DisplayHandle,
        surface: SurfaceHandle,
    ) -> Result<NativeWindow> {
        self.native
            .surface_native_window(display, surface)
            .ok_or_else(|| self.check("surface_native_window"))
    }

    pub fn destroy_surface(&self, display: DisplayHandle, surface: SurfaceHandle) -> Result<()> {
        if self.native.destroy_surface(display, surface) {
            Ok(())
        } else {
            Err(self.check("destroy_surface"))
        }
    }

    pub fn destroy_context(&self, display: DisplayHandle, context: ContextHandle) -> Result<()> {
        if self.native.destroy_context(display, context) {
            Ok(())
        } else {
            Err(self.check("destroy_context"))
        }
    }

    pub fn get_proc_address(&self, name: &str) -> Option<NonNull<c_void>> {
        NonNull::new(self.native.get_proc_address(name) as *mut c_void)
    }

    /// Presents the surface bound on the calling thread, provided it was
    /// created for `native`.
    pub fn swap_current(&self, display: DisplayHandle, native: &NativeWindow) -> Result<()> {
        let surface = match self.current() {
            Some((_, Some(surface))) => surface,
            _ => return Err(Error::NoCurrentContext),
        };
        if self.surface_native_window(display, surface)? != *native {
            return Err(Error::NoCurrentContext);
        }
        self.swap_buffers(display, surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_support_checks_version_and_profile() {
        let support = ApiSupport {
            api: GraphicsApi::OpenGl,
            max_version: (4, 5),
            profiles: vec![Profile::Core],
        };
        assert!(support.satisfies(&ContextHints::new(GraphicsApi::OpenGl).with_version(3, 3)));
        assert!(!support.satisfies(&ContextHints::new(GraphicsApi::OpenGl).with_version(4, 6)));
        assert!(!support.satisfies(
            &ContextHints::new(GraphicsApi::OpenGl)
                .with_version(3, 3)
                .with_profile(Profile::Compatibility)
        ));
        assert!(!support.satisfies(&ContextHints::new(GraphicsApi::Vulkan)));
    }
}
