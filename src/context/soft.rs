//! A CPU-side implementation of [`NativeGraphics`].
//!
//! Surfaces are pairs of `0xAARRGGBB` pixel buffers; swapping copies the back
//! buffer to the front buffer and hands it to an optional [`Presenter`]. The
//! bookkeeping mirrors a real driver closely enough to exercise the whole
//! surface lifecycle: per-thread current bindings, per-thread last error,
//! contexts that can be lost, surfaces that go stale.

use super::{ApiSupport, Attribute, Config, ContextHints, GraphicsApi, NativeGraphics};
use crate::{
    error::{NativeError, Result},
    handle::{ContextHandle, DisplayHandle, HandleRegistry, SurfaceHandle},
    surface::NativeWindow,
};
use log::{trace, warn};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    ffi::c_void,
    fmt, ptr,
    sync::Arc,
    thread::{self, ThreadId},
};

const SWAP_LOG_LIMIT: usize = 4096;
const SOFT_CONFIG_ID: u32 = 1;

/// Receives every presented frame, e.g. to blit it into a native window.
pub trait Presenter: Send + Sync + fmt::Debug {
    fn present(&self, native: &NativeWindow, width: u32, height: u32, pixels: &[u32]) -> Result<()>;
}

/// Calls that can be made to fail once with [`SoftGraphics::fail_next`].
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum SoftCall {
    Initialize,
    ChooseConfig,
    CreateContext,
    CreateWindowSurface,
    MakeCurrent,
    SwapBuffers,
    ResizeSurface,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SwapRecord {
    /// 1-based position among all swaps performed by this backend.
    pub serial: u64,
    pub surface: SurfaceHandle,
    pub width: u32,
    pub height: u32,
    pub thread: ThreadId,
}

#[derive(Debug)]
struct ContextRecord {
    config: Config,
    current_on: Option<ThreadId>,
    lost: bool,
}

#[derive(Debug)]
struct SurfaceRecord {
    native: NativeWindow,
    width: u32,
    height: u32,
    back: Vec<u32>,
    front: Vec<u32>,
}

impl SurfaceRecord {
    fn resize(&mut self, width: u32, height: u32) {
        let len = width as usize * height as usize;
        self.width = width;
        self.height = height;
        self.back = vec![0; len];
        self.front = vec![0; len];
    }
}

#[derive(Debug, Copy, Clone)]
struct Binding {
    context: ContextHandle,
    draw: Option<SurfaceHandle>,
    read: Option<SurfaceHandle>,
}

#[derive(Debug, Default)]
struct State {
    display: Option<DisplayHandle>,
    display_refs: usize,
    contexts: BTreeMap<ContextHandle, ContextRecord>,
    surfaces: BTreeMap<SurfaceHandle, SurfaceRecord>,
    current: HashMap<ThreadId, Binding>,
    errors: HashMap<ThreadId, NativeError>,
    injected: HashMap<SoftCall, NativeError>,
    swaps: VecDeque<SwapRecord>,
    swap_total: u64,
}

impl State {
    fn set_error(&mut self, code: NativeError) {
        self.errors.insert(thread::current().id(), code);
    }

    /// Records `code` and reports whether the call succeeded.
    fn finish(&mut self, code: NativeError) -> bool {
        self.set_error(code);
        code == NativeError::Success
    }

    fn check(&mut self, call: SoftCall, display: DisplayHandle) -> Option<NativeError> {
        if let Some(code) = self.injected.remove(&call) {
            return Some(code);
        }
        if self.display != Some(display) {
            return Some(NativeError::NotInitialized);
        }
        None
    }

    fn release_thread(&mut self, thread: ThreadId) {
        if let Some(binding) = self.current.remove(&thread) {
            if let Some(context) = self.contexts.get_mut(&binding.context) {
                context.current_on = None;
            }
        }
    }
}

pub struct SoftGraphics {
    registry: HandleRegistry,
    state: Mutex<State>,
    exports: RwLock<HashMap<String, usize>>,
    presenter: Option<Arc<dyn Presenter>>,
}

impl fmt::Debug for SoftGraphics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SoftGraphics")
            .field("contexts", &state.contexts.len())
            .field("surfaces", &state.surfaces.len())
            .field("swaps", &state.swap_total)
            .finish()
    }
}

impl SoftGraphics {
    pub fn new() -> Self {
        Self {
            registry: HandleRegistry::new(),
            state: Mutex::new(State::default()),
            exports: RwLock::new(HashMap::new()),
            presenter: None,
        }
    }

    pub fn with_presenter(presenter: Arc<dyn Presenter>) -> Self {
        Self {
            presenter: Some(presenter),
            ..Self::new()
        }
    }

    /// Makes the next call of kind `call` fail with `code`, on any thread.
    pub fn fail_next(&self, call: SoftCall, code: NativeError) {
        self.state.lock().injected.insert(call, code);
    }

    /// Marks a context lost; every later operation on it reports `ContextLost`.
    pub fn lose_context(&self, context: ContextHandle) -> bool {
        match self.state.lock().contexts.get_mut(&context) {
            Some(record) => {
                record.lost = true;
                true
            }
            None => false,
        }
    }

    pub fn lose_all_contexts(&self) {
        for record in self.state.lock().contexts.values_mut() {
            record.lost = true;
        }
    }

    /// Makes `name` resolvable through `get_proc_address`.
    pub fn export(&self, name: &str, address: *const c_void) {
        self.exports.write().insert(name.to_owned(), address as usize);
    }

    pub fn live_contexts(&self) -> usize {
        self.state.lock().contexts.len()
    }

    pub fn live_surfaces(&self) -> usize {
        self.state.lock().surfaces.len()
    }

    /// Surfaces currently bound as draw or read target on any thread.
    pub fn bound_surfaces(&self) -> usize {
        let state = self.state.lock();
        let bound: HashSet<SurfaceHandle> = state
            .current
            .values()
            .flat_map(|b| b.draw.into_iter().chain(b.read))
            .collect();
        bound.len()
    }

    pub fn is_surface_bound(&self, surface: SurfaceHandle) -> bool {
        self.state
            .lock()
            .current
            .values()
            .any(|b| b.draw == Some(surface) || b.read == Some(surface))
    }

    pub fn context_thread(&self, context: ContextHandle) -> Option<ThreadId> {
        self.state
            .lock()
            .contexts
            .get(&context)
            .and_then(|c| c.current_on)
    }

    pub fn swap_count(&self) -> u64 {
        self.state.lock().swap_total
    }

    pub fn last_swap(&self) -> Option<SwapRecord> {
        self.state.lock().swaps.back().copied()
    }

    /// Swaps with a serial greater than `serial`, oldest first.
    pub fn swaps_since(&self, serial: u64) -> Vec<SwapRecord> {
        self.state
            .lock()
            .swaps
            .iter()
            .filter(|s| s.serial > serial)
            .copied()
            .collect()
    }

    /// Runs `f` over the back buffer of `surface` as `(pixels, width, height)`.
    pub fn with_back_buffer<R, F>(&self, surface: SurfaceHandle, f: F) -> Option<R>
    where
        F: FnOnce(&mut [u32], u32, u32) -> R,
    {
        let mut state = self.state.lock();
        let record = state.surfaces.get_mut(&surface)?;
        Some(f(&mut record.back, record.width, record.height))
    }

    pub fn front_buffer(&self, surface: SurfaceHandle) -> Option<Vec<u32>> {
        self.state
            .lock()
            .surfaces
            .get(&surface)
            .map(|s| s.front.clone())
    }
}

impl Default for SoftGraphics {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeGraphics for SoftGraphics {
    fn supported_apis(&self) -> Vec<ApiSupport> {
        vec![ApiSupport {
            api: GraphicsApi::Software,
            max_version: (1, 0),
            profiles: Vec::new(),
        }]
    }

    fn initialize(&self) -> Option<DisplayHandle> {
        let mut state = self.state.lock();
        if let Some(code) = state.injected.remove(&SoftCall::Initialize) {
            state.set_error(code);
            return None;
        }
        let display = match state.display {
            Some(display) => display,
            None => {
                let display = self.registry.allocate();
                state.display = Some(display);
                display
            }
        };
        state.display_refs += 1;
        state.set_error(NativeError::Success);
        Some(display)
    }

    fn terminate(&self, display: DisplayHandle) -> bool {
        let mut state = self.state.lock();
        if state.display != Some(display) {
            return state.finish(NativeError::NotInitialized);
        }
        state.display_refs = state.display_refs.saturating_sub(1);
        if state.display_refs == 0 {
            for (surface, _) in std::mem::take(&mut state.surfaces) {
                self.registry.invalidate(surface);
            }
            for (context, _) in std::mem::take(&mut state.contexts) {
                self.registry.invalidate(context);
            }
            state.current.clear();
            state.display = None;
            self.registry.invalidate(display);
        }
        state.finish(NativeError::Success)
    }

    fn choose_config(&self, display: DisplayHandle, hints: &ContextHints) -> Option<Config> {
        let mut state = self.state.lock();
        if let Some(code) = state.check(SoftCall::ChooseConfig, display) {
            state.set_error(code);
            return None;
        }
        if !self.supported_apis().iter().any(|s| s.satisfies(hints)) {
            state.set_error(NativeError::BadMatch);
            return None;
        }
        state.set_error(NativeError::Success);
        Some(Config {
            id: SOFT_CONFIG_ID,
            api: hints.api,
            version: hints.version,
        })
    }

    fn create_context(
        &self,
        display: DisplayHandle,
        config: Config,
        share: Option<ContextHandle>,
        attributes: &[Attribute],
    ) -> Option<ContextHandle> {
        let mut state = self.state.lock();
        if let Some(code) = state.check(SoftCall::CreateContext, display) {
            state.set_error(code);
            return None;
        }
        if config.id != SOFT_CONFIG_ID || config.api != GraphicsApi::Software {
            state.set_error(NativeError::BadConfig);
            return None;
        }
        if let Some(share) = share {
            match state.contexts.get(&share) {
                Some(record) if record.lost => {
                    state.set_error(NativeError::ContextLost);
                    return None;
                }
                Some(_) => {}
                None => {
                    state.set_error(NativeError::BadContext);
                    return None;
                }
            }
        }
        for attribute in attributes {
            if let Attribute::ContextVersion(major, minor) = *attribute {
                if (major, minor) > config.version {
                    state.set_error(NativeError::BadMatch);
                    return None;
                }
            }
        }
        let context = self.registry.allocate();
        state.contexts.insert(
            context,
            ContextRecord {
                config,
                current_on: None,
                lost: false,
            },
        );
        state.set_error(NativeError::Success);
        Some(context)
    }

    fn create_window_surface(
        &self,
        display: DisplayHandle,
        config: Config,
        native: &NativeWindow,
        attributes: &[Attribute],
    ) -> Option<SurfaceHandle> {
        let mut state = self.state.lock();
        if let Some(code) = state.check(SoftCall::CreateWindowSurface, display) {
            state.set_error(code);
            return None;
        }
        if config.id != SOFT_CONFIG_ID {
            state.set_error(NativeError::BadConfig);
            return None;
        }
        let mut width = 0;
        let mut height = 0;
        for attribute in attributes {
            match *attribute {
                Attribute::Width(w) => width = w,
                Attribute::Height(h) => height = h,
                _ => {}
            }
        }
        if width == 0 || height == 0 {
            state.set_error(NativeError::BadParameter);
            return None;
        }
        if state.surfaces.values().any(|s| s.native == *native) {
            // One window surface per native window.
            state.set_error(NativeError::BadAlloc);
            return None;
        }
        let surface = self.registry.allocate();
        let mut record = SurfaceRecord {
            native: *native,
            width: 0,
            height: 0,
            back: Vec::new(),
            front: Vec::new(),
        };
        record.resize(width, height);
        state.surfaces.insert(surface, record);
        state.set_error(NativeError::Success);
        Some(surface)
    }

    fn make_current(
        &self,
        display: DisplayHandle,
        draw: Option<SurfaceHandle>,
        read: Option<SurfaceHandle>,
        context: Option<ContextHandle>,
    ) -> bool {
        let mut state = self.state.lock();
        let thread = thread::current().id();
        let context = match context {
            Some(context) => context,
            None => {
                // Releasing is allowed even after the display is gone.
                state.release_thread(thread);
                return state.finish(NativeError::Success);
            }
        };
        if let Some(code) = state.check(SoftCall::MakeCurrent, display) {
            return state.finish(code);
        }
        let previous_owner = match state.contexts.get(&context) {
            None => return state.finish(NativeError::BadContext),
            Some(record) if record.lost => return state.finish(NativeError::ContextLost),
            Some(record) => record.current_on,
        };
        for surface in draw.iter().chain(read.iter()) {
            if !state.surfaces.contains_key(surface) {
                return state.finish(NativeError::BadSurface);
            }
        }
        if let Some(owner) = previous_owner {
            if owner != thread {
                trace!("{:?} moves from {:?} to {:?}", context, owner, thread);
                state.current.remove(&owner);
            }
        }
        state.release_thread(thread);
        state.current.insert(
            thread,
            Binding {
                context,
                draw,
                read,
            },
        );
        if let Some(record) = state.contexts.get_mut(&context) {
            record.current_on = Some(thread);
        }
        state.finish(NativeError::Success)
    }

    fn current_context(&self) -> Option<ContextHandle> {
        let state = self.state.lock();
        state.current.get(&thread::current().id()).map(|b| b.context)
    }

    fn current_surface(&self) -> Option<SurfaceHandle> {
        let state = self.state.lock();
        state
            .current
            .get(&thread::current().id())
            .and_then(|b| b.draw)
    }

    fn swap_buffers(&self, display: DisplayHandle, surface: SurfaceHandle) -> bool {
        let mut state = self.state.lock();
        if let Some(code) = state.check(SoftCall::SwapBuffers, display) {
            return state.finish(code);
        }
        let thread = thread::current().id();
        let binding = match state.current.get(&thread) {
            Some(binding) => *binding,
            None => return state.finish(NativeError::BadContext),
        };
        match state.contexts.get(&binding.context) {
            None => return state.finish(NativeError::BadContext),
            Some(record) if record.lost => return state.finish(NativeError::ContextLost),
            Some(_) => {}
        }
        if binding.draw != Some(surface) {
            return state.finish(NativeError::BadSurface);
        }
        let (native, width, height, front) = match state.surfaces.get_mut(&surface) {
            Some(record) => {
                record.front.copy_from_slice(&record.back);
                let front = self.presenter.as_ref().map(|_| record.front.clone());
                (record.native, record.width, record.height, front)
            }
            None => return state.finish(NativeError::BadSurface),
        };
        state.swap_total += 1;
        let record = SwapRecord {
            serial: state.swap_total,
            surface,
            width,
            height,
            thread,
        };
        if state.swaps.len() == SWAP_LOG_LIMIT {
            state.swaps.pop_front();
        }
        state.swaps.push_back(record);
        state.set_error(NativeError::Success);
        drop(state);

        if let (Some(presenter), Some(pixels)) = (&self.presenter, front) {
            if let Err(e) = presenter.present(&native, width, height, &pixels) {
                warn!("presenting {:?} failed: {}", surface, e);
                self.state.lock().set_error(NativeError::BadNativeWindow);
                return false;
            }
        }
        true
    }

    fn resize_surface(
        &self,
        display: DisplayHandle,
        surface: SurfaceHandle,
        width: u32,
        height: u32,
    ) -> bool {
        let mut state = self.state.lock();
        if let Some(code) = state.check(SoftCall::ResizeSurface, display) {
            return state.finish(code);
        }
        if width == 0 || height == 0 {
            return state.finish(NativeError::BadParameter);
        }
        match state.surfaces.get_mut(&surface) {
            Some(record) => record.resize(width, height),
            None => return state.finish(NativeError::BadSurface),
        }
        state.finish(NativeError::Success)
    }

    fn surface_size(&self, display: DisplayHandle, surface: SurfaceHandle) -> Option<(u32, u32)> {
        let mut state = self.state.lock();
        if state.display != Some(display) {
            state.set_error(NativeError::NotInitialized);
            return None;
        }
        let size = state.surfaces.get(&surface).map(|s| (s.width, s.height));
        state.set_error(if size.is_some() {
            NativeError::Success
        } else {
            NativeError::BadSurface
        });
        size
    }

    fn surface_native_window(
        &self,
        display: DisplayHandle,
        surface: SurfaceHandle,
    ) -> Option<NativeWindow> {
        let mut state = self.state.lock();
        if state.display != Some(display) {
            state.set_error(NativeError::NotInitialized);
            return None;
        }
        let native = state.surfaces.get(&surface).map(|s| s.native);
        state.set_error(if native.is_some() {
            NativeError::Success
        } else {
            NativeError::BadSurface
        });
        native
    }

    fn destroy_surface(&self, display: DisplayHandle, surface: SurfaceHandle) -> bool {
        let mut state = self.state.lock();
        if state.display != Some(display) {
            return state.finish(NativeError::NotInitialized);
        }
        if state.surfaces.remove(&surface).is_none() {
            return state.finish(NativeError::BadSurface);
        }
        // Threads still bound to it keep a dangling binding and get
        // BadSurface on their next swap.
        self.registry.invalidate(surface);
        state.finish(NativeError::Success)
    }

    fn destroy_context(&self, display: DisplayHandle, context: ContextHandle) -> bool {
        let mut state = self.state.lock();
        if state.display != Some(display) {
            return state.finish(NativeError::NotInitialized);
        }
        let record = match state.contexts.remove(&context) {
            Some(record) => record,
            None => return state.finish(NativeError::BadContext),
        };
        if let Some(owner) = record.current_on {
            state.current.remove(&owner);
        }
        trace!("destroyed {:?} ({:?})", context, record.config);
        self.registry.invalidate(context);
        state.finish(NativeError::Success)
    }

    fn get_proc_address(&self, name: &str) -> *const c_void {
        match self.exports.read().get(name) {
            Some(address) => *address as *const c_void,
            None => ptr::null(),
        }
    }

    fn last_error(&self) -> NativeError {
        self.state
            .lock()
            .errors
            .remove(&thread::current().id())
            .unwrap_or_default()
    }
}
