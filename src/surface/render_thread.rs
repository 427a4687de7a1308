use super::{coordinator::Shared, SurfaceState};
use crate::{
    context::GraphicsBinding,
    error::{Error, Result},
    handle::SurfaceHandle,
};
use log::{debug, trace, warn};
use std::{
    ffi::c_void,
    io,
    ptr::NonNull,
    sync::{atomic::Ordering, Arc},
    thread::{self, JoinHandle},
};

/// Application rendering code, driven by the render thread.
///
/// The renderer is moved onto the render thread while a surface is usable and
/// handed back to the coordinator when the thread exits, so its state survives
/// the surface being torn down and recreated.
pub trait Renderer: Send + 'static {
    /// The context was just made current on the render thread. Load entry
    /// points here.
    fn resumed(&mut self, _graphics: &GraphicsBinding) {}

    /// Called before the first frame and before the first frame after every
    /// in-place surface resize.
    fn resized(&mut self, _width: u32, _height: u32) {}

    fn render(&mut self, frame: &mut Frame<'_>) -> Result<()>;

    /// The render thread is about to release the context and exit.
    fn suspended(&mut self) {}
}

pub struct Frame<'a> {
    index: u64,
    viewport: (u32, u32),
    surface: SurfaceHandle,
    graphics: &'a GraphicsBinding,
}

impl<'a> Frame<'a> {
    /// 1-based count of frames rendered by this coordinator.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    pub fn graphics(&self) -> &GraphicsBinding {
        self.graphics
    }

    pub fn proc_address(&self, name: &str) -> Option<NonNull<c_void>> {
        self.graphics.get_proc_address(name)
    }
}

enum Exit {
    Stopped,
    Failed(Error),
}

pub(super) fn spawn(
    shared: Arc<Shared>,
    renderer: Box<dyn Renderer>,
) -> io::Result<JoinHandle<Box<dyn Renderer>>> {
    thread::Builder::new()
        .name(shared.config.thread_name.clone())
        .spawn(move || run(shared, renderer))
}

fn run(shared: Arc<Shared>, mut renderer: Box<dyn Renderer>) -> Box<dyn Renderer> {
    let mut inner = shared.inner.lock();
    if shared.stop.load(Ordering::Acquire) {
        drop(inner);
        return finish(&shared, renderer, Exit::Stopped);
    }
    let (display, context, surface) = match (inner.state, inner.display, inner.context, inner.surface)
    {
        (SurfaceState::Ready, Some(display), Some(context), Some(surface)) => {
            (display, context, surface)
        }
        _ => {
            drop(inner);
            let error = Error::Other("render thread started without a ready surface".into());
            return finish(&shared, renderer, Exit::Failed(error));
        }
    };
    if let Err(e) = shared.graphics.make_current(display, surface, context) {
        drop(inner);
        return finish(&shared, renderer, Exit::Failed(e));
    }
    let mut viewport = inner.viewport;
    inner.pending_resize = None;
    renderer.resumed(&shared.graphics);
    renderer.resized(viewport.0, viewport.1);
    drop(inner);
    debug!("render thread bound {:?} {:?}", context, surface);

    let exit = loop {
        if shared.stop.load(Ordering::Acquire) {
            break Exit::Stopped;
        }
        let mut inner = shared.inner.lock();
        // The stop flag may have been raised while we were waiting for the lock.
        if shared.stop.load(Ordering::Acquire) {
            break Exit::Stopped;
        }
        if let Some((width, height)) = inner.pending_resize.take() {
            viewport = (width, height);
            renderer.resized(width, height);
        }
        inner.frames += 1;
        let mut frame = Frame {
            index: inner.frames,
            viewport,
            surface,
            graphics: &shared.graphics,
        };
        if let Err(e) = renderer.render(&mut frame) {
            if !e.is_recoverable() {
                break Exit::Failed(e);
            }
            shared.events.diagnostic(shared.window, "render", &e);
        }
        match shared.graphics.swap_buffers(display, surface) {
            Ok(()) => trace!("presented frame {}", inner.frames),
            Err(e) if e.is_recoverable() => shared.events.diagnostic(shared.window, "swap_buffers", &e),
            Err(e) => break Exit::Failed(e),
        }
        drop(inner);
        match shared.config.frame_interval {
            Some(interval) => thread::sleep(interval),
            None => thread::yield_now(),
        }
    };
    finish(&shared, renderer, exit)
}

/// Vacates the surface and acknowledges shutdown to whoever waits for it.
fn finish(shared: &Shared, mut renderer: Box<dyn Renderer>, exit: Exit) -> Box<dyn Renderer> {
    renderer.suspended();
    let mut inner = shared.inner.lock();
    if let Some(display) = inner.display {
        if let Err(e) = shared.graphics.release_current(display) {
            warn!("render thread could not release its context: {}", e);
        }
    }
    if let Exit::Failed(e) = exit {
        // A torn-down surface is rebuilt by the next surface-changed callback.
        if inner.state == SurfaceState::Ready {
            inner.teardown_graphics(&shared.graphics, &shared.events, shared.window);
            inner.state = SurfaceState::Created;
        }
        shared.events.diagnostic(shared.window, "render thread", &e);
    }
    inner.running = false;
    shared.exited.notify_all();
    debug!("render thread exited");
    renderer
}
