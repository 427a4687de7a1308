use crate::{
    error::{Error, Result},
    surface::{NativeWindow, SurfaceCallbacks},
};
use log::{debug, error};
use parking_lot::Mutex;
use std::{
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle, ThreadId},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) enum SurfaceCommand {
    Created(NativeWindow),
    Changed(NativeWindow, u32, u32),
    Destroyed,
}

pub(super) type Delivery = (Arc<dyn SurfaceCallbacks>, SurfaceCommand);

struct Job {
    deliveries: Vec<Delivery>,
    done: flume::Sender<()>,
}

/// The thread the simulated OS delivers surface callbacks on.
///
/// Jobs are delivered in submission order. Submitting is non-blocking so it can
/// happen under a window lock; waiting for delivery happens after the lock is
/// released. A callback that triggers more callbacks gets them delivered
/// re-entrantly, before its own call returns.
pub(super) struct CallbackThread {
    sender: Mutex<Option<flume::Sender<Job>>>,
    receiver: flume::Receiver<Job>,
    thread: Mutex<Option<JoinHandle<()>>>,
    id: ThreadId,
}

impl fmt::Debug for CallbackThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackThread").field("id", &self.id).finish()
    }
}

/// A submitted job that has not necessarily been delivered yet.
#[must_use]
pub(super) struct Pending(Option<flume::Receiver<()>>);

impl CallbackThread {
    pub(super) fn spawn() -> io::Result<Self> {
        let (sender, receiver) = flume::unbounded::<Job>();
        let jobs = receiver.clone();
        let thread = thread::Builder::new()
            .name("tether-surface-callbacks".into())
            .spawn(move || {
                for job in jobs.iter() {
                    run(job);
                }
                debug!("surface callback thread exited");
            })?;
        let id = thread.thread().id();
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            thread: Mutex::new(Some(thread)),
            id,
        })
    }

    pub(super) fn submit(&self, deliveries: Vec<Delivery>) -> Result<Pending> {
        if deliveries.is_empty() {
            return Ok(Pending(None));
        }
        let (done, receiver) = flume::bounded(1);
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(Error::Disconnected)?;
        sender
            .send(Job { deliveries, done })
            .map_err(|_| Error::Disconnected)?;
        Ok(Pending(Some(receiver)))
    }

    /// Blocks until every callback of the job has returned.
    ///
    /// On the callback thread itself the job sits in the queue behind the
    /// callback that is running, so the queue is drained here instead, in
    /// order, up to and including the job.
    pub(super) fn wait(&self, pending: Pending) -> Result<()> {
        let done = match pending.0 {
            Some(done) => done,
            None => return Ok(()),
        };
        if thread::current().id() != self.id {
            return done.recv().map_err(|_| panicked());
        }
        loop {
            match done.try_recv() {
                Ok(()) => return Ok(()),
                Err(flume::TryRecvError::Disconnected) => return Err(panicked()),
                Err(flume::TryRecvError::Empty) => {}
            }
            match self.receiver.try_recv() {
                Ok(job) => run(job),
                Err(_) => return Err(Error::Other("surface callback job was lost".into())),
            }
        }
    }

    pub(super) fn shutdown(&self) {
        self.sender.lock().take();
        if thread::current().id() == self.id {
            return;
        }
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                error!("surface callback thread panicked");
            }
        }
    }
}

fn panicked() -> Error {
    Error::Other("a surface callback panicked".into())
}

fn run(job: Job) {
    let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
        for (callbacks, command) in &job.deliveries {
            deliver(&**callbacks, *command);
        }
    }));
    match delivered {
        Ok(()) => {
            let _ = job.done.send(());
        }
        Err(_) => error!("surface callback panicked"),
    }
}

fn deliver(callbacks: &dyn SurfaceCallbacks, command: SurfaceCommand) {
    match command {
        SurfaceCommand::Created(native) => callbacks.surface_created(native),
        SurfaceCommand::Changed(native, width, height) => {
            callbacks.surface_changed(native, width, height)
        }
        SurfaceCommand::Destroyed => callbacks.surface_destroyed(),
    }
}
