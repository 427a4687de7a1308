//! The event queue between platform producers and the application.
//!
//! Any number of threads may raise events through an [`EventSender`]. Events
//! raised by one thread are delivered in the order that thread raised them;
//! events raised by different threads may interleave in any order. The single
//! consumer is whoever holds the [`EventQueue`], normally the [`EventLoop`].

use crate::{
    error::{Error, Result},
    event::{Diagnostic, Event, EventKind},
    handle::WindowHandle,
    platform::{Driver, Platform},
    window::{Window, WindowHints},
};
use log::{debug, warn};
use parking_lot::RwLock;
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

/// Interrupts a driver blocked in `process_events(true)`.
pub type Waker = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum ControlFlow {
    Wait,
    Poll,
    Exit,
}

#[derive(Clone)]
pub struct EventSender {
    sender: flume::Sender<Event>,
    waker: Arc<RwLock<Option<Waker>>>,
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender")
            .field("pending", &self.sender.len())
            .finish()
    }
}

impl EventSender {
    fn push(&self, window: Option<WindowHandle>, kind: EventKind) -> Result<()> {
        let event = Event {
            window,
            timestamp: Instant::now(),
            sequence: 0,
            kind,
        };
        self.sender.send(event).map_err(|_| Error::Disconnected)
    }

    /// Queues an event from any thread and wakes the consumer if it is
    /// blocked waiting for native events.
    pub fn raise(&self, window: Option<WindowHandle>, kind: EventKind) -> Result<()> {
        self.push(window, kind)?;
        if let Some(waker) = &*self.waker.read() {
            waker();
        }
        Ok(())
    }

    /// Queues an event from the consumer thread itself, where nobody needs waking.
    pub(crate) fn raise_local(&self, window: Option<WindowHandle>, kind: EventKind) -> Result<()> {
        self.push(window, kind)
    }

    /// Logs a failure and forwards it to the application as a diagnostic event.
    pub fn diagnostic(
        &self,
        window: Option<WindowHandle>,
        source: &'static str,
        error: &dyn fmt::Display,
    ) {
        let message = error.to_string();
        warn!("{}: {}", source, message);
        let kind = EventKind::Diagnostic(Diagnostic::new(source, message));
        if self.raise(window, kind).is_err() {
            debug!("diagnostic from {} dropped, queue consumer is gone", source);
        }
    }
}

pub struct EventQueue {
    sender: EventSender,
    receiver: flume::Receiver<Event>,
    consumed: u64,
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("pending", &self.receiver.len())
            .field("consumed", &self.consumed)
            .finish()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            sender: EventSender {
                sender,
                waker: Arc::new(RwLock::new(None)),
            },
            receiver,
            consumed: 0,
        }
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn set_waker(&self, waker: Waker) {
        *self.sender.waker.write() = Some(waker);
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    fn stamp(&mut self, mut event: Event) -> Event {
        self.consumed += 1;
        event.sequence = self.consumed;
        event
    }

    pub fn try_next(&mut self) -> Option<Event> {
        let event = self.receiver.try_recv().ok()?;
        Some(self.stamp(event))
    }

    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Event> {
        let event = self.receiver.recv_timeout(timeout).ok()?;
        Some(self.stamp(event))
    }

    /// Hands every pending event to `f`, in queue order.
    pub fn drain<F: FnMut(Event)>(&mut self, mut f: F) -> usize {
        let mut count = 0;
        while let Some(event) = self.try_next() {
            f(event);
            count += 1;
        }
        count
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

type Handler = Box<dyn FnMut(Event, &mut ControlFlow)>;

pub struct EventLoop {
    driver: Arc<dyn Driver>,
    queue: EventQueue,
    handler: Option<Handler>,
    control_flow: ControlFlow,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("driver", &self.driver.name())
            .field("queue", &self.queue)
            .field("control_flow", &self.control_flow)
            .finish()
    }
}

impl EventLoop {
    /// Connects to the platform picked by [`Platform::detect`].
    pub fn new() -> Result<EventLoop> {
        Self::with_platform(Platform::detect()?)
    }

    pub fn with_platform(platform: Platform) -> Result<EventLoop> {
        let queue = EventQueue::new();
        let driver = platform.connect(queue.sender())?;
        queue.set_waker(driver.waker());
        debug!("event loop running on the {} driver", driver.name());
        Ok(EventLoop {
            driver,
            queue,
            handler: None,
            control_flow: ControlFlow::Wait,
        })
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn sender(&self) -> EventSender {
        self.queue.sender()
    }

    pub fn control_flow(&self) -> ControlFlow {
        self.control_flow
    }

    pub(crate) fn create_window(&self, hints: &WindowHints) -> Result<Window> {
        let handle = self.driver.create(hints)?;
        Ok(Window {
            handle,
            driver: self.driver.clone(),
        })
    }

    pub fn set_handler<H>(&mut self, handler: H)
    where
        H: 'static + FnMut(Event, &mut ControlFlow),
    {
        self.handler = Some(Box::new(handler));
    }

    /// Pumps native events into the queue and delivers everything queued to
    /// the handler. With `wait_for_events`, blocks until at least one event
    /// is available or no window is left. Returns the number of events delivered.
    pub fn process_events(&mut self, wait_for_events: bool) -> Result<usize> {
        if self.handler.is_none() {
            return Err(Error::Other("no event handler registered".into()));
        }
        let mut block = false;
        loop {
            self.driver.process_events(block)?;
            if !wait_for_events || !self.queue.is_empty() || self.driver.window_count() == 0 {
                break;
            }
            block = true;
        }

        let mut delivered = 0;
        while self.control_flow != ControlFlow::Exit {
            let event = match self.queue.try_next() {
                Some(event) => event,
                None => break,
            };
            if let Some(handler) = self.handler.as_mut() {
                handler(event, &mut self.control_flow);
            }
            delivered += 1;
        }
        Ok(delivered)
    }

    pub fn run<H>(mut self, event_handler: H) -> Result<()>
    where
        H: 'static + FnMut(Event, &mut ControlFlow),
    {
        self.set_handler(event_handler);
        while self.control_flow != ControlFlow::Exit {
            let wait = self.control_flow == ControlFlow::Wait;
            self.process_events(wait)?;
            if self.driver.window_count() == 0 && self.queue.is_empty() {
                debug!("no windows left, leaving the event loop");
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SurfaceEvent;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    fn tagged(event: &Event) -> (u32, u32) {
        match event.kind {
            EventKind::Resize { width, height } => (width, height),
            _ => panic!("unexpected event {:?}", event),
        }
    }

    #[test]
    fn per_producer_order_is_preserved() {
        let mut queue = EventQueue::new();
        let producers: Vec<_> = (0..2u32)
            .map(|producer| {
                let sender = queue.sender();
                thread::spawn(move || {
                    for i in 0..500u32 {
                        sender
                            .raise(None, EventKind::Resize { width: producer, height: i })
                            .unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut last = [None::<u32>; 2];
        let mut sequence = 0;
        let consumed = queue.drain(|event| {
            assert!(event.sequence > sequence);
            sequence = event.sequence;
            let (producer, i) = tagged(&event);
            let slot = &mut last[producer as usize];
            assert!(slot.map_or(true, |prev| prev < i));
            *slot = Some(i);
        });
        assert_eq!(consumed, 1000);
        assert_eq!(last, [Some(499), Some(499)]);
    }

    #[test]
    fn raise_wakes_the_consumer() {
        let queue = EventQueue::new();
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = wakes.clone();
        queue.set_waker(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let sender = queue.sender();
        sender.raise(None, EventKind::CloseRequested).unwrap();
        sender.raise_local(None, EventKind::CloseRequested).unwrap();
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn raising_after_the_consumer_is_gone_fails() {
        let queue = EventQueue::new();
        let sender = queue.sender();
        drop(queue);
        assert!(matches!(
            sender.raise(None, EventKind::Surface(SurfaceEvent::Created)),
            Err(Error::Disconnected)
        ));
        // Diagnostics never fail loudly.
        sender.diagnostic(None, "test", &"ignored");
    }

    #[test]
    fn diagnostics_reach_the_queue() {
        let mut queue = EventQueue::new();
        queue.sender().diagnostic(None, "swap_buffers", &Error::StaleSurface);
        let event = queue.try_next().unwrap();
        match event.kind {
            EventKind::Diagnostic(d) => {
                assert_eq!(d.source, "swap_buffers");
                assert_eq!(d.message, Error::StaleSurface.to_string());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
