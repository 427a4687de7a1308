//! Opaque, typed identifiers for everything a driver hands out.
//!
//! A [`Handle`] is a plain value: copying it never keeps the underlying
//! resource alive. Validity is tracked by the [`HandleRegistry`] that issued
//! it, using generation-tagged slots so a destroyed handle can never compare
//! equal to a handle allocated later in the same slot.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use slotmap::{new_key_type, Key, SlotMap};
use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::atomic::{self, AtomicU32},
};

new_key_type! {
    struct Slot;
}

// Zero is reserved for the null handle.
static NEXT_REGISTRY_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum Kind {
    Window,
    Display,
    Context,
    Surface,
    Joystick,
    Icon,
    Cursor,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Window => "window",
            Kind::Display => "display",
            Kind::Context => "context",
            Kind::Surface => "surface",
            Kind::Joystick => "joystick",
            Kind::Icon => "icon",
            Kind::Cursor => "cursor",
        };
        f.write_str(name)
    }
}

pub trait HandleKind: 'static {
    const KIND: Kind;
}

/// Type-level tags for [`Handle`].
pub mod kind {
    use super::{HandleKind, Kind};

    macro_rules! handle_kinds {
        ($($name:ident),* $(,)?) => {
            $(
                #[derive(Debug)]
                pub enum $name {}

                impl HandleKind for $name {
                    const KIND: Kind = Kind::$name;
                }
            )*
        };
    }

    handle_kinds!(Window, Display, Context, Surface, Joystick, Icon, Cursor);
}

pub type WindowHandle = Handle<kind::Window>;
pub type DisplayHandle = Handle<kind::Display>;
pub type ContextHandle = Handle<kind::Context>;
pub type SurfaceHandle = Handle<kind::Surface>;
pub type JoystickHandle = Handle<kind::Joystick>;
pub type IconHandle = Handle<kind::Icon>;
pub type CursorHandle = Handle<kind::Cursor>;

pub struct Handle<K> {
    registry: u32,
    slot: Slot,
    _kind: PhantomData<fn() -> K>,
}

impl<K: HandleKind> Handle<K> {
    pub fn null() -> Self {
        Self {
            registry: 0,
            slot: Slot::null(),
            _kind: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.registry == 0 || self.slot.is_null()
    }

    pub fn kind(&self) -> Kind {
        K::KIND
    }

    /// Slot index and generation packed into one integer, stable for the
    /// lifetime of the handle. Only meaningful together with the registry.
    pub fn raw(&self) -> u64 {
        self.slot.data().as_ffi()
    }
}

impl<K> Copy for Handle<K> {}

impl<K> Clone for Handle<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.registry == other.registry && self.slot == other.slot
    }
}

impl<K> Eq for Handle<K> {}

impl<K> PartialOrd for Handle<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Handle<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.registry, self.slot).cmp(&(other.registry, other.slot))
    }
}

impl<K> Hash for Handle<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.registry.hash(state);
        self.slot.hash(state);
    }
}

impl<K: HandleKind> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "{}(null)", K::KIND);
        }
        write!(f, "{}({:?}@{})", K::KIND, self.slot.data(), self.registry)
    }
}

/// Issues handles and answers whether they are still alive.
///
/// Each driver (and each graphics backend) owns one registry. Handles issued
/// by a different registry are rejected as foreign.
#[derive(Debug)]
pub struct HandleRegistry {
    id: u32,
    slots: Mutex<SlotMap<Slot, Kind>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, atomic::Ordering::Relaxed),
            slots: Mutex::new(SlotMap::with_key()),
        }
    }

    pub fn allocate<K: HandleKind>(&self) -> Handle<K> {
        let slot = self.slots.lock().insert(K::KIND);
        Handle {
            registry: self.id,
            slot,
            _kind: PhantomData,
        }
    }

    pub fn is_valid<K: HandleKind>(&self, handle: Handle<K>) -> bool {
        handle.registry == self.id && self.slots.lock().get(handle.slot) == Some(&K::KIND)
    }

    pub fn validate<K: HandleKind>(&self, handle: Handle<K>) -> Result<()> {
        if self.is_valid(handle) {
            Ok(())
        } else {
            Err(Error::InvalidHandle(K::KIND))
        }
    }

    /// Returns whether the handle was live. Invalidating twice is a no-op.
    pub fn invalidate<K: HandleKind>(&self, handle: Handle<K>) -> bool {
        if handle.registry != self.id {
            return false;
        }
        let mut slots = self.slots.lock();
        if slots.get(handle.slot) == Some(&K::KIND) {
            slots.remove(handle.slot);
            true
        } else {
            false
        }
    }

    pub fn live_count(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn live_count_of(&self, kind: Kind) -> usize {
        self.slots.lock().values().filter(|k| **k == kind).count()
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc, thread};

    #[test]
    fn null_is_never_valid() {
        let registry = HandleRegistry::new();
        let null = WindowHandle::null();
        assert!(null.is_null());
        assert!(!registry.is_valid(null));
        assert!(!registry.invalidate(null));
    }

    #[test]
    fn invalidate_is_idempotent() {
        let registry = HandleRegistry::new();
        let window: WindowHandle = registry.allocate();
        assert!(registry.is_valid(window));
        assert!(registry.invalidate(window));
        assert!(!registry.invalidate(window));
        assert!(!registry.is_valid(window));
        assert!(matches!(
            registry.validate(window),
            Err(Error::InvalidHandle(Kind::Window))
        ));
    }

    #[test]
    fn reused_slot_does_not_revive_stale_handle() {
        let registry = HandleRegistry::new();
        let first: ContextHandle = registry.allocate();
        registry.invalidate(first);
        let second: ContextHandle = registry.allocate();
        assert_ne!(first, second);
        assert!(!registry.is_valid(first));
        assert!(registry.is_valid(second));
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let ours = HandleRegistry::new();
        let theirs = HandleRegistry::new();
        let handle: IconHandle = theirs.allocate();
        assert!(!ours.is_valid(handle));
        assert!(!ours.invalidate(handle));
        assert!(theirs.is_valid(handle));
    }

    #[test]
    fn live_counts_track_kinds() {
        let registry = HandleRegistry::new();
        let _w: WindowHandle = registry.allocate();
        let c: CursorHandle = registry.allocate();
        let _c2: CursorHandle = registry.allocate();
        assert_eq!(registry.live_count(), 3);
        assert_eq!(registry.live_count_of(Kind::Cursor), 2);
        registry.invalidate(c);
        assert_eq!(registry.live_count_of(Kind::Cursor), 1);
        assert_eq!(registry.live_count_of(Kind::Window), 1);
    }

    #[test]
    fn concurrent_allocation_yields_distinct_handles() {
        let registry = Arc::new(HandleRegistry::new());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    (0..64)
                        .map(|_| registry.allocate::<kind::Joystick>())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for t in threads {
            for handle in t.join().unwrap() {
                assert!(seen.insert(handle));
            }
        }
        assert_eq!(seen.len(), 256);
    }
}
