//! Shared handles to single objects.

use std::fmt;
use std::marker::PhantomData;
use std::ops;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU8;

use crate::block::{self, BlockPtr};
use crate::counter::Counter;
use crate::destroyer::Destroyer;
use crate::global;

/// A shared handle to a `T` with deferred destruction.
///
/// `Ref` is a reference-counted smart pointer in the same family as `Arc`, with one difference in
/// temperament: dropping the last handle does not destroy the object on the spot. It queues the
/// destruction with the collector, which runs it later on the background worker, off this
/// thread's critical path. Code that churns through many short-lived shared objects pays for
/// their teardown in batches, elsewhere.
///
/// The counter width is the `C` parameter, `AtomicU8` by default; see [`Counter`]. Cloning is an
/// atomic increment, dropping an atomic decrement — neither ever blocks. Handles to the same
/// object may be used and dropped freely from any thread.
///
/// Reference cycles through `Ref` leak, exactly as they do with `Arc`; there are no weak
/// handles to break them with.
///
/// Shared access is read-only through [`Deref`](ops::Deref). When a handle is provably unique,
/// [`get_mut`](Ref::get_mut) lends the payload mutably.
pub struct Ref<T, C: Counter = AtomicU8> {
    data: NonNull<T>,
    counter: NonNull<C>,
    block: BlockPtr,
    _marker: PhantomData<T>,
}

// Shared-ownership rules, as for `Arc`: sending or sharing a handle shares the payload, and the
// last drop can happen on any thread holding one.
unsafe impl<T: Send + Sync, C: Counter> Send for Ref<T, C> {}
unsafe impl<T: Send + Sync, C: Counter> Sync for Ref<T, C> {}

impl<T: Send + 'static, C: Counter> Ref<T, C> {
    /// Construct `value` behind a new handle.
    ///
    /// The payload is embedded in the control block, so this is a single allocation. The count
    /// starts at one.
    ///
    /// The payload must be `Send`: the destruction runs wherever the collector decides, usually
    /// on the worker thread.
    pub fn new(value: T) -> Ref<T, C> {
        Ref::from_parts(block::new_inline(value))
    }

    /// Adopt an already boxed value behind a new handle.
    ///
    /// The existing allocation is kept; the control block references it.
    pub fn from_box(value: Box<T>) -> Ref<T, C> {
        Ref::from_parts(block::new_boxed(value))
    }

    /// Adopt a raw, `Box`-allocated pointer behind a new handle.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw` (or equivalent) and must not be used, freed, or
    /// adopted again afterwards.
    pub unsafe fn from_raw(ptr: *mut T) -> Ref<T, C> {
        Ref::from_box(Box::from_raw(ptr))
    }
}

impl<T, C: Counter> Ref<T, C> {
    fn from_parts(parts: block::Parts<T, C>) -> Ref<T, C> {
        Ref {
            data: parts.data,
            counter: parts.counter,
            block: parts.block,
            _marker: PhantomData,
        }
    }

    fn counter(&self) -> &C {
        // The counter lives in the control block, which outlives every handle to it.
        unsafe { self.counter.as_ref() }
    }

    /// A reference to the payload.
    pub fn get(&self) -> &T {
        unsafe { self.data.as_ref() }
    }

    /// A mutable reference to the payload, if this is the only handle.
    ///
    /// Uniqueness makes the exclusive borrow sound: no other handle exists to observe the
    /// payload, and none can appear while `self` is mutably borrowed.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if self.counter().get() == 1 {
            Some(unsafe { self.data.as_mut() })
        } else {
            None
        }
    }

    /// The current number of handles to this object.
    ///
    /// Like `Arc::strong_count`, a snapshot: other threads may change it before the caller looks
    /// at it.
    pub fn strong_count(&self) -> usize {
        self.counter().get()
    }

    /// Do two handles refer to the same object?
    pub fn ptr_eq(this: &Ref<T, C>, other: &Ref<T, C>) -> bool {
        this.data == other.data
    }
}

impl<T, C: Counter> Clone for Ref<T, C> {
    fn clone(&self) -> Ref<T, C> {
        self.counter().increment();

        Ref {
            data: self.data,
            counter: self.counter,
            block: self.block,
            _marker: PhantomData,
        }
    }
}

impl<T, C: Counter> ops::Deref for Ref<T, C> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T, C: Counter> Drop for Ref<T, C> {
    fn drop(&mut self) {
        if self.counter().decrement() {
            // Last handle gone. The acquire in `decrement` makes the payload quiescent; hand the
            // block over for deferred destruction.
            global::delegate(unsafe { Destroyer::armed(self.block) });
        }
    }
}

impl<T: fmt::Debug, C: Counter> fmt::Debug for Ref<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self.get(), f)
    }
}

impl<T: fmt::Display, C: Counter> fmt::Display for Ref<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self.get(), f)
    }
}

impl<T: Default + Send + 'static, C: Counter> Default for Ref<T, C> {
    fn default() -> Ref<T, C> {
        Ref::new(T::default())
    }
}
