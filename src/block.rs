//! Control blocks.
//!
//! A control block is the heap record behind a handle: the payload together with the strong
//! count. There are three layouts. `InlineBlock` embeds the payload, giving the common
//! construct-behind-a-handle path a single allocation. `BoxedBlock` adopts an already allocated
//! `Box<T>`. `ArrayBlock` owns a boxed slice and covers the array handles.
//!
//! The handle types don't know which layout they point into. They carry a [`BlockPtr`]: the
//! erased block address paired with the monomorphized function that deallocates it. Dropping the
//! block through that function is what runs the payload's destructor.

use std::ptr::NonNull;

use crate::counter::Counter;

/// The type-erased identity of a control block.
///
/// This is the only thing a handle needs to remember about the block's concrete layout: where it
/// lives and how to delete it.
#[derive(Clone, Copy)]
pub struct BlockPtr {
    ptr: NonNull<()>,
    drop_fn: unsafe fn(*mut ()),
}

impl BlockPtr {
    /// Destroy the pointed-to block, running the payload's destructor and releasing the backing
    /// storage.
    ///
    /// # Safety
    ///
    /// The block must be uniquely owned by the caller and must not be used afterwards.
    pub unsafe fn destroy(self) {
        (self.drop_fn)(self.ptr.as_ptr());
    }

    /// The block's address, for identity comparisons and diagnostics.
    pub fn addr(&self) -> *const () {
        self.ptr.as_ptr()
    }
}

/// What a freshly allocated block hands back to the handle: the payload location, the counter
/// location, and the erased block identity.
pub struct Parts<T, C> {
    pub data: NonNull<T>,
    pub counter: NonNull<C>,
    pub block: BlockPtr,
}

struct InlineBlock<T, C> {
    counter: C,
    value: T,
}

struct BoxedBlock<T, C> {
    counter: C,
    value: Box<T>,
}

struct ArrayBlock<T, C> {
    counter: C,
    data: Box<[T]>,
}

unsafe fn drop_block<B>(ptr: *mut ()) {
    drop(Box::from_raw(ptr as *mut B));
}

/// Allocate an inline block around `value` with a count of one.
pub fn new_inline<T, C: Counter>(value: T) -> Parts<T, C> {
    let block = Box::into_raw(Box::new(InlineBlock {
        counter: C::one(),
        value,
    }));

    unsafe {
        Parts {
            data: NonNull::new_unchecked(&mut (*block).value),
            counter: NonNull::new_unchecked(&mut (*block).counter),
            block: BlockPtr {
                ptr: NonNull::new_unchecked(block as *mut ()),
                drop_fn: drop_block::<InlineBlock<T, C>>,
            },
        }
    }
}

/// Allocate a block adopting the externally allocated `value`, with a count of one.
pub fn new_boxed<T, C: Counter>(value: Box<T>) -> Parts<T, C> {
    let block = Box::into_raw(Box::new(BoxedBlock {
        counter: C::one(),
        value,
    }));

    unsafe {
        Parts {
            data: NonNull::new_unchecked(&mut *(*block).value as *mut T),
            counter: NonNull::new_unchecked(&mut (*block).counter),
            block: BlockPtr {
                ptr: NonNull::new_unchecked(block as *mut ()),
                drop_fn: drop_block::<BoxedBlock<T, C>>,
            },
        }
    }
}

/// Allocate a block owning the array `data`, with a count of one.
///
/// Returns the element pointer and length separately; for an empty array the pointer is the
/// slice's dangling-but-aligned base and must not be dereferenced.
pub fn new_array<T, C: Counter>(data: Box<[T]>) -> (Parts<T, C>, usize) {
    let len = data.len();
    let block = Box::into_raw(Box::new(ArrayBlock {
        counter: C::one(),
        data,
    }));

    let parts = unsafe {
        Parts {
            data: NonNull::new_unchecked((*block).data.as_mut_ptr()),
            counter: NonNull::new_unchecked(&mut (*block).counter),
            block: BlockPtr {
                ptr: NonNull::new_unchecked(block as *mut ()),
                drop_fn: drop_block::<ArrayBlock<T, C>>,
            },
        }
    };
    (parts, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Probe(Arc<AtomicUsize>);

    impl Drop for Probe {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn inline_payload_reachable() {
        let parts = new_inline::<u64, AtomicU8>(0xdead);
        assert_eq!(unsafe { *parts.data.as_ref() }, 0xdead);
        assert_eq!(unsafe { Counter::get(parts.counter.as_ref()) }, 1);
        unsafe { parts.block.destroy() };
    }

    #[test]
    fn inline_destroy_drops_payload() {
        let hits = Arc::new(AtomicUsize::new(0));
        let parts = new_inline::<Probe, AtomicU8>(Probe(hits.clone()));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        unsafe { parts.block.destroy() };
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn boxed_adopts_allocation() {
        let hits = Arc::new(AtomicUsize::new(0));
        let parts = new_boxed::<Probe, AtomicU8>(Box::new(Probe(hits.clone())));
        unsafe { parts.block.destroy() };
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn array_drops_every_element() {
        let hits = Arc::new(AtomicUsize::new(0));
        let elements: Vec<Probe> = (0..13).map(|_| Probe(hits.clone())).collect();
        let (parts, len) = new_array::<Probe, AtomicU8>(elements.into_boxed_slice());
        assert_eq!(len, 13);
        unsafe { parts.block.destroy() };
        assert_eq!(hits.load(Ordering::SeqCst), 13);
    }

    #[test]
    fn empty_array() {
        let (parts, len) = new_array::<u32, AtomicU8>(Vec::new().into_boxed_slice());
        assert_eq!(len, 0);
        unsafe { parts.block.destroy() };
    }
}
