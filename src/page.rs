//! Pending-destruction buffers.

use std::mem;

use parking_lot::Mutex;

use crate::debug;
use crate::destroyer::Destroyer;

/// The capacity of one sub-array of a page.
///
/// A page is logically unbounded: when the active sub-array fills, a fresh one is allocated, so a
/// producer is never blocked behind a slow collector. Each sub-array is a single allocation of
/// this many slots.
pub const SUB_CAPACITY: usize = 8192;

/// The outcome of appending a destroyer to a page.
pub enum Append {
    /// Appended to the active sub-array.
    Queued,
    /// Appended, after rolling over into a freshly allocated sub-array. Callers use this as a
    /// pressure signal.
    QueuedOverflow,
    /// The overflow sub-array could not be allocated; the destroyer is handed back so the caller
    /// can run it synchronously. An obligation is never silently dropped.
    Rejected(Destroyer),
}

/// A buffer of destroyers owned by one producer thread and drained by the collector.
///
/// Appends and drains are serialized by the page's own mutex, which is a leaf lock: no other lock
/// in the crate is taken while it is held, and destroyers never run under it.
pub struct Page {
    slots: Mutex<Vec<Vec<Destroyer>>>,
}

impl Page {
    /// Create an empty page with one pre-allocated sub-array.
    pub fn new() -> Page {
        Page {
            slots: Mutex::new(vec![Vec::with_capacity(SUB_CAPACITY)]),
        }
    }

    /// Append a destroyer.
    ///
    /// Returns once the slot is populated. Rolling over into a new sub-array is transparent to
    /// the caller except for the [`Append::QueuedOverflow`] signal; a failed overflow allocation
    /// hands the destroyer back instead.
    pub fn add(&self, destroyer: Destroyer) -> Append {
        debug_assert!(destroyer.is_armed(), "buffering a disarmed destroyer");

        let mut slots = self.slots.lock();

        match slots.last_mut() {
            Some(sub) if sub.len() < SUB_CAPACITY => {
                sub.push(destroyer);
                Append::Queued
            }
            _ => {
                let mut sub = Vec::new();
                if sub.try_reserve_exact(SUB_CAPACITY).is_err() || slots.try_reserve(1).is_err() {
                    return Append::Rejected(destroyer);
                }

                debug::exec(|| println!("Page grew a sub-array."));

                sub.push(destroyer);
                slots.push(sub);
                Append::QueuedOverflow
            }
        }
    }

    /// Destroy everything currently collected and reset the page to a single empty sub-array.
    ///
    /// The buffered destroyers are detached under the lock but run after it is released. A
    /// destructor that itself releases handles on this thread may therefore append to this very
    /// page while the drain is still running.
    pub fn clear(&self) {
        {
            let slots = self.slots.lock();
            if slots.iter().all(|sub| sub.is_empty()) {
                return;
            }
        }

        let fresh = vec![Vec::with_capacity(SUB_CAPACITY)];
        let detached = mem::replace(&mut *self.slots.lock(), fresh);

        debug::exec(|| {
            println!(
                "Draining {} destroyers.",
                detached.iter().map(Vec::len).sum::<usize>()
            )
        });

        drop(detached);
    }

    /// The number of destroyers currently buffered.
    pub fn len(&self) -> usize {
        self.slots.lock().iter().map(Vec::len).sum()
    }

    /// Is the page currently empty?
    pub fn is_empty(&self) -> bool {
        self.slots.lock().iter().all(|sub| sub.is_empty())
    }
}

impl Default for Page {
    fn default() -> Page {
        Page::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block;
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    struct Probe(Arc<AtomicUsize>);

    impl Drop for Probe {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn armed_probe(hits: &Arc<AtomicUsize>) -> Destroyer {
        let parts = block::new_inline::<Probe, AtomicU8>(Probe(hits.clone()));
        unsafe { Destroyer::armed(parts.block) }
    }

    #[test]
    fn add_then_clear_destroys() {
        let hits = Arc::new(AtomicUsize::new(0));
        let page = Page::new();

        for _ in 0..100 {
            page.add(armed_probe(&hits));
        }
        assert_eq!(page.len(), 100);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        page.clear();
        assert_eq!(page.len(), 0);
        assert!(page.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn clear_on_empty_is_a_nop() {
        let page = Page::new();
        page.clear();
        assert!(page.is_empty());
    }

    #[test]
    fn overflow_is_transparent() {
        let hits = Arc::new(AtomicUsize::new(0));
        let page = Page::new();

        let mut overflows = 0;
        for _ in 0..SUB_CAPACITY + 1 {
            match page.add(armed_probe(&hits)) {
                Append::Queued => {}
                Append::QueuedOverflow => overflows += 1,
                Append::Rejected(_) => panic!("no allocation pressure expected"),
            }
        }

        // Only the one append past the boundary rolled over.
        assert_eq!(overflows, 1);
        assert_eq!(page.len(), SUB_CAPACITY + 1);

        page.clear();
        assert_eq!(hits.load(Ordering::SeqCst), SUB_CAPACITY + 1);
    }

    #[test]
    fn dropping_the_page_drains_it() {
        let hits = Arc::new(AtomicUsize::new(0));
        let page = Page::new();

        for _ in 0..42 {
            page.add(armed_probe(&hits));
        }
        drop(page);

        assert_eq!(hits.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn concurrent_append_and_clear_lose_nothing() {
        const ITEMS: usize = 20_000;

        let hits = Arc::new(AtomicUsize::new(0));
        let page = Arc::new(Page::new());

        let producer = {
            let hits = hits.clone();
            let page = page.clone();
            thread::spawn(move || {
                for _ in 0..ITEMS {
                    page.add(armed_probe(&hits));
                }
            })
        };

        while hits.load(Ordering::SeqCst) < ITEMS {
            page.clear();
            thread::yield_now();
        }
        producer.join().unwrap();
        page.clear();

        assert_eq!(hits.load(Ordering::SeqCst), ITEMS);
    }
}
