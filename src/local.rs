//! The thread-local ingress.
//!
//! Every producer thread owns one page per collector, created the first time the thread queues a
//! destruction and registered in that collector's registry. Later queueings append straight to
//! the page without touching the registry, so the hot path contends on nothing but the thread's
//! own page mutex (and on that only with the worker). At thread exit, the registration
//! deregisters the page and drains whatever the worker has not picked up.

use std::cell::RefCell;
use std::collections::btree_map::{BTreeMap, Entry};
use std::mem;
use std::sync::Arc;

use crate::debug;
use crate::destroyer::Destroyer;
use crate::global::Shared;
use crate::page::{Append, Page};

thread_local! {
    /// This thread's page registrations, keyed by collector id.
    static PAGES: RefCell<BTreeMap<usize, Registration>> = RefCell::new(BTreeMap::new());
}

/// One thread's membership in one collector.
struct Registration {
    shared: Arc<Shared>,
    page: Arc<Page>,
    /// The collector epoch this page was registered under. A shutdown detaches all pages and
    /// bumps the epoch, so a mismatch means the page is orphaned and must be replaced.
    epoch: usize,
}

impl Registration {
    fn new(shared: &Arc<Shared>) -> Registration {
        Registration {
            shared: shared.clone(),
            epoch: shared.epoch(),
            page: shared.register(),
        }
    }

    fn is_stale(&self) -> bool {
        self.epoch != self.shared.epoch()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.shared.deregister(&self.page);

        debug::exec(|| {
            if !self.page.is_empty() {
                println!("Thread exit draining {} destructions.", self.page.len());
            }
        });

        // Drain what the collector has not picked up. A destructor that releases further handles
        // on this thread falls back to synchronous destruction, since the map is already
        // unreachable at teardown (or holds a fresh registration when replacing a stale one).
        self.page.clear();
    }
}

/// Queue a destruction with `shared`.
///
/// Appends to the calling thread's page, creating and registering it on first use. When the
/// collector is not running, or the thread is too far into its teardown to own a page, the
/// destroyer runs right here instead; the obligation is fulfilled either way.
pub fn delegate(shared: &Arc<Shared>, destroyer: Destroyer) {
    if !shared.is_alive() {
        // No worker will come around to drain a page; destroy on the spot.
        drop(destroyer);
        return;
    }

    // Look up (or create) the page outside of any destructor's reach: the map borrow ends before
    // any destroyer can run.
    let fetched = PAGES.try_with(|map| {
        let mut map = map.borrow_mut();
        match map.entry(shared.id()) {
            Entry::Occupied(mut occupied) if occupied.get().is_stale() => {
                // The collector was shut down and restarted since this thread last queued
                // something. Replace the registration; the stale one is drained below, after the
                // borrow is gone.
                let stale = mem::replace(occupied.get_mut(), Registration::new(shared));
                (occupied.get().page.clone(), Some(stale))
            }
            Entry::Occupied(occupied) => (occupied.get().page.clone(), None),
            Entry::Vacant(vacant) => (vacant.insert(Registration::new(shared)).page.clone(), None),
        }
    });

    match fetched {
        Ok((page, stale)) => {
            drop(stale);

            match page.add(destroyer) {
                Append::Queued => {}
                Append::QueuedOverflow => shared.nudge(),
                Append::Rejected(destroyer) => {
                    debug::exec(|| println!("Page overflow allocation failed; destroying inline."));
                    drop(destroyer);
                }
            }
        }
        // The thread-local map is already gone; this thread is exiting.
        Err(_) => drop(destroyer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block;
    use crate::global::Collector;
    use crate::settings::Settings;
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

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
    fn one_page_per_thread() {
        let hits = Arc::new(AtomicUsize::new(0));
        let collector = Collector::new();
        collector.start_with(Settings {
            period: Duration::from_secs(3600),
            wake_on_overflow: false,
        });

        for _ in 0..10 {
            delegate(collector.shared(), armed_probe(&hits));
        }
        assert_eq!(collector.shared().page_count(), 1);
        assert_eq!(collector.shared().pending(), 10);

        collector.shutdown();
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn threads_register_their_own_pages() {
        let hits = Arc::new(AtomicUsize::new(0));
        let collector = Arc::new(Collector::new());
        collector.start_with(Settings {
            period: Duration::from_secs(3600),
            wake_on_overflow: false,
        });

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let hits = hits.clone();
                let collector = collector.clone();
                thread::spawn(move || {
                    delegate(collector.shared(), armed_probe(&hits));
                    // The page is registered and holds the one destruction for as long as the
                    // thread lives.
                    assert!(collector.shared().pending() >= 1);
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        // Teardown deregistered and drained every page.
        assert_eq!(collector.shared().page_count(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 4);

        collector.shutdown();
    }

    #[test]
    fn thread_exit_drains_without_a_collection() {
        let hits = Arc::new(AtomicUsize::new(0));
        let collector = Arc::new(Collector::new());
        collector.start_with(Settings {
            period: Duration::from_secs(3600),
            wake_on_overflow: false,
        });
        collector.pause();

        {
            let hits = hits.clone();
            let collector = collector.clone();
            thread::spawn(move || {
                delegate(collector.shared(), armed_probe(&hits));
            })
            .join()
            .unwrap();
        }

        // The worker never ran, the page teardown destroyed the probe anyway.
        assert!(collector.is_paused());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        collector.shutdown();
    }

    #[test]
    fn cascading_destructions_survive_thread_exit() {
        struct Cascade {
            hits: Arc<AtomicUsize>,
            rest: Option<crate::Ref<Cascade>>,
        }

        impl Drop for Cascade {
            fn drop(&mut self) {
                self.hits.fetch_add(1, Ordering::SeqCst);
            }
        }

        let hits = Arc::new(AtomicUsize::new(0));

        {
            let hits = hits.clone();
            thread::spawn(move || {
                // A chain of three; dropping the head releases them all through the synchronous
                // path, since no worker is running, and each destruction triggers the next.
                let tail = crate::Ref::new(Cascade {
                    hits: hits.clone(),
                    rest: None,
                });
                let middle = crate::Ref::new(Cascade {
                    hits: hits.clone(),
                    rest: Some(tail),
                });
                let _head: crate::Ref<Cascade> = crate::Ref::new(Cascade {
                    hits,
                    rest: Some(middle),
                });
            })
            .join()
            .unwrap();
        }

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
