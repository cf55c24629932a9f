//! The collector: the page registry and the background worker draining it.

use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lazy_static::lazy_static;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::debug;
use crate::destroyer::Destroyer;
use crate::local;
use crate::page::Page;
use crate::settings::Settings;

lazy_static! {
    /// The process-wide collector.
    ///
    /// The crate-level API and the handles all go through this instance. Tests construct their
    /// own `Collector`s instead, so they don't have to serialize on this one.
    static ref COLLECTOR: Collector = Collector::new();
}

/// The id allocator for collectors.
///
/// Each collector gets a unique id, which keys the per-thread page maps. Relaxed ordering is
/// fine, as uniqueness is the only constraint we need.
static ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Start the process-wide collector with default settings.
pub fn start() {
    COLLECTOR.start();
}

/// Start the process-wide collector with the given settings.
pub fn start_with(settings: Settings) {
    COLLECTOR.start_with(settings);
}

/// Nudge the process-wide collector.
pub fn suggest_run() {
    COLLECTOR.suggest_run();
}

/// Pause the process-wide collector.
pub fn pause() {
    COLLECTOR.pause();
}

/// Resume the process-wide collector.
pub fn resume() {
    COLLECTOR.resume();
}

/// Is the process-wide collector paused?
pub fn is_paused() -> bool {
    COLLECTOR.is_paused()
}

/// Shut the process-wide collector down.
pub fn shutdown() {
    COLLECTOR.shutdown();
}

/// Queue a destruction on the process-wide collector.
pub fn delegate(destroyer: Destroyer) {
    local::delegate(COLLECTOR.shared(), destroyer);
}

/// The state shared between the collector handle, the worker thread, and the producer threads'
/// page registrations.
pub struct Shared {
    /// The collector's unique id, keying the per-thread page maps.
    id: usize,
    /// Every live page, in registration order. Producers take the write lock to register and
    /// deregister; the worker takes the read lock just long enough to snapshot.
    pages: RwLock<Vec<Arc<Page>>>,
    /// Is the worker supposed to be running?
    alive: AtomicBool,
    /// Is collection suspended?
    paused: AtomicBool,
    /// Bumped whenever a shutdown detaches the registered pages, so stale thread-local
    /// registrations can be recognized and replaced after a restart.
    epoch: AtomicUsize,
    /// The number of completed collection runs. Diagnostic.
    runs: AtomicUsize,
    /// The worker's nominal wake interval, in milliseconds.
    period_ms: AtomicU64,
    /// Wake the worker when a page rolls over into a new sub-array.
    wake_on_overflow: AtomicBool,
    /// The worker's alarm clock. Notified by `suggest_run`, by `resume`, by buffer pressure, and
    /// by shutdown.
    trigger: Condvar,
    /// The mutex the worker waits on. Held only around waiting and notifying, never during
    /// collection.
    signal: Mutex<()>,
}

impl Shared {
    fn new() -> Shared {
        let settings = Settings::default();
        Shared {
            id: ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            pages: RwLock::new(Vec::new()),
            alive: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            epoch: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            period_ms: AtomicU64::new(settings.period.as_millis() as u64),
            wake_on_overflow: AtomicBool::new(settings.wake_on_overflow),
            trigger: Condvar::new(),
            signal: Mutex::new(()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn epoch(&self) -> usize {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Create a page and register it.
    pub fn register(&self) -> Arc<Page> {
        let page = Arc::new(Page::new());
        self.pages.write().push(page.clone());

        debug::exec(|| {
            println!(
                "Registered a page for {:?} ({} pages).",
                thread::current().id(),
                self.page_count()
            )
        });

        page
    }

    /// Remove a page from the registry.
    ///
    /// The page itself is destroyed when its last reference is gone; a worker holding a snapshot
    /// may still be draining it.
    pub fn deregister(&self, page: &Arc<Page>) {
        self.pages.write().retain(|other| !Arc::ptr_eq(other, page));

        debug::exec(|| println!("Deregistered a page for {:?}.", thread::current().id()));
    }

    /// Report buffer pressure, waking the worker if the settings ask for it.
    pub fn nudge(&self) {
        if self.wake_on_overflow.load(Ordering::Relaxed) {
            self.notify();
        }
    }

    fn notify(&self) {
        // Taking the mutex orders the notification against the worker's wait, so a wake between
        // the worker's flag checks and its parking is not lost.
        let _signal = self.signal.lock();
        self.trigger.notify_one();
    }

    fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.load(Ordering::Relaxed))
    }

    fn configure(&self, settings: &Settings) {
        self.period_ms
            .store(settings.period.as_millis() as u64, Ordering::Relaxed);
        self.wake_on_overflow
            .store(settings.wake_on_overflow, Ordering::Relaxed);
    }

    /// Run one collection pass over every registered page.
    fn collect(&self) {
        debug::exec(|| println!("Collecting {} pending destructions.", self.pending()));

        // Snapshot the registry, then drain without any registry lock held. A destructor may
        // itself drop the last handle to something, and if that happens on this thread it must be
        // able to register this thread's page.
        let pages: Vec<Arc<Page>> = self.pages.read().clone();
        for page in pages {
            // A page drain runs arbitrary destructors; a panicking one must not take the worker
            // down. The destroyers already contain panics individually, this is the outer fence.
            let _ = panic::catch_unwind(AssertUnwindSafe(|| page.clear()));
        }

        self.runs.fetch_add(1, Ordering::Relaxed);
    }

    /// The number of destroyers currently buffered across all registered pages.
    pub fn pending(&self) -> usize {
        self.pages.read().iter().map(|page| page.len()).sum()
    }

    /// The number of registered pages.
    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }

    /// The number of completed collection runs.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::Relaxed)
    }
}

/// The worker loop: wait out the period (or a nudge), skip while paused, collect, repeat.
fn run_worker(shared: Arc<Shared>) {
    let mut signal = shared.signal.lock();

    while shared.alive.load(Ordering::Acquire) {
        shared.trigger.wait_for(&mut signal, shared.period());

        if !shared.alive.load(Ordering::Acquire) {
            break;
        }
        if shared.paused.load(Ordering::Acquire) {
            continue;
        }

        // Collection happens without the signal mutex, so nudges and shutdown are never blocked
        // behind a running pass.
        drop(signal);
        shared.collect();
        signal = shared.signal.lock();
    }
}

/// A deferred-reclamation collector.
///
/// One of these backs the whole crate-level API; separate instances exist so the machinery can be
/// exercised in isolation.
pub struct Collector {
    shared: Arc<Shared>,
    /// The worker thread, while one is running.
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Collector {
    pub fn new() -> Collector {
        Collector {
            shared: Arc::new(Shared::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Start the worker with default settings. A no-op if it is already running.
    pub fn start(&self) {
        self.start_with(Settings::default());
    }

    /// Start the worker. A no-op if it is already running.
    ///
    /// After a shutdown, this starts a fresh worker; threads that buffered destructions in the
    /// meantime are picked up again as soon as they queue the next one.
    pub fn start_with(&self, settings: Settings) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            // Already running.
            return;
        }

        self.shared.configure(&settings);
        self.shared.paused.store(false, Ordering::Release);
        self.shared.alive.store(true, Ordering::Release);

        let shared = self.shared.clone();
        *worker = Some(thread::spawn(move || run_worker(shared)));

        debug::exec(|| println!("Collector started."));
    }

    /// Wake the worker for an early pass. A no-op while paused or stopped.
    pub fn suggest_run(&self) {
        self.shared.notify();
    }

    /// Suspend collection.
    ///
    /// Takes effect at the worker's next wake; a pass already in flight finishes. Destructions
    /// keep accumulating in the pages until `resume`.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    /// Resume collection and wake the worker.
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        self.shared.notify();
    }

    /// Is collection currently suspended?
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Queue a destruction.
    pub fn delegate(&self, destroyer: Destroyer) {
        local::delegate(&self.shared, destroyer);
    }

    /// Stop the worker, then drain and detach every registered page.
    ///
    /// Idempotent: a second call finds no worker and returns. Destructions queued after this
    /// returns run synchronously on the queueing thread until the collector is started again.
    pub fn shutdown(&self) {
        let handle = {
            let mut worker = self.worker.lock();
            self.shared.paused.store(false, Ordering::Release);
            self.shared.alive.store(false, Ordering::Release);
            worker.take()
        };

        let handle = match handle {
            Some(handle) => handle,
            None => return,
        };

        self.shared.notify();
        // The worker only exits; it cannot panic past its catch.
        let _ = handle.join();

        // Final drain. Detaching empties the registry; the producer threads still hold their own
        // references and recognize the stale registrations by the epoch bump.
        let pages = mem::replace(&mut *self.shared.pages.write(), Vec::new());
        for page in &pages {
            page.clear();
        }
        self.shared.epoch.fetch_add(1, Ordering::Release);

        debug::exec(|| println!("Collector shut down after {} runs.", self.shared.runs()));
    }
}

impl Default for Collector {
    fn default() -> Collector {
        Collector::new()
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.shutdown();
    }
}
