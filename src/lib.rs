//! # `reap` — deferred reclamation for reference-counted handles
//!
//! `reap` provides shared-ownership smart handles whose backing storage is not reclaimed the
//! instant the last handle goes away, but asynchronously, by a background worker that drains
//! batches of pending destructions. The producing thread pays an atomic decrement and a cheap
//! buffered append; the destructor and the deallocation run later, off its critical path.
//!
//! ## Overview
//!
//! - **Handles**
//!     * [`Ref`] for a shared single object.
//!     * [`RefArray`] for a shared fixed-length array.
//! - **Runtime control**
//!     * [`start`]/[`start_with`] to spawn the collector.
//!     * [`suggest_run`] to nudge it.
//!     * [`pause`]/[`resume`]/[`is_paused`] to suspend it.
//!     * [`shutdown`] to stop it and drain everything.
//!
//! ## Why?
//!
//! Destruction is rarely free. A drop can mean running a destructor, walking owned structures,
//! and giving memory back to the allocator, and in a workload where a hundred threads churn
//! through short-lived shared objects, all of that lands on the hottest paths of the program.
//! Deferring it moves that cost to a single background thread which destroys in bulk, where the
//! allocator and the cache get to see some locality.
//!
//! The trade-off is liveness: memory of dead objects lingers for up to a collection period. The
//! collector can be nudged ([`suggest_run`]) when the application knows it just released
//! something big, and it wakes itself when a thread buffers suspiciously many destructions.
//!
//! ## Usage
//!
//! Start the collector once, near the top of the program, then use the handles like any other
//! reference-counted pointer:
//!
//! ```rust
//! let numbers = reap::RefArray::<u32>::from_slice(&[1, 2, 3, 4]);
//!
//! reap::start();
//!
//! let handle: reap::Ref<String> = reap::Ref::new("hello".to_string());
//! let clone = handle.clone();
//! assert_eq!(*handle, *clone);
//!
//! drop(handle);
//! drop(clone); // queued; destroyed by the collector, or at shutdown
//!
//! assert_eq!(numbers.iter().sum::<u32>(), 10);
//!
//! reap::shutdown();
//! ```
//!
//! Handles work without a running collector too: destructions then happen synchronously at the
//! last drop, like plain `Arc`. Nothing is ever destroyed twice and nothing is ever forgotten —
//! a thread's pending destructions are flushed when the thread exits, and [`shutdown`] drains
//! everything that remains.
//!
//! ## Design & internals
//!
//! Every thread that releases final handles owns a *page*: a buffered batch of pending
//! destructions, registered in a global list. Dropping the last handle to an object appends a
//! destruction obligation to the current thread's page, with no cross-thread contention. The
//! collector wakes periodically, walks the registered pages, and drains them, running the
//! destructors. Thread exit deregisters and drains the thread's own page.
//!
//! The counter width of a handle is selectable (see [`Counter`]): objects with a known small
//! fan-out can spend a single byte on their count.
//!
//! ## Cycles
//!
//! This is reference counting with no cycle detection and no weak handles. Handles that form a
//! cycle keep each other alive and leak. Break cycles by hand, or don't build them.
//!
//! ## Debugging
//!
//! Enable the `debug-tools` feature and set the environment variable `REAP_DEBUG_MODE` to get a
//! trace of registrations, drains, and destructions on stdout. Set `REAP_DEBUG_STACKTRACE` to
//! follow each message with a stack trace.

#![deny(missing_docs)]

mod array;
mod block;
mod counter;
mod debug;
mod destroyer;
mod global;
mod handle;
mod local;
mod page;
pub mod settings;

pub use crate::array::RefArray;
pub use crate::counter::Counter;
pub use crate::handle::Ref;
pub use crate::settings::Settings;

/// Start the collector with default [`Settings`].
///
/// Spawns the background worker. A no-op if the collector is already running, so libraries may
/// call this defensively. After a [`shutdown`], starting again is allowed and resumes deferred
/// reclamation.
pub fn start() {
    global::start();
}

/// Start the collector with the given [`Settings`].
///
/// Like [`start`], but choosing the collection period and wake behavior. A no-op if the
/// collector is already running, in which case the settings are not changed.
pub fn start_with(settings: Settings) {
    global::start_with(settings);
}

/// Suggest that the collector runs now.
///
/// Wakes the worker if it is waiting; the run still does not happen while the collector is
/// paused. A no-op if the collector is not running.
pub fn suggest_run() {
    global::suggest_run();
}

/// Check whether collection is paused.
pub fn is_paused() -> bool {
    global::is_paused()
}

/// Pause future collection runs.
///
/// The collector won't run again until it is resumed. A run already in flight finishes;
/// destructions queued while paused accumulate in the pages.
pub fn pause() {
    global::pause();
}

/// Resume collection runs.
pub fn resume() {
    global::resume();
}

/// Stop the collector and drain every pending destruction.
///
/// Joins the worker, then destroys everything still buffered in the registered pages and empties
/// the registry. Idempotent: a second call is a no-op. Handles keep working afterwards, with
/// synchronous destruction, until [`start`] is called again.
pub fn shutdown() {
    global::shutdown();
}
