//! Destruction obligations.

use std::panic::{self, AssertUnwindSafe};

use crate::block::BlockPtr;
use crate::debug;

/// An owned obligation to destroy one control block.
///
/// A destroyer is the unit of work that travels from the thread that dropped the last handle to
/// whatever eventually runs the destruction. It is either *armed* (it owns a block) or *disarmed*
/// (it owns nothing, the state after a move or of a fresh slot). Dropping an armed destroyer
/// destroys its block exactly once; moving it transfers the obligation and disarms the source,
/// which the affine type system enforces for us.
///
/// Destruction never propagates a panic: a panicking payload destructor is caught and discarded,
/// so a misbehaving destructor cannot take the reclamation machinery down with it.
pub struct Destroyer {
    block: Option<BlockPtr>,
}

impl Destroyer {
    /// Create a disarmed destroyer.
    pub fn disarmed() -> Destroyer {
        Destroyer { block: None }
    }

    /// Create a destroyer armed with `block`.
    ///
    /// # Safety
    ///
    /// The block must be exclusively owned by the new destroyer: no handle may use it afterwards,
    /// and nothing else may destroy it. The block's payload must be safe to drop on whichever
    /// thread ends up dropping the destroyer, which the handles guarantee by bounding their
    /// payloads with `Send`.
    pub unsafe fn armed(block: BlockPtr) -> Destroyer {
        Destroyer { block: Some(block) }
    }

    /// Does this destroyer currently hold an obligation?
    pub fn is_armed(&self) -> bool {
        self.block.is_some()
    }
}

impl Default for Destroyer {
    fn default() -> Destroyer {
        Destroyer::disarmed()
    }
}

impl Drop for Destroyer {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            debug::exec(|| println!("Destroying block at {:?}.", block.addr()));

            // A payload destructor may panic; contain it here so neither the collector thread
            // nor a producer draining its own page unwinds.
            let _ = panic::catch_unwind(AssertUnwindSafe(|| unsafe { block.destroy() }));
        }
    }
}

// The raw block pointer is only reachable through `drop`, and the handles only arm destroyers
// with `Send` payloads.
unsafe impl Send for Destroyer {}
