//! Strong-count atomics.

use std::sync::atomic::{self, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};

/// An atomic strong-reference counter.
///
/// Every handle instantiation picks a counter width through this trait. The width bounds the
/// number of handles that can share one allocation, so it should be chosen from the expected
/// fan-out: the default of `AtomicU8` assumes few simultaneous handles per object, which keeps the
/// control block small. Wider counters trade a few bytes per allocation for more headroom.
///
/// Exceeding the width is a programming error. Debug builds assert on an increment of a saturated
/// counter; release builds wrap, with all the consequences that has for a reference count.
pub trait Counter: Send + Sync + 'static {
    /// Create a counter with an initial count of one.
    fn one() -> Self;

    /// Increment the count, registering one more handle.
    fn increment(&self);

    /// Decrement the count, unregistering a handle.
    ///
    /// Returns `true` when this was the last handle. The decrement releases, and the zero case
    /// acquires, so the thread observing zero sees every write made through the other handles
    /// before it tears the object down.
    fn decrement(&self) -> bool;

    /// Read the current count.
    fn get(&self) -> usize;
}

macro_rules! counter {
    ($($atomic:ty => $raw:ty,)*) => {
        $(
            impl Counter for $atomic {
                #[inline]
                fn one() -> Self {
                    <$atomic>::new(1)
                }

                #[inline]
                fn increment(&self) {
                    // Relaxed suffices: the thread already holds a handle, so the count cannot
                    // concurrently reach zero.
                    let prev = self.fetch_add(1, Ordering::Relaxed);
                    debug_assert!(
                        prev != <$raw>::MAX,
                        "reference counter saturated; pick a wider counter for this handle"
                    );
                }

                #[inline]
                fn decrement(&self) -> bool {
                    if self.fetch_sub(1, Ordering::Release) == 1 {
                        // Pair with the releases of the other decrements, so the destruction
                        // observes a quiescent object.
                        atomic::fence(Ordering::Acquire);
                        true
                    } else {
                        false
                    }
                }

                #[inline]
                fn get(&self) -> usize {
                    self.load(Ordering::Acquire) as usize
                }
            }
        )*
    };
}

counter! {
    AtomicU8 => u8,
    AtomicU16 => u16,
    AtomicU32 => u32,
    AtomicU64 => u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one() {
        assert_eq!(Counter::get(&AtomicU8::one()), 1);
        assert_eq!(Counter::get(&AtomicU16::one()), 1);
        assert_eq!(Counter::get(&AtomicU32::one()), 1);
        assert_eq!(Counter::get(&AtomicU64::one()), 1);
    }

    #[test]
    fn increment_decrement_balances() {
        let counter = AtomicU32::one();
        for _ in 0..100 {
            counter.increment();
        }
        assert_eq!(Counter::get(&counter), 101);

        for _ in 0..100 {
            assert!(!counter.decrement());
        }
        assert_eq!(Counter::get(&counter), 1);
        assert!(counter.decrement());
    }

    #[test]
    fn only_last_decrement_reports_zero() {
        let counter = AtomicU16::one();
        counter.increment();
        counter.increment();

        assert!(!counter.decrement());
        assert!(!counter.decrement());
        assert!(counter.decrement());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn debug_saturation() {
        let counter = AtomicU8::one();
        for _ in 0..u8::MAX {
            counter.increment();
        }
    }
}
