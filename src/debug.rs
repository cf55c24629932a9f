//! Runtime debugging tools.

/// Execute closure when the environment variable, `REAP_DEBUG_MODE`, is set.
///
/// Without the `debug-tools` feature, this is a NOP.
#[cfg(feature = "debug-tools")]
pub fn exec<F: FnOnce()>(f: F) {
    use backtrace::Backtrace;
    use std::env;

    thread_local! {
        /// Is `REAP_DEBUG_MODE` set?
        ///
        /// This is cached to avoid expensive repeated syscalls or similar things.
        static DEBUG_MODE_ENABLED: bool = env::var("REAP_DEBUG_MODE").is_ok();
        /// Is `REAP_DEBUG_STACKTRACE` set?
        ///
        /// This is cached to avoid expensive repeated syscalls or similar things.
        static STACK_TRACE_ENABLED: bool = env::var("REAP_DEBUG_STACKTRACE").is_ok();
    }

    // If enabled, run the closure.
    if DEBUG_MODE_ENABLED.with(|&x| x) {
        f();
        if STACK_TRACE_ENABLED.with(|&x| x) {
            println!("{:?}", Backtrace::new());
        }
    }
}

/// Do nothing.
///
/// When compiled with feature `debug-tools`, this will execute the closure when envvar
/// `REAP_DEBUG_MODE` is set.
#[inline]
#[cfg(not(feature = "debug-tools"))]
pub fn exec<F: FnOnce()>(_: F) {}
