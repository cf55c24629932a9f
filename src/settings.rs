//! Settings and presets.

use std::time::Duration;

/// Settings for the collector.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Settings {
    /// The nominal interval between collection runs.
    ///
    /// The collector sleeps for this long between passes over the pages. A run can happen earlier
    /// when it is nudged, either explicitly or by buffer pressure, so the period is an upper
    /// bound on idle latency rather than a schedule.
    pub period: Duration,
    /// Wake the collector when a page rolls over into a new sub-array.
    ///
    /// Rolling over means a single thread has buffered a full sub-array of destructions since the
    /// last run, which is a decent proxy for memory pressure. Disabling this leaves the collector
    /// strictly periodic.
    pub wake_on_overflow: bool,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            period: Duration::from_millis(200),
            wake_on_overflow: true,
        }
    }
}

impl Settings {
    /// Preset for low memory, high CPU usage.
    ///
    /// Runs often, so destructions spend little time buffered.
    pub fn low_memory() -> Settings {
        Settings {
            period: Duration::from_millis(20),
            wake_on_overflow: true,
        }
    }

    /// Preset for high memory, low CPU usage.
    ///
    /// Runs rarely and ignores buffer pressure; destructions may sit in the pages for a while.
    pub fn low_cpu() -> Settings {
        Settings {
            period: Duration::from_millis(250),
            wake_on_overflow: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_period() {
        assert_eq!(Settings::default().period, Duration::from_millis(200));
        assert!(Settings::default().wake_on_overflow);
    }

    #[test]
    fn compare_presets() {
        let low_memory = Settings::low_memory();
        let low_cpu = Settings::low_cpu();

        assert!(low_memory.period < low_cpu.period);
        assert!(low_memory.wake_on_overflow);
        assert!(!low_cpu.wake_on_overflow);
    }
}
