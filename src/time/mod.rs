//! Tick counting, real-time conversion, and timed sleep.
//!
//! The timer chip (ARM Generic Timer, programmed once at boot) is the only
//! external time source the core consumes (§6). Everything else —
//! tick-denominated and real-time-denominated sleep, the global tick
//! counter, the time-slice-expiry check — lives here.

use portable_atomic::{AtomicU64, Ordering};

/// Timer interrupt frequency in Hz. Pintos runs at 100 Hz (10 ms ticks);
/// the spec constrains this to `[19, 1000]`.
pub const TIMER_FREQ: u32 = 100;

/// Ticks a thread may run before involuntary preemption is requested.
pub const TIME_SLICE: u32 = 4;

/// Nanoseconds since an arbitrary epoch (monotonic, architecture-defined).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(u64);

impl Instant {
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Read the current instant from the architecture's free-running counter.
    pub fn now() -> Self {
        #[cfg(target_arch = "aarch64")]
        {
            let cnt: u64;
            let freq: u64;
            unsafe {
                core::arch::asm!("mrs {}, cntpct_el0", out(reg) cnt, options(nostack, nomem, preserves_flags));
                core::arch::asm!("mrs {}, cntfrq_el0", out(reg) freq, options(nostack, nomem, preserves_flags));
            }
            let nanos = if freq > 0 {
                ((cnt as u128 * 1_000_000_000) / freq as u128) as u64
            } else {
                0
            };
            Self(nanos)
        }

        #[cfg(not(target_arch = "aarch64"))]
        {
            Self(0)
        }
    }

    pub fn duration_since(self, earlier: Instant) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Self;
    fn add(self, duration: Duration) -> Self {
        Self(self.0 + duration.as_nanos())
    }
}

/// A span of time, independent of any epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(u64);

impl Duration {
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }
    pub fn from_micros(micros: u64) -> Self {
        Self(micros * 1_000)
    }
    pub fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }
    pub fn as_nanos(self) -> u64 {
        self.0
    }
    pub fn as_micros(self) -> u64 {
        self.0 / 1_000
    }
    pub fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }
}

/// Global tick counter, wake-up scheduling, and loop-based sub-tick delay.
///
/// `loops_per_tick` stands in for the boot-time busy-wait calibration (§4.4):
/// a real boot binary determines it by binary search against the timer
/// chip; a hosted build fixes it to a nominal value since there is no
/// spinning CPU loop to calibrate.
pub struct TickCounter {
    ticks: AtomicU64,
    loops_per_tick: AtomicU64,
}

impl TickCounter {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            loops_per_tick: AtomicU64::new(1_000_000),
        }
    }

    /// Called once from the timer interrupt handler; returns the new tick
    /// count.
    pub fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn set_loops_per_tick(&self, loops: u64) {
        self.loops_per_tick.store(loops, Ordering::Release);
    }

    pub fn loops_per_tick(&self) -> u64 {
        self.loops_per_tick.load(Ordering::Acquire)
    }

    /// Busy-wait for approximately `loops` iterations, for sub-tick delays.
    fn busy_wait(loops: u64) {
        for _ in 0..loops {
            core::hint::spin_loop();
        }
    }

    /// Real-time sleep: converts to ticks when the result is at least one
    /// tick, otherwise busy-waits using `loops_per_tick`.
    pub fn sleep(&self, ns: u64) {
        let ticks = (ns * TIMER_FREQ as u64) / 1_000_000_000;
        if ticks >= 1 {
            crate::kernel::timer_sleep(ticks as i64);
        } else if ns > 0 {
            let loops = (self.loops_per_tick() * ns) / (1_000_000_000 / TIMER_FREQ as u64).max(1);
            Self::busy_wait(loops.max(1));
        }
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep for approximately `duration`. Convenience entry point over
/// [`crate::kernel::timer_sleep`] for callers working in real time rather
/// than raw ticks; sub-tick durations are rounded up to one tick rather
/// than busy-waited, since there is no shared calibrated loop counter at
/// the module level (see [`TickCounter::sleep`] for the calibrated form).
pub fn sleep(duration: Duration) {
    let ticks = (duration.as_nanos() * TIMER_FREQ as u64) / 1_000_000_000;
    if duration.as_nanos() > 0 {
        crate::kernel::timer_sleep(ticks.max(1) as i64);
    }
}

#[cfg(all(test, feature = "std-shim"))]
mod tests {
    use super::*;

    #[test]
    fn tick_counter_increments_monotonically() {
        let tc = TickCounter::new();
        assert_eq!(tc.ticks(), 0);
        assert_eq!(tc.tick(), 1);
        assert_eq!(tc.tick(), 2);
        assert_eq!(tc.ticks(), 2);
    }
}
