//! EL1 physical timer.
//!
//! Programs the CNTP timer for a periodic tick: read the counter
//! frequency, compute `ticks = freq * ms / 1000`, load the timer value
//! register and enable the timer. The IRQ handler calls [`reset`] to
//! rearm the same interval.

use core::sync::atomic::{AtomicU64, Ordering};

#[cfg(target_arch = "aarch64")]
use aarch64_cpu::registers::{CNTFRQ_EL0, CNTP_CTL_EL0, CNTP_TVAL_EL0, CNTPCT_EL0};
#[cfg(target_arch = "aarch64")]
use tock_registers::interfaces::{Readable, Writeable};

/// Tick interval in milliseconds, stored for [`reset`].
static INTERVAL_MS: AtomicU64 = AtomicU64::new(0);

/// Read the counter frequency register.
#[must_use]
pub fn frequency() -> u64 {
    #[cfg(target_arch = "aarch64")]
    {
        CNTFRQ_EL0.get()
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        62_500_000
    }
}

/// Read the physical counter.
#[must_use]
pub fn counter() -> u64 {
    #[cfg(target_arch = "aarch64")]
    {
        CNTPCT_EL0.get()
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        0
    }
}

/// Milliseconds since boot, for log timestamps.
#[must_use]
pub fn now_ms() -> u64 {
    let freq = frequency();
    if freq == 0 {
        return 0;
    }
    let count = counter();
    (count / freq) * 1000 + ((count % freq) * 1000) / freq
}

/// Compute the tick count for an interval, splitting the multiply to
/// avoid overflow on large frequencies.
#[must_use]
pub fn interval_ticks(freq: u64, ms: u64) -> u64 {
    (freq / 1000) * ms + ((freq % 1000) * ms) / 1000
}

/// Reload the timer-value register with the configured interval.
pub fn reset() {
    let ms = INTERVAL_MS.load(Ordering::Relaxed);
    let ticks = interval_ticks(frequency(), ms);
    #[cfg(target_arch = "aarch64")]
    CNTP_TVAL_EL0.set(ticks);
    #[cfg(not(target_arch = "aarch64"))]
    let _ = ticks;
}

/// Enable the physical timer and grant EL0 access to the counter
/// registers.
fn enable() {
    #[cfg(target_arch = "aarch64")]
    {
        CNTP_CTL_EL0.set(1);
        // CNTKCTL_EL1.EL0PCTEN: EL0 may read the physical counter.
        // SAFETY: Writing CNTKCTL_EL1 is permitted at EL1.
        unsafe {
            core::arch::asm!("msr cntkctl_el1, {}", in(reg) 1u64, options(nomem, nostack));
        }
    }
}

/// Program a periodic tick of `ms` milliseconds and start the timer.
pub fn init(ms: u64) {
    INTERVAL_MS.store(ms, Ordering::Relaxed);
    reset();
    enable();
    log::info!("timer: {ms} ms tick, counter frequency {} Hz", frequency());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_math_matches_the_direct_formula() {
        // 62.5 MHz, the virt board's counter frequency.
        assert_eq!(interval_ticks(62_500_000, 10), 625_000);
        assert_eq!(interval_ticks(62_500_000, 1000), 62_500_000);
        // Odd frequency exercises the remainder term.
        assert_eq!(interval_ticks(19_200_001, 1000), 19_200_001);
        assert_eq!(interval_ticks(19_200_001, 10), 192_000);
    }

    #[test]
    fn zero_interval_is_zero_ticks() {
        assert_eq!(interval_ticks(62_500_000, 0), 0);
    }
}
