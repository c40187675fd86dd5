//! CPU control: barriers, low-power waits, DAIF masking, cache and TLB
//! maintenance.
//!
//! The IRQ mask helpers only touch DAIF bit 2 (the I bit). The kernel's
//! critical sections contend with IRQs and nothing else; FIQ, SError and
//! Debug stay in whatever state boot left them.
//!
//! Off-target (host test builds) the register helpers degrade to inert
//! stand-ins, the same approach `aarch64-cpu` takes for its own accessors.

#[cfg(target_arch = "aarch64")]
use core::arch::asm;

#[cfg(target_arch = "aarch64")]
use aarch64_cpu::registers::{CurrentEL, DAIF, MPIDR_EL1};
#[cfg(target_arch = "aarch64")]
use tock_registers::interfaces::{Readable, Writeable};

/// Get the current CPU ID (MPIDR_EL1 Aff0 field).
#[must_use]
pub fn cpu_id() -> usize {
    #[cfg(target_arch = "aarch64")]
    {
        (MPIDR_EL1.get() & 0xFF) as usize
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        0
    }
}

/// Get the current exception level.
#[must_use]
pub fn current_el() -> u8 {
    #[cfg(target_arch = "aarch64")]
    {
        ((CurrentEL.get() >> 2) & 0x3) as u8
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        1
    }
}

/// Halt the CPU forever.
#[inline]
pub fn halt() -> ! {
    loop {
        wait_for_interrupt();
    }
}

/// Wait for interrupt (WFI).
#[inline]
pub fn wait_for_interrupt() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: WFI is always safe to execute.
    unsafe {
        asm!("wfi", options(nomem, nostack));
    }
    #[cfg(not(target_arch = "aarch64"))]
    core::hint::spin_loop();
}

/// Data synchronization barrier, full system.
#[inline]
pub fn dsb_sy() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: Memory barriers are always safe.
    unsafe {
        asm!("dsb sy", options(nostack));
    }
}

/// Data synchronization barrier, inner shareable.
#[inline]
pub fn dsb_ish() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: Memory barriers are always safe.
    unsafe {
        asm!("dsb ish", options(nostack));
    }
}

/// Data memory barrier, full system.
#[inline]
pub fn dmb_sy() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: Memory barriers are always safe.
    unsafe {
        asm!("dmb sy", options(nostack));
    }
}

/// Instruction synchronization barrier.
#[inline]
pub fn isb() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: ISB is always safe.
    unsafe {
        asm!("isb", options(nostack));
    }
}

/// Enable IRQ delivery (clear DAIF.I), followed by an ISB.
///
/// Enabling when already enabled is a no-op.
#[inline]
pub fn irq_enable() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: Modifying DAIF is safe at EL1.
    unsafe {
        asm!("msr daifclr, #2", "isb", options(nomem, nostack));
    }
}

/// Disable IRQ delivery (set DAIF.I), followed by an ISB.
///
/// Disabling when already disabled is a no-op.
#[inline]
pub fn irq_disable() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: Modifying DAIF is safe at EL1.
    unsafe {
        asm!("msr daifset, #2", "isb", options(nomem, nostack));
    }
}

/// Disable IRQs and return the previous DAIF value for [`irq_restore`].
#[must_use]
#[inline]
pub fn irq_save_disable() -> u64 {
    #[cfg(target_arch = "aarch64")]
    {
        let daif = DAIF.get();
        irq_disable();
        daif
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        0
    }
}

/// Restore a DAIF value previously returned by [`irq_save_disable`].
#[inline]
pub fn irq_restore(daif: u64) {
    #[cfg(target_arch = "aarch64")]
    {
        DAIF.set(daif);
        isb();
    }
    #[cfg(not(target_arch = "aarch64"))]
    let _ = daif;
}

/// Check whether IRQ delivery is currently enabled.
#[must_use]
pub fn irqs_enabled() -> bool {
    #[cfg(target_arch = "aarch64")]
    {
        DAIF.get() & (1 << 7) == 0
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        true
    }
}

/// Invalidate the TLB: all EL1 entries, inner shareable, with the
/// surrounding barriers the architecture requires after a table update.
#[inline]
pub fn tlb_invalidate_all() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: TLB maintenance only affects cached translations.
    unsafe {
        asm!(
            "dsb ishst",
            "tlbi vmalle1is",
            "dsb ish",
            "isb",
            options(nostack, preserves_flags)
        );
    }
}

/// Invalidate the entire instruction cache to the point of unification.
///
/// Required after writing instructions that will be executed, e.g. after
/// relocating user code into a fresh page.
#[inline]
pub fn icache_invalidate_all() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: Cache maintenance is always safe at EL1.
    unsafe {
        asm!("ic iallu", "dsb sy", "isb", options(nostack));
    }
}

#[cfg(test)]
mod tests {
    // The IRQ helpers compile to inert stand-ins off-target; these tests pin
    // that contract so test code above this crate can call them freely.
    use super::*;

    #[test]
    fn irq_toggle_is_idempotent_off_target() {
        irq_disable();
        irq_disable();
        irq_enable();
        irq_enable();
        assert!(irqs_enabled());
    }

    #[test]
    fn save_restore_round_trip() {
        let saved = irq_save_disable();
        irq_restore(saved);
    }
}
