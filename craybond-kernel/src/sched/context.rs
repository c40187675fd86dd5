//! Cooperative yield.
//!
//! The restore routine only understands exception frames, so a voluntary
//! switch synthesises one: the live register file, a resume PC pointing
//! just past the yield, the current stack pointer as it will be after the
//! frame is gone, and an SPSR describing EL1h with the present DAIF
//! state. The frame then takes the same path a timer preemption takes.

#[cfg(target_arch = "aarch64")]
use craybond_arch::exceptions::restore_context;
use craybond_arch::exceptions::ExceptionContext;

/// Yield the CPU to the next READY task.
///
/// Returns immediately when nothing else is runnable. Interrupts are left
/// in whatever state the caller had them.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
pub extern "C" fn yield_now() {
    core::arch::naked_asm!(
        // Build an exception-style frame on our own stack.
        "sub sp, sp, #(36 * 8)",
        "stp x0, x1, [sp, #(0 * 16)]",
        "stp x2, x3, [sp, #(1 * 16)]",
        "stp x4, x5, [sp, #(2 * 16)]",
        "stp x6, x7, [sp, #(3 * 16)]",
        "stp x8, x9, [sp, #(4 * 16)]",
        "stp x10, x11, [sp, #(5 * 16)]",
        "stp x12, x13, [sp, #(6 * 16)]",
        "stp x14, x15, [sp, #(7 * 16)]",
        "stp x16, x17, [sp, #(8 * 16)]",
        "stp x18, x19, [sp, #(9 * 16)]",
        "stp x20, x21, [sp, #(10 * 16)]",
        "stp x22, x23, [sp, #(11 * 16)]",
        "stp x24, x25, [sp, #(12 * 16)]",
        "stp x26, x27, [sp, #(13 * 16)]",
        "stp x28, x29, [sp, #(14 * 16)]",
        "str x30, [sp, #(15 * 16)]",
        // Saved SP: the caller's, i.e. ours without the frame.
        "add x0, sp, #(36 * 8)",
        "str x0, [sp, #(31 * 8)]",
        // Resume PC: the label below.
        "adr x0, 2f",
        "str x0, [sp, #(32 * 8)]",
        // SPSR: EL1h with the caller's DAIF state.
        "mrs x0, daif",
        "orr x0, x0, #0x5",
        "str x0, [sp, #(33 * 8)]",
        // No syndrome on a voluntary switch.
        "stp xzr, xzr, [sp, #(34 * 8)]",
        "mov x0, sp",
        "bl craybond_yield_switch",
        // Nothing else was runnable: unwind our frame and return.
        "ldr x30, [sp, #(15 * 16)]",
        "add sp, sp, #(36 * 8)",
        "ret",
        // Resume point after a later restore of this frame: registers,
        // SP and x30 all come back from the frame, so just return.
        "2:",
        "ret",
    );
}

/// Host stand-in; the cooperative path only exists on the target.
#[cfg(not(target_arch = "aarch64"))]
pub extern "C" fn yield_now() {}

/// Rust side of the yield: switch the synthesised frame and, when a
/// different task was selected, restore it directly.
#[unsafe(no_mangle)]
extern "C" fn craybond_yield_switch(ctx: &mut ExceptionContext) {
    #[cfg(target_arch = "aarch64")]
    if super::context_switch(ctx) {
        // SAFETY: The frame holds either our own synthesised context or a
        // descriptor written by a spawn routine; both are resumable.
        unsafe { restore_context(ctx) }
    }
    #[cfg(not(target_arch = "aarch64"))]
    let _ = ctx;
}
