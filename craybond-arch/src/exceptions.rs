//! Exception vectors and saved context.
//!
//! The vector table has 16 entries of 128 bytes each, 2 KiB aligned. Every
//! used entry saves the full interrupted register file into an
//! [`ExceptionContext`] on the stack, then tail-calls a continuation that
//! invokes the registered Rust handler and restores the (possibly rewritten)
//! context with `eret`.
//!
//! Handlers receive `&mut ExceptionContext`. The scheduler switches tasks by
//! copying the frame into the outgoing task descriptor and the incoming
//! descriptor into the frame; the restore path honours whatever the frame
//! says, including a different stack pointer and target exception level.

use core::sync::atomic::{AtomicPtr, Ordering};

use crate::registers::{esr, spsr, write_vbar_el1};

/// Saved register file of an interrupted context.
///
/// Layout is load-bearing: the assembly stubs store and load fields by
/// offset. `gpr` at 0, `sp` at 248, `elr` at 256, `spsr` at 264, `esr` at
/// 272, `far` at 280; 288 bytes total.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct ExceptionContext {
    /// General-purpose registers x0-x30.
    pub gpr: [u64; 31],
    /// Stack pointer of the interrupted context: SP_EL0 when the exception
    /// came from EL0, the pre-exception SP_EL1 otherwise.
    pub sp: u64,
    /// Exception link register (resume address).
    pub elr: u64,
    /// Saved program status.
    pub spsr: u64,
    /// Exception syndrome.
    pub esr: u64,
    /// Fault address.
    pub far: u64,
}

const _: () = assert!(core::mem::size_of::<ExceptionContext>() == 36 * 8);

impl ExceptionContext {
    /// A zeroed context. PC, SP and SPSR are filled in by the spawner.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            gpr: [0; 31],
            sp: 0,
            elr: 0,
            spsr: 0,
            esr: 0,
            far: 0,
        }
    }

    /// Exception class from the saved syndrome.
    #[must_use]
    pub fn exception_class(&self) -> u8 {
        esr::exception_class(self.esr)
    }

    /// True when the exception was taken from EL0.
    #[must_use]
    pub fn from_el0(&self) -> bool {
        spsr::is_el0(self.spsr)
    }
}

/// Exception handler function type.
pub type ExceptionHandler = fn(&mut ExceptionContext);

static SYNC_HANDLER: AtomicPtr<()> = AtomicPtr::new(default_handler as *mut ());
static IRQ_HANDLER: AtomicPtr<()> = AtomicPtr::new(default_handler as *mut ());
static FIQ_HANDLER: AtomicPtr<()> = AtomicPtr::new(default_handler as *mut ());
static SERROR_HANDLER: AtomicPtr<()> = AtomicPtr::new(default_handler as *mut ());

/// Install the synchronous exception handler.
pub fn set_sync_handler(handler: ExceptionHandler) {
    SYNC_HANDLER.store(handler as *mut (), Ordering::Release);
}

/// Install the IRQ handler.
pub fn set_irq_handler(handler: ExceptionHandler) {
    IRQ_HANDLER.store(handler as *mut (), Ordering::Release);
}

/// Install the FIQ handler.
pub fn set_fiq_handler(handler: ExceptionHandler) {
    FIQ_HANDLER.store(handler as *mut (), Ordering::Release);
}

/// Install the SError handler.
pub fn set_serror_handler(handler: ExceptionHandler) {
    SERROR_HANDLER.store(handler as *mut (), Ordering::Release);
}

/// Load a handler pointer stored by one of the setters.
#[inline]
fn load_handler(slot: &AtomicPtr<()>) -> ExceptionHandler {
    let ptr = slot.load(Ordering::Acquire);
    // SAFETY: Only valid `ExceptionHandler` pointers are ever stored.
    unsafe { core::mem::transmute(ptr) }
}

fn default_handler(ctx: &mut ExceptionContext) {
    panic!(
        "exception before handler installation: EC={:#x} ELR={:#x} ESR={:#x}",
        ctx.exception_class(),
        ctx.elr,
        ctx.esr
    );
}

#[unsafe(no_mangle)]
extern "C" fn craybond_handle_sync(ctx: &mut ExceptionContext) {
    load_handler(&SYNC_HANDLER)(ctx);
}

#[unsafe(no_mangle)]
extern "C" fn craybond_handle_irq(ctx: &mut ExceptionContext) {
    load_handler(&IRQ_HANDLER)(ctx);
}

#[unsafe(no_mangle)]
extern "C" fn craybond_handle_fiq(ctx: &mut ExceptionContext) {
    load_handler(&FIQ_HANDLER)(ctx);
}

#[unsafe(no_mangle)]
extern "C" fn craybond_handle_serror(ctx: &mut ExceptionContext) {
    load_handler(&SERROR_HANDLER)(ctx);
}

#[cfg(target_arch = "aarch64")]
mod vectors {
    //! The assembly side: save stub, restore continuation, vector table.

    /// Save stub, 28 instructions, fits the 128-byte vector slot.
    ///
    /// Builds an `ExceptionContext` on the stack. The saved `sp` is SP_EL0
    /// for exceptions from EL0/EL1t and the pre-exception SP_EL1 for EL1h,
    /// selected on SPSR_EL1.M[0].
    macro_rules! exception_stub {
        ($continuation:ident) => {
            concat!(
                "sub sp, sp, #(36 * 8)\n",
                "stp x0, x1, [sp, #(0 * 16)]\n",
                "stp x2, x3, [sp, #(1 * 16)]\n",
                "stp x4, x5, [sp, #(2 * 16)]\n",
                "stp x6, x7, [sp, #(3 * 16)]\n",
                "stp x8, x9, [sp, #(4 * 16)]\n",
                "stp x10, x11, [sp, #(5 * 16)]\n",
                "stp x12, x13, [sp, #(6 * 16)]\n",
                "stp x14, x15, [sp, #(7 * 16)]\n",
                "stp x16, x17, [sp, #(8 * 16)]\n",
                "stp x18, x19, [sp, #(9 * 16)]\n",
                "stp x20, x21, [sp, #(10 * 16)]\n",
                "stp x22, x23, [sp, #(11 * 16)]\n",
                "stp x24, x25, [sp, #(12 * 16)]\n",
                "stp x26, x27, [sp, #(13 * 16)]\n",
                "stp x28, x29, [sp, #(14 * 16)]\n",
                "str x30, [sp, #(15 * 16)]\n",
                "mrs x0, sp_el0\n",
                "mrs x1, elr_el1\n",
                "mrs x2, spsr_el1\n",
                "mrs x3, esr_el1\n",
                "mrs x4, far_el1\n",
                // From EL1h the interrupted SP is this stack, pre-frame.
                "tbz x2, #0, 1f\n",
                "add x0, sp, #(36 * 8)\n",
                "1:\n",
                "stp x0, x1, [sp, #(31 * 8)]\n",
                "stp x2, x3, [sp, #(33 * 8)]\n",
                "str x4, [sp, #(35 * 8)]\n",
                "b ", stringify!($continuation), "\n",
            )
        };
    }

    /// Continuation: call the Rust handler with the frame, then restore
    /// whatever context the frame now holds and `eret`.
    macro_rules! exception_continuation {
        ($handler:ident) => {
            concat!(
                "mov x0, sp\n",
                "bl ", stringify!($handler), "\n",
                "b craybond_restore_context_sp\n",
            )
        };
    }

    /// Restore an [`super::ExceptionContext`] whose address is the current
    /// SP and `eret` into it. Shared by the exception return path and the
    /// first-dispatch/context-switch paths (which point SP at a frame and
    /// branch here).
    ///
    /// For a target running on SP_EL0 (user tasks) the frame is popped and
    /// SP_EL0 is loaded from the frame; for an EL1h target the frame's
    /// saved SP becomes SP_EL1 directly.
    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    unsafe extern "C" fn craybond_restore_context_sp() {
        core::arch::naked_asm!(
            "mov x3, sp",
            "ldp x0, x1, [x3, #(31 * 8)]",
            "ldr x2, [x3, #(33 * 8)]",
            "msr elr_el1, x1",
            "msr spsr_el1, x2",
            "tbnz x2, #0, 1f",
            "msr sp_el0, x0",
            "add sp, sp, #(36 * 8)",
            "b 2f",
            "1:",
            "mov sp, x0",
            "2:",
            "ldp x4, x5, [x3, #(2 * 16)]",
            "ldp x6, x7, [x3, #(3 * 16)]",
            "ldp x8, x9, [x3, #(4 * 16)]",
            "ldp x10, x11, [x3, #(5 * 16)]",
            "ldp x12, x13, [x3, #(6 * 16)]",
            "ldp x14, x15, [x3, #(7 * 16)]",
            "ldp x16, x17, [x3, #(8 * 16)]",
            "ldp x18, x19, [x3, #(9 * 16)]",
            "ldp x20, x21, [x3, #(10 * 16)]",
            "ldp x22, x23, [x3, #(11 * 16)]",
            "ldp x24, x25, [x3, #(12 * 16)]",
            "ldp x26, x27, [x3, #(13 * 16)]",
            "ldp x28, x29, [x3, #(14 * 16)]",
            "ldr x30, [x3, #(15 * 16)]",
            "ldp x0, x1, [x3, #(0 * 16)]",
            "ldp x2, x3, [x3, #(1 * 16)]",
            "eret",
        );
    }

    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    unsafe extern "C" fn __craybond_sync_cont() {
        core::arch::naked_asm!(exception_continuation!(craybond_handle_sync));
    }

    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    unsafe extern "C" fn __craybond_irq_cont() {
        core::arch::naked_asm!(exception_continuation!(craybond_handle_irq));
    }

    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    unsafe extern "C" fn __craybond_fiq_cont() {
        core::arch::naked_asm!(exception_continuation!(craybond_handle_fiq));
    }

    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    unsafe extern "C" fn __craybond_serror_cont() {
        core::arch::naked_asm!(exception_continuation!(craybond_handle_serror));
    }

    /// The exception vector table: 4 origins x 4 types, 128 bytes each.
    ///
    /// Current-EL-with-SP_EL0 and lower-EL-AArch32 origins are not used and
    /// hang in place if ever reached.
    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    #[unsafe(link_section = ".vectors")]
    pub unsafe extern "C" fn craybond_exception_vectors() {
        core::arch::naked_asm!(
            ".balign 2048",
            // Current EL with SP_EL0 - unused
            ".balign 128", "b .",
            ".balign 128", "b .",
            ".balign 128", "b .",
            ".balign 128", "b .",
            // Current EL with SP_ELx (kernel)
            ".balign 128", exception_stub!(__craybond_sync_cont),
            ".balign 128", exception_stub!(__craybond_irq_cont),
            ".balign 128", exception_stub!(__craybond_fiq_cont),
            ".balign 128", exception_stub!(__craybond_serror_cont),
            // Lower EL, AArch64 (user)
            ".balign 128", exception_stub!(__craybond_sync_cont),
            ".balign 128", exception_stub!(__craybond_irq_cont),
            ".balign 128", exception_stub!(__craybond_fiq_cont),
            ".balign 128", exception_stub!(__craybond_serror_cont),
            // Lower EL, AArch32 - unsupported
            ".balign 128", "b .",
            ".balign 128", "b .",
            ".balign 128", "b .",
            ".balign 128", "b .",
        );
    }
}

/// Install the vector table into VBAR_EL1.
pub fn init() {
    #[cfg(target_arch = "aarch64")]
    write_vbar_el1(vectors::craybond_exception_vectors as *const () as u64);
    #[cfg(not(target_arch = "aarch64"))]
    write_vbar_el1(0);
}

/// Restore `ctx` and resume it via exception return. Never returns.
///
/// Used for first dispatch into a task and for the cooperative switch path;
/// the IRQ path reaches the same restore code by falling out of its
/// continuation.
///
/// # Safety
///
/// `ctx` must describe a resumable context: valid PC, valid stack for the
/// target exception level, and an SPSR whose M field is EL0t or EL1h.
#[cfg(target_arch = "aarch64")]
pub unsafe fn restore_context(ctx: &ExceptionContext) -> ! {
    // SAFETY: Pointing SP at the frame and branching to the shared restore
    // routine is exactly the layout it expects; caller guarantees the frame
    // content is resumable.
    unsafe {
        core::arch::asm!(
            "mov sp, {frame}",
            "b craybond_restore_context_sp",
            frame = in(reg) ctx,
            options(noreturn)
        );
    }
}

/// Off-target stand-in so callers type-check in host builds.
#[cfg(not(target_arch = "aarch64"))]
pub unsafe fn restore_context(_ctx: &ExceptionContext) -> ! {
    unimplemented!("context restore is only meaningful on AArch64");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_layout_matches_stub_offsets() {
        use core::mem::offset_of;
        assert_eq!(offset_of!(ExceptionContext, gpr), 0);
        assert_eq!(offset_of!(ExceptionContext, sp), 31 * 8);
        assert_eq!(offset_of!(ExceptionContext, elr), 32 * 8);
        assert_eq!(offset_of!(ExceptionContext, spsr), 33 * 8);
        assert_eq!(offset_of!(ExceptionContext, esr), 34 * 8);
        assert_eq!(offset_of!(ExceptionContext, far), 35 * 8);
    }

    #[test]
    fn origin_decodes_from_spsr() {
        let mut ctx = ExceptionContext::zeroed();
        ctx.spsr = crate::registers::spsr::EL0T;
        assert!(ctx.from_el0());
        ctx.spsr = crate::registers::spsr::EL1H_MASKED;
        assert!(!ctx.from_el0());
    }

    #[test]
    fn handler_registration_replaces_default() {
        fn h(_: &mut ExceptionContext) {}
        set_irq_handler(h);
        // Re-install the default so other tests see a clean slate.
        set_irq_handler(|ctx| default_handler(ctx));
    }
}
