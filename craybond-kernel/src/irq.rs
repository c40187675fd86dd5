//! Exception and interrupt wiring.
//!
//! Installs the vector table and the four top-level handlers. Synchronous
//! EL0 entries are syscalls; everything else synchronous, FIQ and SError
//! are fatal. IRQs go to the GIC dispatcher, and a pending reschedule is
//! honoured on the way out by rewriting the exception frame.

use craybond_arch::exceptions::{self, ExceptionContext};
use craybond_arch::registers::esr;
use craybond_pal::{board, gic, timer};

use crate::{panic, sched, syscall};

/// Install vectors and handlers. Called once, before the GIC is enabled.
pub fn init() {
    exceptions::set_sync_handler(sync_handler);
    exceptions::set_irq_handler(irq_handler);
    exceptions::set_fiq_handler(fiq_handler);
    exceptions::set_serror_handler(serror_handler);
    exceptions::init();

    gic::register_handler(board::TIMER_INTID, timer_irq);
    log::info!("irq: vectors installed");
}

/// Timer tick: rearm the interval and ask for a reschedule.
fn timer_irq(_intid: u32) {
    timer::reset();
    sched::request_reschedule();
}

fn irq_handler(ctx: &mut ExceptionContext) {
    gic::dispatch_irq();
    if sched::take_reschedule() {
        // The stub already saved the interrupted register file into the
        // frame; switching means rewriting the frame before the eret.
        let _ = sched::context_switch(ctx);
    }
}

fn sync_handler(ctx: &mut ExceptionContext) {
    if ctx.from_el0() && ctx.exception_class() == esr::ec::SVC_AARCH64 {
        syscall::handle(ctx);
        return;
    }
    panic::fatal_exception("SYNC EXCEPTION")
}

fn fiq_handler(_ctx: &mut ExceptionContext) {
    panic::fatal_exception("FIQ EXCEPTION")
}

fn serror_handler(_ctx: &mut ExceptionContext) {
    panic::fatal_exception("ERROR EXCEPTION")
}
