//! GICv2 interrupt controller driver.
//!
//! Distributor and CPU interface are driven directly through their
//! register windows. Initialisation follows a fixed order: both blocks
//! disabled, per-INTID configuration written, priority mask set, then the
//! CPU interface and distributor re-enabled in that order.
//!
//! Dispatch policy: acknowledged INTIDs with no registered handler are
//! logged at `warn` and completed anyway, so a stray SPI cannot wedge the
//! CPU interface. Spurious INTIDs (>= 1020) are dropped without EOI.

use craybond_arch::IrqSpinMutex;
use craybond_mmio::MmioRegion;
use spin::Once;

use crate::board;

// Distributor registers.
const GICD_CTLR: usize = 0x000;
const GICD_ISENABLER: usize = 0x100;
const GICD_ICENABLER: usize = 0x180;
const GICD_IPRIORITYR: usize = 0x400;
const GICD_ITARGETSR: usize = 0x800;

// CPU interface registers.
const GICC_CTLR: usize = 0x000;
const GICC_PMR: usize = 0x004;
const GICC_IAR: usize = 0x00C;
const GICC_EOIR: usize = 0x010;

/// Priority mask: interrupts with priority below 0xF0 are delivered.
const PRIORITY_MASK: u32 = 0xF0;

/// INTIDs 1020-1023 are spurious/reserved.
const SPURIOUS_INTID: u32 = 1020;

/// Highest INTID the handler table covers (SGIs + PPIs + 96 SPIs).
const MAX_HANDLERS: usize = 128;

/// Interrupt handler function type.
pub type IrqHandler = fn(intid: u32);

static IRQ_HANDLERS: IrqSpinMutex<[Option<IrqHandler>; MAX_HANDLERS]> =
    IrqSpinMutex::new([None; MAX_HANDLERS]);

struct Gic {
    gicd: MmioRegion,
    gicc: MmioRegion,
}

static GIC: Once<Gic> = Once::new();

fn gic() -> &'static Gic {
    GIC.get().expect("GIC not initialised")
}

/// Initialise the GIC and route `intid` to CPU 0 at priority 0.
///
/// # Safety
///
/// Must be called exactly once, before IRQs are unmasked.
pub unsafe fn init(intid: u32) {
    let gic = GIC.call_once(|| Gic {
        // SAFETY: Fixed device windows on this platform; init is the only
        // writer until the Once is populated.
        gicd: unsafe { MmioRegion::new(board::GICD_BASE, board::GICD_SIZE) },
        gicc: unsafe { MmioRegion::new(board::GICC_BASE, board::GICC_SIZE) },
    });

    // Quiesce both blocks before touching configuration.
    gic.gicd.write32(GICD_CTLR, 0);
    gic.gicc.write32(GICC_CTLR, 0);

    enable_irq(intid);
    set_target_cpu0(intid);
    set_priority(intid, 0);

    gic.gicc.write32(GICC_PMR, PRIORITY_MASK);

    // CPU interface first, then the distributor.
    gic.gicc.write32(GICC_CTLR, 1);
    gic.gicd.write32(GICD_CTLR, 1);

    log::info!("gic: initialised, INTID {intid} routed to cpu0");
}

/// Set the enable bit for `intid` in the distributor.
pub fn enable_irq(intid: u32) {
    let gic = gic();
    let offset = GICD_ISENABLER + (intid as usize / 32) * 4;
    gic.gicd.write32(offset, 1 << (intid % 32));
}

/// Clear the enable bit for `intid` in the distributor.
pub fn disable_irq(intid: u32) {
    let gic = gic();
    let offset = GICD_ICENABLER + (intid as usize / 32) * 4;
    gic.gicd.write32(offset, 1 << (intid % 32));
}

/// Route `intid` to CPU 0 via its processor-target byte.
fn set_target_cpu0(intid: u32) {
    let gic = gic();
    let offset = GICD_ITARGETSR + (intid as usize / 4) * 4;
    gic.gicd
        .write32(offset, 1 << ((intid % 4) * 8));
}

/// Set the priority byte for `intid` (0 = highest).
pub fn set_priority(intid: u32, priority: u8) {
    let gic = gic();
    let offset = GICD_IPRIORITYR + (intid as usize / 4) * 4;
    let shift = (intid % 4) * 8;
    gic.gicd.modify32(offset, |v| {
        (v & !(0xFF << shift)) | (u32::from(priority) << shift)
    });
}

/// Register a handler for `intid`.
///
/// # Panics
///
/// Panics if `intid` exceeds the handler table.
pub fn register_handler(intid: u32, handler: IrqHandler) {
    assert!(
        (intid as usize) < MAX_HANDLERS,
        "INTID {intid} exceeds handler table"
    );
    IRQ_HANDLERS.lock()[intid as usize] = Some(handler);
}

/// Acknowledge, dispatch and complete one pending interrupt.
///
/// Called from the IRQ exception handler.
pub fn dispatch_irq() {
    let gic = gic();

    let intid = gic.gicc.read32(GICC_IAR) & 0x3FF;
    if intid >= SPURIOUS_INTID {
        return;
    }

    let handler = {
        let handlers = IRQ_HANDLERS.lock();
        handlers.get(intid as usize).and_then(|h| *h)
    };

    match handler {
        Some(handler) => handler(intid),
        None => log::warn!("gic: unhandled IRQ {intid}, acknowledged and ignored"),
    }

    gic.gicc.write32(GICC_EOIR, intid);
}
