//! System register access and syndrome decoding.
//!
//! Raw `u64` accessors for the registers the kernel programs directly,
//! backed by `aarch64-cpu`/`tock-registers`, plus field decoding for
//! ESR_EL1 and SPSR_EL1 used by the fault path and the scheduler.

#[cfg(target_arch = "aarch64")]
use aarch64_cpu::registers::{
    ELR_EL1, ESR_EL1, FAR_EL1, MAIR_EL1, SCTLR_EL1, SPSR_EL1, TCR_EL1, TTBR0_EL1, VBAR_EL1,
};
#[cfg(target_arch = "aarch64")]
use tock_registers::interfaces::{Readable, Writeable};

macro_rules! sysreg_accessors {
    ($(#[$doc:meta] $read:ident, $write:ident, $reg:ident;)*) => {
        $(
            #[$doc]
            #[must_use]
            #[inline]
            pub fn $read() -> u64 {
                #[cfg(target_arch = "aarch64")]
                {
                    $reg.get()
                }
                #[cfg(not(target_arch = "aarch64"))]
                {
                    0
                }
            }

            #[inline]
            pub fn $write(value: u64) {
                #[cfg(target_arch = "aarch64")]
                $reg.set(value);
                #[cfg(not(target_arch = "aarch64"))]
                let _ = value;
            }
        )*
    };
}

sysreg_accessors! {
    /// VBAR_EL1 — exception vector base.
    read_vbar_el1, write_vbar_el1, VBAR_EL1;
    /// MAIR_EL1 — memory attribute indirection.
    read_mair_el1, write_mair_el1, MAIR_EL1;
    /// TCR_EL1 — translation control.
    read_tcr_el1, write_tcr_el1, TCR_EL1;
    /// TTBR0_EL1 — translation table base 0.
    read_ttbr0_el1, write_ttbr0_el1, TTBR0_EL1;
    /// SCTLR_EL1 — system control.
    read_sctlr_el1, write_sctlr_el1, SCTLR_EL1;
    /// SPSR_EL1 — saved program status.
    read_spsr_el1, write_spsr_el1, SPSR_EL1;
    /// ELR_EL1 — exception link register.
    read_elr_el1, write_elr_el1, ELR_EL1;
}

/// Read ESR_EL1 (exception syndrome).
#[must_use]
#[inline]
pub fn read_esr_el1() -> u64 {
    #[cfg(target_arch = "aarch64")]
    {
        ESR_EL1.get()
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        0
    }
}

/// Read FAR_EL1 (fault address).
#[must_use]
#[inline]
pub fn read_far_el1() -> u64 {
    #[cfg(target_arch = "aarch64")]
    {
        FAR_EL1.get()
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        0
    }
}

/// Exception Syndrome Register field decoding.
pub mod esr {
    /// Exception class (EC), bits [31:26].
    #[inline]
    pub const fn exception_class(esr: u64) -> u8 {
        ((esr >> 26) & 0x3F) as u8
    }

    /// Instruction-specific syndrome (ISS), bits [24:0].
    #[inline]
    pub const fn iss(esr: u64) -> u32 {
        (esr & 0x1FF_FFFF) as u32
    }

    /// Exception class values the kernel distinguishes.
    pub mod ec {
        pub const UNKNOWN: u8 = 0b000000;
        pub const SVC_AARCH64: u8 = 0b010101;
        pub const INSTRUCTION_ABORT_LOWER: u8 = 0b100000;
        pub const INSTRUCTION_ABORT_SAME: u8 = 0b100001;
        pub const PC_ALIGNMENT: u8 = 0b100010;
        pub const DATA_ABORT_LOWER: u8 = 0b100100;
        pub const DATA_ABORT_SAME: u8 = 0b100101;
        pub const SP_ALIGNMENT: u8 = 0b100110;
        pub const SERROR: u8 = 0b101111;
        pub const BRK_AARCH64: u8 = 0b111100;
    }

    /// Human-readable name for an exception class.
    pub fn ec_name(ec_value: u8) -> &'static str {
        match ec_value {
            ec::UNKNOWN => "Unknown/undefined instruction",
            ec::SVC_AARCH64 => "SVC (AArch64)",
            ec::INSTRUCTION_ABORT_LOWER => "Instruction abort (lower EL)",
            ec::INSTRUCTION_ABORT_SAME => "Instruction abort (same EL)",
            ec::PC_ALIGNMENT => "PC alignment fault",
            ec::DATA_ABORT_LOWER => "Data abort (lower EL)",
            ec::DATA_ABORT_SAME => "Data abort (same EL)",
            ec::SP_ALIGNMENT => "SP alignment fault",
            ec::SERROR => "SError",
            ec::BRK_AARCH64 => "BRK (AArch64)",
            _ => "Reserved/Unknown",
        }
    }
}

/// Saved Program Status Register field decoding.
pub mod spsr {
    /// SPSR value for a kernel task: EL1h with DAIF masked.
    pub const EL1H_MASKED: u64 = 0x3C5;

    /// SPSR value for a user task: EL0t with interrupts enabled.
    pub const EL0T: u64 = 0x0;

    /// Exception level from M[3:2].
    #[inline]
    pub const fn exception_level(spsr: u64) -> u8 {
        ((spsr >> 2) & 0x3) as u8
    }

    /// Stack pointer selection from M[0]: true means SP_ELx.
    #[inline]
    pub const fn sp_sel(spsr: u64) -> bool {
        spsr & 1 != 0
    }

    /// True when the status word describes EL0 execution.
    #[inline]
    pub const fn is_el0(spsr: u64) -> bool {
        spsr & 0x0F == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esr_fields_decode() {
        // EC=SVC_AARCH64 (0b010101), ISS=3 (the svc immediate)
        let esr = (0b010101u64 << 26) | 3;
        assert_eq!(esr::exception_class(esr), esr::ec::SVC_AARCH64);
        assert_eq!(esr::iss(esr), 3);
        assert_eq!(esr::ec_name(esr::ec::SVC_AARCH64), "SVC (AArch64)");
    }

    #[test]
    fn spsr_levels_decode() {
        assert!(spsr::is_el0(spsr::EL0T));
        assert!(!spsr::is_el0(spsr::EL1H_MASKED));
        assert_eq!(spsr::exception_level(spsr::EL1H_MASKED), 1);
        assert!(spsr::sp_sel(spsr::EL1H_MASKED));
        assert!(!spsr::sp_sel(spsr::EL0T));
    }
}
