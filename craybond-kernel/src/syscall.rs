//! Syscall dispatch.
//!
//! EL0 tasks enter through SVC; the exception stub has the full register
//! file in the frame by the time [`handle`] runs. The syscall number
//! travels in x8, arguments in x0-x2, and the handler returns through the
//! ordinary exception return.
//!
//! Pointer arguments from EL0 must lie inside the calling task's mapped
//! regions. A violation is logged and the call returns without side
//! effects; it is not a kernel fault.

use craybond_arch::exceptions::ExceptionContext;
use craybond_pal::console;

use crate::panic::panic_with_info;
use crate::sched::{self, Region};
use crate::fmt;

/// Formatted print: x0 = format string, x1 = argument array, x2 = count.
pub const SYSCALL_PRINT: u64 = 3;

/// Longest accepted format string.
const MAX_FORMAT_LEN: usize = 256;

/// Most arguments a single print may carry.
const MAX_PRINT_ARGS: usize = 16;

/// Dispatch one syscall. Unknown numbers are fatal under the current
/// policy.
pub fn handle(ctx: &mut ExceptionContext) {
    match ctx.gpr[8] {
        SYSCALL_PRINT => sys_print(ctx),
        unknown => panic_with_info("unknown syscall number", unknown),
    }
}

/// `PRINT`: render the caller's format string and write it to the
/// console.
fn sys_print(ctx: &mut ExceptionContext) {
    let fmt_ptr = ctx.gpr[0];
    let args_ptr = ctx.gpr[1];
    let arg_count = (ctx.gpr[2] as usize).min(MAX_PRINT_ARGS);

    let regions = sched::current_user_regions();

    let mut fmt_buf = [0u8; MAX_FORMAT_LEN];
    let Some(fmt_len) = copy_user_cstr(fmt_ptr, &regions, &mut fmt_buf) else {
        log::warn!(
            "syscall: task {} passed a format pointer {fmt_ptr:#x} outside its regions",
            sched::current_id()
        );
        return;
    };

    let mut args = [0u64; MAX_PRINT_ARGS];
    if arg_count > 0 {
        if !validate_user_range(args_ptr, (arg_count * 8) as u64, &regions) {
            log::warn!(
                "syscall: task {} passed an argument pointer {args_ptr:#x} outside its regions",
                sched::current_id()
            );
            return;
        }
        for (i, slot) in args[..arg_count].iter_mut().enumerate() {
            // SAFETY: The range was validated against the task's mapped
            // regions, which are identity-mapped kernel-readable memory.
            *slot = unsafe { ((args_ptr as *const u64).add(i)).read_volatile() };
        }
    }

    let mut out = [0u8; MAX_FORMAT_LEN];
    let rendered = fmt::format_into(&mut out, &fmt_buf[..fmt_len], &args[..arg_count]);
    console::puts(rendered);
    console::puts("\n");
}

/// Check `[ptr, ptr + len)` against the task's regions.
///
/// Kernel tasks have no recorded regions and are trusted; their pointers
/// are kernel addresses by construction.
fn validate_user_range(ptr: u64, len: u64, regions: &[Option<Region>; 3]) -> bool {
    let mut any_region = false;
    for region in regions.iter().flatten() {
        any_region = true;
        if region.contains(ptr, len) {
            return true;
        }
    }
    !any_region
}

/// Copy a NUL-terminated string out of task memory, validating each page
/// it touches. Returns the length, or `None` on a region violation or a
/// missing terminator within the size cap.
fn copy_user_cstr(
    ptr: u64,
    regions: &[Option<Region>; 3],
    out: &mut [u8],
) -> Option<usize> {
    for i in 0..out.len() {
        let addr = ptr + i as u64;
        if !validate_user_range(addr, 1, regions) {
            return None;
        }
        // SAFETY: Validated (or kernel-trusted) identity-mapped address.
        let byte = unsafe { (addr as *const u8).read_volatile() };
        if byte == 0 {
            return Some(i);
        }
        out[i] = byte;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_tasks_are_trusted() {
        let regions = [None, None, None];
        assert!(validate_user_range(0xFFFF_0000, 64, &regions));
    }

    #[test]
    fn user_pointers_must_fall_in_a_region() {
        let regions = [
            Some(Region {
                base: 0x5000_0000,
                size: 0x1000,
            }),
            Some(Region {
                base: 0x5001_0000,
                size: 0x2000,
            }),
            None,
        ];
        assert!(validate_user_range(0x5000_0000, 0x1000, &regions));
        assert!(validate_user_range(0x5001_1FF8, 8, &regions));
        assert!(!validate_user_range(0x5000_0FF9, 8, &regions));
        assert!(!validate_user_range(0x4000_0000, 1, &regions));
    }

    #[test]
    fn cstr_copy_respects_regions_and_terminator() {
        let backing = *b"P%i\0garbage";
        let base = backing.as_ptr() as u64;
        let regions = [
            Some(Region {
                base,
                size: backing.len() as u64,
            }),
            None,
            None,
        ];

        let mut out = [0u8; 16];
        let len = copy_user_cstr(base, &regions, &mut out).unwrap();
        assert_eq!(&out[..len], b"P%i");

        // A string whose terminator lies past the region is rejected.
        let tight = [
            Some(Region { base, size: 2 }),
            None,
            None,
        ];
        assert!(copy_user_cstr(base, &tight, &mut out).is_none());
    }
}
