//! User task loading.
//!
//! A user task arrives as a code segment somewhere in the kernel image
//! plus an optional data segment. Spawning copies the data verbatim into
//! a fresh EL0 region, copies the code into another while relocating its
//! PC-relative instructions, builds a descending stack, and enters the
//! task into the process table at EL0 with interrupts enabled.

pub mod reloc;

use craybond_paging::AccessLevel;

use crate::memory::{self, mmu};
use crate::sched::{self, Region};
use craybond_arch::registers::spsr;

use reloc::{RelocLayout, relocate_code};

/// User task stack size.
const USER_STACK_SIZE: u64 = 0x1000;

/// Spawn a user task.
///
/// * `entry` - entry point inside the original code segment,
/// * `code_base`/`code_size` - the original code segment,
/// * `data_base`/`data_size` - the data segment the code addresses via
///   `adrp` (zero size when absent).
///
/// Returns the task id, or `None` when the process table is full.
pub fn spawn(
    entry: u64,
    code_base: u64,
    code_size: u64,
    data_base: u64,
    data_size: u64,
) -> Option<usize> {
    let code_pages = code_size.div_ceil(0x1000).max(1);
    let data_pages = data_size.div_ceil(0x1000);

    // Data first: the relocator needs its destination to aim adrp at.
    let dst_data = if data_pages > 0 {
        let dst = memory::user_pages_alloc(data_pages);
        mmu::map_task_pages(dst, data_pages, AccessLevel::El0, false);
        // SAFETY: Source is kernel-image memory, destination is freshly
        // mapped and exclusively ours.
        unsafe {
            core::ptr::copy_nonoverlapping(
                data_base as *const u8,
                dst as *mut u8,
                data_size as usize,
            );
        }
        dst
    } else {
        0
    };

    let dst_code = memory::user_pages_alloc(code_pages);
    mmu::map_task_pages(dst_code, code_pages, AccessLevel::El0, false);

    let layout = RelocLayout {
        src_code: code_base,
        dst_code,
        code_size,
        src_data: data_base,
        dst_data,
        data_size,
    };
    // SAFETY: Code segments are whole words; both slices are live for
    // the copy.
    let (src, dst) = unsafe {
        (
            core::slice::from_raw_parts(code_base as *const u32, (code_size / 4) as usize),
            core::slice::from_raw_parts_mut(dst_code as *mut u32, (code_size / 4) as usize),
        )
    };
    let summary = relocate_code(src, dst, &layout, |note| {
        log::warn!(
            "loader: unsupported adrp at word {} ({:#010x}) targeting {:#x}, left untouched",
            note.index,
            note.insn,
            note.target
        );
    });
    // The destination pages now hold instructions.
    mmu::maintain_after_update(true);

    let stack_base = memory::user_pages_alloc(USER_STACK_SIZE / 0x1000);
    mmu::map_task_pages(stack_base, USER_STACK_SIZE / 0x1000, AccessLevel::El0, false);

    let id = sched::spawn_with(|id, task| {
        task.ctx = craybond_arch::exceptions::ExceptionContext::zeroed();
        task.ctx.elr = dst_code + (entry - code_base);
        task.ctx.sp = stack_base + USER_STACK_SIZE;
        task.ctx.spsr = spsr::EL0T;
        task.user_code = Some(Region {
            base: dst_code,
            size: code_pages * 0x1000,
        });
        task.user_data = (data_pages > 0).then_some(Region {
            base: dst_data,
            size: data_pages * 0x1000,
        });
        task.user_stack = Some(Region {
            base: stack_base,
            size: USER_STACK_SIZE,
        });
        let _ = id;
    })?;

    log::info!(
        "loader: user task {id}, code {dst_code:#x} (+{} branches, +{} adrp, {} unsupported), stack {stack_base:#x}",
        summary.branches_retargeted,
        summary.adrp_retargeted,
        summary.unsupported
    );
    Some(id)
}
