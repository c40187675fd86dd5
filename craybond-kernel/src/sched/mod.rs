//! Process table and round-robin scheduler.
//!
//! A fixed table of task descriptors, a current index and a count. Tasks
//! are created by the spawn routines and never destroyed. Selection is
//! round-robin over READY descriptors starting after the current one;
//! when the search wraps, the switch is a no-op.
//!
//! Two paths reach the switch: the timer IRQ (the exception stub has
//! already saved the interrupted register file into the frame) and the
//! cooperative [`yield_now`], which synthesises an equivalent frame so
//! both funnel into the same exception-return restore.

mod context;

pub use context::yield_now;

use core::sync::atomic::{AtomicBool, Ordering};

use craybond_arch::IrqSpinMutex;
use craybond_arch::cpu;
use craybond_arch::exceptions::ExceptionContext;
use craybond_arch::registers::spsr;
use craybond_pal::timer;

use crate::memory;

/// Process table capacity.
pub const MAX_TASKS: usize = 16;

/// Kernel task stack size.
pub const KERNEL_STACK_SIZE: u64 = 0x1000;

/// Task life-cycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Runnable, waiting for the scheduler.
    Ready,
    /// Currently executing.
    Running,
    /// Not runnable until something readies it again.
    Blocked,
}

/// A span of task-owned memory, used for syscall pointer validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    /// First byte.
    pub base: u64,
    /// Length in bytes.
    pub size: u64,
}

impl Region {
    /// True when `[ptr, ptr + len)` lies entirely inside this region.
    #[must_use]
    pub const fn contains(&self, ptr: u64, len: u64) -> bool {
        ptr >= self.base && len <= self.size && ptr - self.base <= self.size - len
    }
}

/// One task descriptor: the saved register file, identity and state,
/// plus the EL0 regions backing a user task.
pub struct Task {
    /// Saved register file: 31 GPRs, SP, PC (ELR) and SPSR.
    pub ctx: ExceptionContext,
    /// Identifier, assigned by insertion order.
    pub id: usize,
    /// Life-cycle state.
    pub state: TaskState,
    /// EL0 code region, user tasks only.
    pub user_code: Option<Region>,
    /// EL0 data region, user tasks only.
    pub user_data: Option<Region>,
    /// EL0 stack region, user tasks only.
    pub user_stack: Option<Region>,
}

impl Task {
    const fn empty() -> Self {
        Self {
            ctx: ExceptionContext::zeroed(),
            id: 0,
            state: TaskState::Blocked,
            user_code: None,
            user_data: None,
            user_stack: None,
        }
    }
}

/// The fixed-capacity process table.
///
/// Indices in `[0, count)` hold live descriptors; `count` only grows.
pub struct ProcessTable {
    tasks: [Task; MAX_TASKS],
    current: usize,
    count: usize,
}

impl ProcessTable {
    const fn new() -> Self {
        Self {
            tasks: [const { Task::empty() }; MAX_TASKS],
            current: 0,
            count: 0,
        }
    }

    /// Claim the next descriptor slot, or `None` at capacity (the count
    /// is left unchanged).
    fn alloc(&mut self) -> Option<usize> {
        if self.count == MAX_TASKS {
            return None;
        }
        let id = self.count;
        self.count += 1;
        self.tasks[id].id = id;
        Some(id)
    }

    /// Round-robin selection: first READY descriptor after `current`.
    fn select_next(&self) -> Option<usize> {
        round_robin_from(&self.tasks[..self.count], self.current, |t| t.state)
    }

    fn first_ready(&self) -> Option<usize> {
        self.tasks[..self.count]
            .iter()
            .position(|t| t.state == TaskState::Ready)
    }
}

/// Round-robin over `tasks` starting at `(current + 1) % len`.
///
/// Returns `None` when the search wraps back to `current` without
/// finding a READY entry (the switch is then a no-op).
fn round_robin_from<T>(
    tasks: &[T],
    current: usize,
    state_of: impl Fn(&T) -> TaskState,
) -> Option<usize> {
    if tasks.is_empty() {
        return None;
    }
    let len = tasks.len();
    let mut candidate = (current + 1) % len;
    while candidate != current {
        if state_of(&tasks[candidate]) == TaskState::Ready {
            return Some(candidate);
        }
        candidate = (candidate + 1) % len;
    }
    None
}

static TABLE: IrqSpinMutex<ProcessTable> = IrqSpinMutex::new(ProcessTable::new());

static NEEDS_RESCHEDULE: AtomicBool = AtomicBool::new(false);

/// Request a reschedule; the IRQ exit path picks it up.
pub fn request_reschedule() {
    NEEDS_RESCHEDULE.store(true, Ordering::Release);
}

/// Consume a pending reschedule request.
#[must_use]
pub fn take_reschedule() -> bool {
    NEEDS_RESCHEDULE.swap(false, Ordering::AcqRel)
}

/// Spawn a kernel task at `entry` with a fresh EL1 stack.
///
/// `code_size` is informational (the code already lives in the kernel
/// image); it is reported so the log shows what the task occupies.
/// Returns the task id, or `None` when the table is full.
pub fn spawn_kernel(entry: extern "C" fn(), code_size: u64) -> Option<usize> {
    let stack_base = memory::user_pages_alloc(KERNEL_STACK_SIZE / 0x1000);
    memory::mmu::map_task_pages(
        stack_base,
        KERNEL_STACK_SIZE / 0x1000,
        craybond_paging::AccessLevel::El1,
        false,
    );

    let mut table = TABLE.lock();
    let id = table.alloc()?;
    let task = &mut table.tasks[id];
    task.ctx = ExceptionContext::zeroed();
    task.ctx.elr = entry as usize as u64;
    task.ctx.sp = stack_base + KERNEL_STACK_SIZE;
    task.ctx.spsr = spsr::EL1H_MASKED;
    task.ctx.gpr[30] = task_park as usize as u64;
    task.state = TaskState::Ready;
    drop(table);

    log::info!(
        "sched: kernel task {id} at {:#x} ({code_size} bytes of code), stack top {:#x}",
        entry as usize,
        stack_base + KERNEL_STACK_SIZE
    );
    Some(id)
}

/// Claim a slot and let the caller fill in the descriptor (used by the
/// user-task loader once its regions are prepared).
pub fn spawn_with(fill: impl FnOnce(usize, &mut Task)) -> Option<usize> {
    let mut table = TABLE.lock();
    let id = table.alloc()?;
    fill(id, &mut table.tasks[id]);
    table.tasks[id].state = TaskState::Ready;
    Some(id)
}

/// Landing pad for a kernel task whose entry function returns.
extern "C" fn task_park() {
    loop {
        yield_now();
        cpu::wait_for_interrupt();
    }
}

/// Switch the frame to the next READY task.
///
/// Saves `ctx` into the current descriptor, selects round-robin, and
/// rewrites `ctx` with the selected descriptor. Returns `false` when no
/// other READY task exists and the frame is untouched.
pub fn context_switch(ctx: &mut ExceptionContext) -> bool {
    let mut table = TABLE.lock();
    if table.count == 0 {
        return false;
    }

    let current = table.current;
    table.tasks[current].ctx = ctx.clone();
    if table.tasks[current].state == TaskState::Running {
        table.tasks[current].state = TaskState::Ready;
    }

    let Some(next) = table.select_next() else {
        if table.tasks[current].state == TaskState::Ready {
            table.tasks[current].state = TaskState::Running;
        }
        return false;
    };

    table.current = next;
    table.tasks[next].state = TaskState::Running;
    *ctx = table.tasks[next].ctx.clone();
    true
}

/// Start scheduling: mask IRQs, program the periodic tick and dispatch
/// the first READY task. With nothing runnable the CPU idles in WFI with
/// IRQs enabled.
pub fn start(tick_ms: u64) -> ! {
    cpu::irq_disable();
    timer::init(tick_ms);

    let first = {
        let mut table = TABLE.lock();
        match table.first_ready() {
            Some(id) => {
                table.current = id;
                table.tasks[id].state = TaskState::Running;
                Some(table.tasks[id].ctx.clone())
            }
            None => None,
        }
    };

    match first {
        // SAFETY: The context was initialised by a spawn routine.
        Some(ctx) => unsafe { craybond_arch::exceptions::restore_context(&ctx) },
        None => {
            log::info!("sched: nothing runnable, idling");
            cpu::irq_enable();
            cpu::halt()
        }
    }
}

/// Identifier of the task currently holding the CPU.
#[must_use]
pub fn current_id() -> usize {
    let table = TABLE.lock();
    table.tasks[table.current].id
}

/// EL0 regions of the current task: code, data, stack.
///
/// Empty for kernel tasks, whose pointers are trusted.
#[must_use]
pub fn current_user_regions() -> [Option<Region>; 3] {
    let table = TABLE.lock();
    let task = &table.tasks[table.current];
    [task.user_code, task.user_data, task.user_stack]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_starts_after_current() {
        let states = [TaskState::Ready, TaskState::Ready, TaskState::Ready];
        assert_eq!(round_robin_from(&states, 0, |s| *s), Some(1));
        assert_eq!(round_robin_from(&states, 1, |s| *s), Some(2));
        assert_eq!(round_robin_from(&states, 2, |s| *s), Some(0));
    }

    #[test]
    fn round_robin_skips_non_ready() {
        let states = [
            TaskState::Ready,
            TaskState::Blocked,
            TaskState::Running,
            TaskState::Ready,
        ];
        assert_eq!(round_robin_from(&states, 0, |s| *s), Some(3));
        assert_eq!(round_robin_from(&states, 3, |s| *s), Some(0));
    }

    #[test]
    fn round_robin_wrap_without_ready_is_none() {
        let states = [TaskState::Running, TaskState::Blocked];
        assert_eq!(round_robin_from(&states, 0, |s| *s), None);

        let empty: [TaskState; 0] = [];
        assert_eq!(round_robin_from(&empty, 0, |s| *s), None);
    }

    #[test]
    fn table_allocates_in_insertion_order_up_to_capacity() {
        let mut table = ProcessTable::new();
        for expected in 0..MAX_TASKS {
            let id = table.alloc().expect("capacity not yet reached");
            assert_eq!(id, expected);
        }
        assert_eq!(table.alloc(), None);
        assert_eq!(table.count, MAX_TASKS);
    }

    #[test]
    fn context_round_trip_preserves_the_register_file() {
        let mut ctx = ExceptionContext::zeroed();
        for (i, r) in ctx.gpr.iter_mut().enumerate() {
            *r = 0x1000 + i as u64;
        }
        ctx.sp = 0xAAAA_0000;
        ctx.elr = 0x4020_0000;
        ctx.spsr = spsr::EL0T;

        let mut task = Task::empty();
        task.ctx = ctx.clone();
        let restored = task.ctx.clone();

        assert_eq!(restored.gpr, ctx.gpr);
        assert_eq!(restored.sp, ctx.sp);
        assert_eq!(restored.elr, ctx.elr);
        assert_eq!(restored.spsr, ctx.spsr);
    }

    #[test]
    fn region_containment() {
        let r = Region {
            base: 0x1000,
            size: 0x1000,
        };
        assert!(r.contains(0x1000, 0x1000));
        assert!(r.contains(0x1800, 0x100));
        assert!(!r.contains(0x0FFF, 1));
        assert!(!r.contains(0x1800, 0x900));
        assert!(!r.contains(0x2000, 1));
        assert!(r.contains(0x2000, 0));
    }
}
