//! The boot-screen task.
//!
//! First task the scheduler dispatches: clears the display, draws the
//! boot figure - a ring of line segments around the screen centre - and
//! a greeting, pushes the frame, then parks in a yield loop so other
//! tasks get the CPU.
//!
//! The task body lives in its own text section so the loader can report
//! a meaningful code size for it.

use crate::gfx::Point;
use crate::memory::layout;
use crate::sched::{self, yield_now};
use crate::{gpu, panic};

/// Spawn the boot-screen task. The table has room this early in boot, so
/// failure to spawn is a kernel bug.
pub fn spawn() {
    let code_size = layout::bootscreen_end().saturating_sub(layout::bootscreen_start());
    if sched::spawn_kernel(bootscreen, code_size).is_none() {
        panic::panic_with_info("process table full at boot", sched::MAX_TASKS as u64);
    }
}

/// Task body.
#[unsafe(link_section = ".text.bootscreen")]
extern "C" fn bootscreen() {
    let drew = gpu::with(|gpu| {
        gpu.clear(0x000000);
        let (width, height) = gpu.screen_size();
        draw_figure(gpu, width as i32, height as i32);
        gpu.draw_string(
            Point { x: 16, y: 16 },
            "craybond",
            2,
            0xFFFFFF,
        );
        gpu.flush();
    });

    if drew.is_none() {
        log::warn!("bootscreen: no display, skipping the figure");
    }
    log::info!("bootscreen: done");

    loop {
        yield_now();
        craybond_arch::cpu::wait_for_interrupt();
    }
}

/// Twelve segments walking around the screen centre.
///
/// Each corner point alternates between a wide and a narrow extent on
/// both axes, producing the crayon-box outline of the original boot
/// figure.
fn draw_figure(gpu: &mut gpu::Gpu, width: i32, height: i32) {
    let centre = Point {
        x: width / 2,
        y: height / 2,
    };
    let sizes = [30, width / 5, height / 3, 40];
    let padding = 10;

    let mut current = Point {
        x: centre.x - padding - sizes[1],
        y: centre.y - padding - sizes[0],
    };

    for i in 0..12 {
        let y_sign = if i > 5 { -1 } else { 1 };
        let narrow_x = (i % 6) != 0 && (i % 6) != 5;
        let mut narrow_y = (i / 2) % 2 == 0;
        if i >= 6 {
            narrow_y = !narrow_y;
        }
        let x_sign = if (i / 3) % 3 == 0 { -1 } else { 1 };

        let x_extent = padding + if narrow_x { sizes[3] } else { sizes[1] };
        let y_extent = padding + if narrow_y { sizes[0] } else { sizes[2] };

        let next = Point {
            x: centre.x + x_sign * x_extent,
            y: centre.y + y_sign * y_extent,
        };
        gpu.draw_line(current, next, 0xFFFFFF);
        current = next;
    }
}
