//! Split virtqueue.
//!
//! One queue, three page-sized rings from the permanent arena: the
//! descriptor table, the available ring and the used ring. Every command
//! is a two-descriptor chain - descriptor 0 carries the request
//! (device-readable), descriptor 1 the response (device-writable) - and
//! advances the available index by exactly one.
//!
//! Completion is polled with a bounded budget; a device that never
//! answers surfaces as [`GpuError::Timeout`](super::GpuError::Timeout)
//! instead of hanging the kernel.

use core::ptr::{read_volatile, write_volatile};

use craybond_arch::cpu::dsb_sy;
use craybond_mmio::MmioRegion;

use super::GpuError;

/// Ring capacity the driver is willing to use.
pub const QUEUE_LEN: usize = 128;

/// Descriptor flag: chain continues at `next`.
pub const VIRTQ_DESC_F_NEXT: u16 = 1;
/// Descriptor flag: device writes this buffer.
pub const VIRTQ_DESC_F_WRITE: u16 = 2;

/// Used-index poll budget per command.
const POLL_LIMIT: usize = 50_000_000;

/// Descriptor table entry.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct VirtqDesc {
    pub addr: u64,
    pub len: u32,
    pub flags: u16,
    pub next: u16,
}

/// Available ring: driver-written.
#[repr(C)]
pub struct VirtqAvail {
    pub flags: u16,
    pub idx: u16,
    pub ring: [u16; QUEUE_LEN],
}

/// Used ring element: descriptor chain head plus written length.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct VirtqUsedElem {
    pub id: u32,
    pub len: u32,
}

/// Used ring: device-written.
#[repr(C)]
pub struct VirtqUsed {
    pub flags: u16,
    pub idx: u16,
    pub ring: [VirtqUsedElem; QUEUE_LEN],
}

/// One split virtqueue plus its notify doorbell.
pub struct Virtqueue {
    desc: *mut VirtqDesc,
    avail: *mut VirtqAvail,
    used: *mut VirtqUsed,
    size: u16,
    notify: MmioRegion,
    notify_offset: usize,
    poll_limit: usize,
}

// SAFETY: The rings are exclusively owned by this queue; access is
// serialised by the GPU lock above (single-task ownership contract).
unsafe impl Send for Virtqueue {}

impl Virtqueue {
    /// Wrap ring memory programmed into the device.
    ///
    /// # Safety
    ///
    /// The three ring addresses must point at zeroed, page-aligned memory
    /// owned by this queue for its lifetime, and must be the same
    /// addresses written to the device's queue registers. `size` must not
    /// exceed [`QUEUE_LEN`].
    #[must_use]
    pub unsafe fn new(
        desc: u64,
        avail: u64,
        used: u64,
        size: u16,
        notify: MmioRegion,
        notify_offset: usize,
    ) -> Self {
        debug_assert!(size as usize <= QUEUE_LEN);
        Self {
            desc: desc as *mut VirtqDesc,
            avail: avail as *mut VirtqAvail,
            used: used as *mut VirtqUsed,
            size,
            notify,
            notify_offset,
            poll_limit: POLL_LIMIT,
        }
    }

    /// Lower the completion poll budget (tests use this to provoke the
    /// timeout path quickly).
    pub fn set_poll_limit(&mut self, limit: usize) {
        self.poll_limit = limit;
    }

    /// Negotiated queue size.
    #[must_use]
    pub const fn size(&self) -> u16 {
        self.size
    }

    /// Submit one request/response pair and wait for completion.
    ///
    /// Descriptor 0 gets `{addr = cmd, len = cmd_len, flags =
    /// cmd_flags, next = 1}`; descriptor 1 gets the response buffer,
    /// device-writable. The available index advances by one, the device
    /// is notified through the doorbell, and the call returns when the
    /// used index moves.
    pub fn submit(
        &mut self,
        cmd: u64,
        cmd_len: u32,
        cmd_flags: u16,
        resp: u64,
        resp_len: u32,
    ) -> Result<(), GpuError> {
        // Capture the used index before the device can see the command;
        // a completion between notify and the first poll must still count.
        // SAFETY: Ring pointers are valid per `new`; the device owns the
        // used ring.
        let used_before = unsafe { read_volatile(core::ptr::addr_of!((*self.used).idx)) };

        // SAFETY: Ring pointers are valid per `new`; this driver is the
        // only writer (single-task ownership contract).
        unsafe {
            write_volatile(
                self.desc,
                VirtqDesc {
                    addr: cmd,
                    len: cmd_len,
                    flags: cmd_flags,
                    next: 1,
                },
            );
            write_volatile(
                self.desc.add(1),
                VirtqDesc {
                    addr: resp,
                    len: resp_len,
                    flags: VIRTQ_DESC_F_WRITE,
                    next: 0,
                },
            );

            let avail_idx = read_volatile(core::ptr::addr_of!((*self.avail).idx));
            let slot = (avail_idx % self.size) as usize;
            write_volatile(core::ptr::addr_of_mut!((*self.avail).ring[slot]), 0);
            // Ring contents must be visible before the index moves, and
            // the index before the doorbell.
            dsb_sy();
            write_volatile(
                core::ptr::addr_of_mut!((*self.avail).idx),
                avail_idx.wrapping_add(1),
            );
            dsb_sy();
        }

        self.notify.write16(self.notify_offset, 0);

        for _ in 0..self.poll_limit {
            // SAFETY: As above.
            let used_now = unsafe { read_volatile(core::ptr::addr_of!((*self.used).idx)) };
            if used_now != used_before {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(GpuError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(4096))]
    struct Page([u8; 4096]);

    struct Rings {
        desc: Page,
        avail: Page,
        used: Page,
        doorbell: Page,
    }

    fn queue_over(rings: &mut Rings, poll_limit: usize) -> Virtqueue {
        let notify =
            unsafe { MmioRegion::new(rings.doorbell.0.as_mut_ptr() as usize, 4096) };
        let mut q = unsafe {
            Virtqueue::new(
                rings.desc.0.as_mut_ptr() as u64,
                rings.avail.0.as_mut_ptr() as u64,
                rings.used.0.as_mut_ptr() as u64,
                QUEUE_LEN as u16,
                notify,
                0,
            )
        };
        q.set_poll_limit(poll_limit);
        q
    }

    #[test]
    fn submit_builds_the_two_descriptor_chain() {
        let mut rings = Rings {
            desc: Page([0; 4096]),
            avail: Page([0; 4096]),
            used: Page([0; 4096]),
            doorbell: Page([0; 4096]),
        };
        let mut q = queue_over(&mut rings, 4);

        // No device behind the rings: the command times out, but the ring
        // state it leaves behind is exactly the submission contract.
        let err = q.submit(0x1000, 24, VIRTQ_DESC_F_NEXT, 0x2000, 24).unwrap_err();
        assert_eq!(err, GpuError::Timeout);

        let desc0 = unsafe { *(rings.desc.0.as_ptr() as *const VirtqDesc) };
        let desc1 = unsafe { *(rings.desc.0.as_ptr() as *const VirtqDesc).add(1) };
        assert_eq!(desc0.addr, 0x1000);
        assert_eq!(desc0.len, 24);
        assert_eq!(desc0.flags, VIRTQ_DESC_F_NEXT);
        assert_eq!(desc0.next, 1);
        assert_eq!(desc1.addr, 0x2000);
        assert_eq!(desc1.flags, VIRTQ_DESC_F_WRITE);
        assert_eq!(desc1.next, 0);

        let avail = unsafe { &*(rings.avail.0.as_ptr() as *const VirtqAvail) };
        assert_eq!(avail.idx, 1);
        assert_eq!(avail.ring[0], 0);

        // The doorbell saw the queue index.
        assert_eq!(
            u16::from_le_bytes([rings.doorbell.0[0], rings.doorbell.0[1]]),
            0
        );
    }

    #[test]
    fn avail_index_advances_by_one_per_submission() {
        let mut rings = Rings {
            desc: Page([0; 4096]),
            avail: Page([0; 4096]),
            used: Page([0; 4096]),
            doorbell: Page([0; 4096]),
        };
        let mut q = queue_over(&mut rings, 2);

        for expected in 1..=3u16 {
            let _ = q.submit(0x1000, 8, VIRTQ_DESC_F_NEXT, 0x2000, 8);
            let avail = unsafe { &*(rings.avail.0.as_ptr() as *const VirtqAvail) };
            assert_eq!(avail.idx, expected);
        }
    }

    #[test]
    fn completion_is_detected_when_the_used_index_moves() {
        extern crate std;

        let mut rings = Rings {
            desc: Page([0; 4096]),
            avail: Page([0; 4096]),
            used: Page([0; 4096]),
            doorbell: Page([0; 4096]),
        };
        let used_addr = rings.used.0.as_mut_ptr() as usize;
        let mut q = queue_over(&mut rings, usize::MAX);

        // A stand-in device completes the command from another thread.
        std::thread::scope(|scope| {
            scope.spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                let used = used_addr as *mut VirtqUsed;
                unsafe { core::ptr::addr_of_mut!((*used).idx).write_volatile(1) };
            });

            q.submit(0x1000, 8, VIRTQ_DESC_F_NEXT, 0x2000, 8)
                .expect("submit must complete once the used index moves");
        });
    }
}
