//! Bare-metal demo kernel for Raspberry Pi Zero 2 W.
//!
//! Runs the six scheduling scenarios this core is built around, one after
//! another, printing each step to the PL011 UART so the sequence can be
//! read off a serial console.
//!
//! # Building
//!
//! ```bash
//! cargo build --release --example rpi_kernel --target aarch64-unknown-none
//! ```
//!
//! # Deploying
//!
//! 1. Convert ELF to binary:
//!    ```bash
//!    rust-objcopy -O binary target/aarch64-unknown-none/release/examples/rpi_kernel kernel8.img
//!    ```
//! 2. Copy `kernel8.img` to the SD card's boot partition.
//! 3. Add to `config.txt`:
//!    ```text
//!    arm_64bit=1
//!    kernel=kernel8.img
//!    ```
//! 4. Boot the Pi with a USB-serial adapter on the GPIO UART pins.

#![no_std]
#![no_main]

extern crate alloc;

use kthread_core::arch::{aarch64, uart_pl011, Arch, DefaultArch};
use kthread_core::sync::{CondVar, Lock};
use kthread_core::thread::PRI_DEFAULT;
use kthread_core::{kernel, pl011_println};

/// Bump allocator for the heap; deallocation is a no-op, matching the
/// all-threads-live-for-uptime assumption the page pool itself makes.
mod allocator {
    use core::alloc::{GlobalAlloc, Layout};
    use core::cell::UnsafeCell;
    use core::ptr::null_mut;
    use core::sync::atomic::{AtomicUsize, Ordering};

    const HEAP_SIZE: usize = 16 * 1024 * 1024;

    #[repr(C, align(16))]
    struct Heap {
        data: UnsafeCell<[u8; HEAP_SIZE]>,
        next: AtomicUsize,
    }

    unsafe impl Sync for Heap {}

    static HEAP: Heap = Heap { data: UnsafeCell::new([0; HEAP_SIZE]), next: AtomicUsize::new(0) };

    pub struct BumpAllocator;

    unsafe impl GlobalAlloc for BumpAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            let size = layout.size();
            let align = layout.align();
            loop {
                let current = HEAP.next.load(Ordering::Relaxed);
                let aligned = (current + align - 1) & !(align - 1);
                let new_next = aligned + size;
                if new_next > HEAP_SIZE {
                    return null_mut();
                }
                if HEAP
                    .next
                    .compare_exchange(current, new_next, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    let heap_start = unsafe { HEAP.data.get() as *mut u8 };
                    return unsafe { heap_start.add(aligned) };
                }
            }
        }

        unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {}
    }

    #[global_allocator]
    static ALLOCATOR: BumpAllocator = BumpAllocator;
}

static LOCK_A: Lock = Lock::new();
static LOCK_B: Lock = Lock::new();
static SIGNAL: CondVar = CondVar::new();
static SIGNAL_LOCK: Lock = Lock::new();

fn scenario1_high_priority(_arg: usize) {
    pl011_println!("T32 done");
    kernel::exit();
}

fn scenario1_mid_priority(_arg: usize) {
    pl011_println!("T31 done");
    kernel::exit();
}

fn scenario2_contender(_arg: usize) {
    LOCK_A.acquire();
    pl011_println!("acquired");
    LOCK_A.release();
    kernel::exit();
}

fn scenario3_waits_on_b(_arg: usize) {
    LOCK_B.acquire();
    LOCK_A.acquire();
    LOCK_A.release();
    LOCK_B.release();
    kernel::exit();
}

fn scenario3_waits_on_a(_arg: usize) {
    LOCK_A.acquire();
    pl011_println!("t33 acquired L1");
    LOCK_A.release();
    kernel::exit();
}

fn scenario5_sleeper(ticks: usize) {
    kernel::timer_sleep(ticks as i64);
    pl011_println!("woke after {} ticks", ticks);
    kernel::exit();
}

fn scenario6_waiter(priority: usize) {
    SIGNAL_LOCK.acquire();
    SIGNAL.wait(&SIGNAL_LOCK);
    pl011_println!("woke at priority {}", priority);
    SIGNAL_LOCK.release();
    kernel::exit();
}

/// Kernel entry point, called from `_start` after boot asm, vector table,
/// and GIC setup.
#[no_mangle]
pub fn kernel_main() -> ! {
    unsafe { uart_pl011::init() };
    kernel::init("creator");

    pl011_println!("kthread-core demo booting");

    // Scenario 1: simple priority scheduling. T32 (highest) preempts T31,
    // which preempts the creator.
    kernel::thread_create("T32", PRI_DEFAULT + 2, scenario1_high_priority, 0)
        .expect("spawn T32");
    kernel::thread_create("T31", PRI_DEFAULT + 1, scenario1_mid_priority, 0)
        .expect("spawn T31");
    kernel::yield_now();
    pl011_println!("creator done");

    // Scenarios 2 and 4: basic donation and revocation. The creator holds
    // LOCK_A; T33 donates its higher priority while waiting for it.
    LOCK_A.acquire();
    pl011_println!("got-lock");
    kernel::thread_create("T33", PRI_DEFAULT + 3, scenario2_contender, 0)
        .expect("spawn T33");
    kernel::yield_now();
    pl011_println!("releasing");
    LOCK_A.release();
    kernel::yield_now();

    // Scenario 3: chained donation across two locks. T_b holds LOCK_B and
    // waits on LOCK_A (held by the creator until released above); T_a
    // waits directly on LOCK_A.
    LOCK_A.acquire();
    kernel::thread_create("t_b", PRI_DEFAULT + 1, scenario3_waits_on_b, 0).expect("spawn t_b");
    kernel::thread_create("t_a", PRI_DEFAULT + 2, scenario3_waits_on_a, 0).expect("spawn t_a");
    kernel::yield_now();
    LOCK_A.release();
    kernel::yield_now();

    // Scenario 5: timed-sleep ordering, independent of call order.
    kernel::thread_create("sleeps_30", PRI_DEFAULT, scenario5_sleeper, 30).expect("spawn sleeper");
    kernel::thread_create("sleeps_10", PRI_DEFAULT, scenario5_sleeper, 10).expect("spawn sleeper");
    kernel::thread_create("sleeps_20", PRI_DEFAULT, scenario5_sleeper, 20).expect("spawn sleeper");
    kernel::timer_sleep(31);

    // Scenario 6: condition-variable signal order favors the highest
    // waiter priority, irrespective of wait order.
    kernel::thread_create("waiter_20", 20, scenario6_waiter, 20).expect("spawn waiter");
    kernel::thread_create("waiter_25", 25, scenario6_waiter, 25).expect("spawn waiter");
    kernel::thread_create("waiter_30", 30, scenario6_waiter, 30).expect("spawn waiter");
    kernel::yield_now();
    for _ in 0..3 {
        SIGNAL_LOCK.acquire();
        SIGNAL.signal(&SIGNAL_LOCK);
        SIGNAL_LOCK.release();
        kernel::timer_sleep(2);
    }

    unsafe {
        aarch64::setup_preemption_timer(1000).expect("setup preemption timer");
    }
    kernel::arm_irq_context_for_current();
    DefaultArch::enable_interrupts();

    loop {
        unsafe { core::arch::asm!("wfe", options(nomem, nostack)) };
    }
}
