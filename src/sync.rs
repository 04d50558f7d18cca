use core::sync::atomic::{fence, AtomicU32, Ordering};

use spin::Mutex;

/// Rendezvous point for an at-boot-time-known set of CPUs: a lock plus a
/// monotonically increasing counter.
///
/// `enter` publishes everything the caller wrote before it: a full fence is
/// issued under the lock immediately before the increment, and waiters
/// observe the counter with acquire ordering. A CPU that sees `count() == n`
/// therefore also sees every side effect committed before the n-th enter.
///
/// There is deliberately no timeout. The expected CPU count is trusted
/// input; an under-count is fatal and indistinguishable from a hang, and
/// hanging beats partial, unsafe activation.
pub struct Barrier {
    lock: Mutex<()>,
    count: AtomicU32,
}

impl Barrier {
    pub const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            count: AtomicU32::new(0),
        }
    }

    pub fn enter(&self) {
        let _guard = self.lock.lock();
        fence(Ordering::SeqCst);
        self.count.fetch_add(1, Ordering::Release);
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

impl Default for Barrier {
    fn default() -> Self {
        Self::new()
    }
}

/// Busy-wait hint. There is no scheduler to yield to on the boot path;
/// suspension is always a tight poll on a counter or flag.
pub fn cpu_relax() {
    core::hint::spin_loop();
}
