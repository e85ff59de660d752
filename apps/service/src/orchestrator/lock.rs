use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Single-flight guard for test cycles.
///
/// Acquisition never waits: a caller that finds the lock held abandons its run.
#[derive(Debug, Clone, Default)]
pub struct RunLock {
    held: Arc<AtomicBool>,
}

/// Releases the [`RunLock`] when dropped, including during unwinding
#[derive(Debug)]
pub struct RunGuard {
    held: Arc<AtomicBool>,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<RunGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { held: Arc::clone(&self.held) })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}
