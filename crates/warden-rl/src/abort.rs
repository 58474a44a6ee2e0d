use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lock-free stop signal polled between samples of a training batch.
///
/// Cloning shares the flag, so a handle can be raised from any thread while
/// the engine lock is held by a running `learn()`. A raised flag stays raised
/// until [`AbortHandle::clear`]; `emergency_stop` clears it once applied.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_abort(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_abort_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
