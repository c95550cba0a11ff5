use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation flag shared between an owner and its background loop.
///
/// A token starts requested (no loop running). `start()` paths call
/// `reset()` before spawning; `stop()` paths call `request()` and then
/// join the worker, so a loop is guaranteed to have fully exited
/// before its owner releases the resources the loop borrows.
#[derive(Debug)]
pub struct CancelToken {
    requested: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requested: AtomicBool::new(true),
        })
    }

    pub fn reset(&self) {
        self.requested.store(false, Ordering::Relaxed);
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_requested() {
        let token = CancelToken::new();
        assert!(token.is_requested());
        token.reset();
        assert!(!token.is_requested());
        token.request();
        assert!(token.is_requested());
    }
}
