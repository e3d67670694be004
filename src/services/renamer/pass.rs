//! Single-flight latches for renamer passes
//!
//! A second trigger while a pass is running is dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};

/// Idle/running state of one kind of pass
#[derive(Debug, Default)]
pub struct PassState {
    running: AtomicBool,
}

impl PassState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the latch; `None` when a pass is already running
    pub fn try_begin(&self) -> Option<PassGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard { state: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases the latch when dropped, on every exit path
#[derive(Debug)]
pub struct PassGuard<'a> {
    state: &'a PassState,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_fails_until_released() {
        let state = PassState::new();
        let guard = state.try_begin().expect("first claim");
        assert!(state.is_running());
        assert!(state.try_begin().is_none());

        drop(guard);
        assert!(!state.is_running());
        assert!(state.try_begin().is_some());
    }

    #[test]
    fn test_released_on_early_return() {
        fn work(state: &PassState, fail: bool) -> Result<(), ()> {
            let _guard = state.try_begin().ok_or(())?;
            if fail {
                return Err(());
            }
            Ok(())
        }

        let state = PassState::new();
        assert!(work(&state, true).is_err());
        assert!(!state.is_running());
        assert!(work(&state, false).is_ok());
    }
}
