//! Cooperative shutdown signals
//!
//! One tri-state flag per hook group. The requesting thread moves the flag
//! to `Requested` and polls; only the executing thread (the one running the
//! hooked detour) may move it out of `Requested`, and it does so after the
//! removal actually happened.

use std::sync::atomic::{AtomicU8, Ordering};

/// Observable state of a [`ShutdownSignal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignalState {
    Idle = 0,
    Requested = 1,
    Completed = 2,
}

/// Tri-state shutdown flag shared between the requesting thread and the
/// executing thread
pub struct ShutdownSignal(AtomicU8);

impl ShutdownSignal {
    pub const fn new() -> Self {
        ShutdownSignal(AtomicU8::new(SignalState::Idle as u8))
    }

    pub fn state(&self) -> SignalState {
        match self.0.load(Ordering::Acquire) {
            0 => SignalState::Idle,
            1 => SignalState::Requested,
            _ => SignalState::Completed,
        }
    }

    /// Request shutdown. Returns `false` if the signal had already left
    /// `Idle`.
    pub fn request(&self) -> bool {
        self.0
            .compare_exchange(
                SignalState::Idle as u8,
                SignalState::Requested as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn is_requested(&self) -> bool {
        self.state() == SignalState::Requested
    }

    pub fn is_completed(&self) -> bool {
        self.state() == SignalState::Completed
    }

    /// Mark the requested work done. Executing thread only.
    pub fn complete(&self) {
        let previous = self.0.swap(SignalState::Completed as u8, Ordering::AcqRel);
        debug_assert_eq!(
            previous,
            SignalState::Requested as u8,
            "completed a signal that was never requested"
        );
    }

    /// Return to `Idle`. Executing thread only.
    pub fn reset(&self) {
        self.0.store(SignalState::Idle as u8, Ordering::Release);
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_complete_cycle() {
        let signal = ShutdownSignal::new();
        assert_eq!(signal.state(), SignalState::Idle);
        assert!(!signal.is_requested());

        assert!(signal.request());
        assert!(signal.is_requested());
        assert!(!signal.is_completed());

        signal.complete();
        assert!(signal.is_completed());
        assert!(!signal.is_requested());

        signal.reset();
        assert_eq!(signal.state(), SignalState::Idle);
    }

    #[test]
    fn test_request_is_one_shot() {
        let signal = ShutdownSignal::new();
        assert!(signal.request());
        assert!(!signal.request());
    }
}
