//! Minimal cross-thread handshake primitive
//!
//! The intercepted host threads must never block on our synchronization
//! primitives: parking a host thread in a mutex or condition variable could
//! deadlock the host's own frame pump, whose internals we do not control.
//! All cross-thread waits in this engine are therefore cooperative busy
//! waits: poll the predicate, yield between polls. Both waits the engine
//! performs are short by construction (bounded by "the other thread's next
//! tick").

/// Poll `predicate` until it returns `true`, yielding the time slice
/// between polls.
pub fn spin_until<F>(predicate: F)
where
    F: Fn() -> bool,
{
    while !predicate() {
        std::hint::spin_loop();
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_spin_until_immediate() {
        spin_until(|| true);
    }

    #[test]
    fn test_spin_until_observes_other_thread() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = {
            let flag = flag.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    std::thread::yield_now();
                }
                flag.store(true, Ordering::Release);
            })
        };

        spin_until(|| flag.load(Ordering::Acquire));
        setter.join().unwrap();
        assert!(flag.load(Ordering::Acquire));
    }
}
