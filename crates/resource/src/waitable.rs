//! One-shot completion signal.
//!
//! Handed to a client during a preemption round trip. The broker's thread
//! blocks in [`Waitable::wait`] until the client calls [`Waitable::signal`]
//! after tearing down its use of the hardware.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Clone, Default)]
pub struct Waitable {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Waitable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the waitable signaled and wake every waiter. Idempotent.
    pub fn signal(&self) {
        let (lock, cvar) = &*self.inner;
        let mut signaled = lock.lock();
        *signaled = true;
        cvar.notify_all();
    }

    pub fn is_signaled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block until signaled. There is no timeout.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut signaled = lock.lock();
        while !*signaled {
            cvar.wait(&mut signaled);
        }
    }

    /// Block until signaled or `timeout` elapses. Returns whether signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut signaled = lock.lock();
        if !*signaled {
            cvar.wait_while_for(&mut signaled, |s| !*s, timeout);
        }
        *signaled
    }
}

impl std::fmt::Debug for Waitable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waitable")
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn signal_wakes_waiter_on_other_thread() {
        let w = Waitable::new();
        let signaler = w.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaler.signal();
        });
        w.wait();
        assert!(w.is_signaled());
        handle.join().unwrap();
    }

    #[test]
    fn wait_timeout_expires_when_never_signaled() {
        let w = Waitable::new();
        assert!(!w.wait_timeout(Duration::from_millis(10)));
        w.signal();
        assert!(w.wait_timeout(Duration::from_millis(10)));
    }
}
