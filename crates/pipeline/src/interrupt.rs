//! Per-session interrupt signal
//!
//! Set by the receive path when the user talks over the agent, polled by the
//! turn pipeline before every outbound audio chunk. The pipeline also marks
//! when a response is going out, so the receive path knows whether new
//! speech should cut it short.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicBool,
    outbound: AtomicBool,
}

/// Shared interrupt flag; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    inner: Arc<Inner>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the current outbound stream to stop
    pub fn set(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.inner.requested.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Response generation or playback has started
    pub fn begin_outbound(&self) {
        self.inner.outbound.store(true, Ordering::SeqCst);
    }

    pub fn end_outbound(&self) {
        self.inner.outbound.store(false, Ordering::SeqCst);
    }

    /// True while a response is being generated or played
    pub fn is_outbound(&self) -> bool {
        self.inner.outbound.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        let flag = InterruptFlag::new();
        assert!(!flag.is_set());

        flag.set();
        assert!(flag.is_set());

        flag.clear();
        assert!(!flag.is_set());
    }

    #[test]
    fn test_outbound_marker_is_independent() {
        let flag = InterruptFlag::new();
        flag.begin_outbound();
        assert!(flag.is_outbound());
        assert!(!flag.is_set());

        flag.set();
        flag.end_outbound();
        assert!(!flag.is_outbound());
        assert!(flag.is_set());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_visible_across_tasks() {
        let flag = InterruptFlag::new();
        let remote = flag.clone();

        tokio::spawn(async move {
            remote.set();
            remote.begin_outbound();
        })
        .await
        .unwrap();
        assert!(flag.is_set());
        assert!(flag.is_outbound());
    }
}
