//! Single-shot shutdown broadcast.
//!
//! Every waiter holds a receiver on a channel whose only sender is dropped
//! when the signal fires, so all of them wake at once and keep observing the
//! disconnect afterwards. The first reason wins.

use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use once_cell::sync::OnceCell;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// External interrupt (Ctrl-C, SIGTERM).
    Interrupt,
    /// The reload watch saw its file change.
    Reload,
    /// The reload watch itself failed.
    WatchFailed(String),
    /// Startup failed after the loops were already running.
    StartupFailed,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => f.write_str("interrupted"),
            ShutdownReason::Reload => f.write_str("reload requested"),
            ShutdownReason::WatchFailed(e) => write!(f, "reload watch failed: {e}"),
            ShutdownReason::StartupFailed => f.write_str("startup failed"),
        }
    }
}

struct Inner {
    reason: OnceCell<ShutdownReason>,
    trigger: Mutex<Option<Sender<Infallible>>>,
    listener: Receiver<Infallible>,
}

#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(0);
        Self {
            inner: Arc::new(Inner {
                reason: OnceCell::new(),
                trigger: Mutex::new(Some(tx)),
                listener: rx,
            }),
        }
    }

    /// Fires the signal. Returns false if it had already fired.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        if self.inner.reason.set(reason).is_err() {
            return false;
        }
        let mut trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        trigger.take();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.inner.reason.get().cloned()
    }

    /// Blocks until the signal fires.
    pub fn wait(&self) -> ShutdownReason {
        // Nothing is ever sent, so recv only returns once the sender is gone.
        let _ = self.inner.listener.recv();
        self.reason().unwrap_or(ShutdownReason::StartupFailed)
    }

    /// Blocks for at most `timeout`. Returns the reason if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ShutdownReason> {
        match self.inner.listener.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => None,
            _ => self.reason(),
        }
    }

    /// Receiver that disconnects when the signal fires, for use in
    /// `flume::Selector`.
    pub fn listener(&self) -> &Receiver<Infallible> {
        &self.inner.listener
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shutdown")
            .field("reason", &self.inner.reason.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn first_reason_wins() {
        let shutdown = Shutdown::new();
        assert!(shutdown.trigger(ShutdownReason::Reload));
        assert!(!shutdown.trigger(ShutdownReason::Interrupt));
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Reload));
    }

    #[test]
    fn wakes_every_waiter() {
        let shutdown = Shutdown::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let s = shutdown.clone();
                thread::spawn(move || s.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        shutdown.trigger(ShutdownReason::Interrupt);
        for w in waiters {
            assert_eq!(w.join().unwrap(), ShutdownReason::Interrupt);
        }
    }

    #[test]
    fn wait_timeout_expires_when_not_triggered() {
        let shutdown = Shutdown::new();
        let start = Instant::now();
        assert_eq!(shutdown.wait_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!shutdown.is_triggered());
    }

    #[test]
    fn wait_after_trigger_returns_immediately() {
        let shutdown = Shutdown::new();
        shutdown.trigger(ShutdownReason::StartupFailed);
        assert_eq!(
            shutdown.wait_timeout(Duration::from_secs(5)),
            Some(ShutdownReason::StartupFailed)
        );
    }
}
