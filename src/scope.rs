//! Release-on-every-path composition for startup resources.

use tracing::{debug, warn};

use crate::capture::DeviceError;

type Release = Box<dyn FnOnce() -> Result<(), DeviceError> + Send>;

/// Stack of release actions, run in reverse push order.
///
/// Each successful acquisition pushes its release; whatever happens next
/// (early return, error, normal shutdown) the stack unwinds exactly once,
/// either explicitly via [`CleanupStack::unwind`] or on drop.
#[derive(Default)]
pub struct CleanupStack {
    actions: Vec<(String, Release)>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, label: impl Into<String>, release: F)
    where
        F: FnOnce() -> Result<(), DeviceError> + Send + 'static,
    {
        self.actions.push((label.into(), Box::new(release)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Runs every release action, newest first. A failing release is logged
    /// and does not stop the ones after it.
    pub fn unwind(&mut self) -> Vec<(String, DeviceError)> {
        let mut failures = Vec::new();
        while let Some((label, release)) = self.actions.pop() {
            match release() {
                Ok(()) => debug!(resource = %label, "released"),
                Err(e) => {
                    warn!(resource = %label, error = %e, "release failed");
                    failures.push((label, e));
                }
            }
        }
        failures
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        self.unwind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, CleanupStack) {
        (Arc::new(Mutex::new(Vec::new())), CleanupStack::new())
    }

    #[test]
    fn unwinds_in_reverse_order() {
        let (log, mut stack) = recorder();
        for name in ["spi", "i2c", "profile"] {
            let log = log.clone();
            stack.push(name, move || {
                log.lock().unwrap().push(name);
                Ok(())
            });
        }
        assert!(stack.unwind().is_empty());
        assert!(stack.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["profile", "i2c", "spi"]);
    }

    #[test]
    fn failing_release_does_not_stop_the_rest() {
        let (log, mut stack) = recorder();
        {
            let log = log.clone();
            stack.push("spi", move || {
                log.lock().unwrap().push("spi");
                Ok(())
            });
        }
        stack.push("i2c", || Err(DeviceError::Frame("stuck".into())));

        let failures = stack.unwind();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "i2c");
        assert_eq!(*log.lock().unwrap(), vec!["spi"]);
    }

    #[test]
    fn drop_unwinds_once() {
        let (log, mut stack) = recorder();
        {
            let log = log.clone();
            stack.push("spi", move || {
                log.lock().unwrap().push("spi");
                Ok(())
            });
        }
        drop(stack);
        assert_eq!(*log.lock().unwrap(), vec!["spi"]);
    }
}
