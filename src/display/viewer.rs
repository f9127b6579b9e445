//! In-process frame store backing the live viewer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use thiserror::Error;

use crate::capture::Frame;

#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("cannot listen on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Ingestion point of the presentation layer.
///
/// `add_image` must not block: it is called from the distribution loop and
/// any stall there backs up into acquisition.
pub trait Viewer: Send + Sync {
    fn add_image(&self, frame: Frame);
}

/// Starts the presentation layer.
pub trait ViewerServer: Send + Sync {
    fn start(&self, port: u16) -> Result<Arc<dyn Viewer>, ViewerError>;
}

/// Keeps the most recent frames for viewers to read.
///
/// The newest frame is readable without locking; a short history ring keeps
/// the last few for clients that want more than one.
pub struct RecentFrames {
    latest: ArcSwapOption<Frame>,
    history: Mutex<HeapRb<Arc<Frame>>>,
    received: AtomicU64,
}

impl RecentFrames {
    pub fn new(history: usize) -> Self {
        Self {
            latest: ArcSwapOption::empty(),
            history: Mutex::new(HeapRb::new(history.max(1))),
            received: AtomicU64::new(0),
        }
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.latest.load_full()
    }

    /// Buffered frames, oldest first.
    pub fn history(&self) -> Vec<Arc<Frame>> {
        self.history
            .lock()
            .map(|rb| rb.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().map(|rb| rb.occupied_len()).unwrap_or(0)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl Viewer for RecentFrames {
    fn add_image(&self, frame: Frame) {
        let frame = Arc::new(frame);
        self.latest.store(Some(frame.clone()));
        if let Ok(mut rb) = self.history.lock() {
            rb.push_overwrite(frame);
        }
        self.received.fetch_add(1, Ordering::Relaxed);
    }
}
