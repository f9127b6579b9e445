//! Bounded frame hand-off between acquisition and distribution

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{Receiver, Selector, Sender, TrySendError};
use serde::Deserialize;
use tracing::trace;

use crate::capture::Frame;
use crate::shutdown::Shutdown;

/// What a push does when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BackpressurePolicy {
    /// Wait for space. Stalls acquisition for as long as the consumer does.
    Block,
    /// Wait up to the push timeout, then discard the new frame.
    BlockTimeout,
    /// Evict the oldest queued frame to make room.
    DropOldest,
    /// Discard the new frame.
    DropNewest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Enqueued without loss.
    Queued,
    /// Enqueued after evicting the oldest frame.
    Evicted,
    /// Buffer full, new frame discarded.
    Rejected,
    /// Buffer stayed full for the whole push timeout, new frame discarded.
    TimedOut,
    /// Shutdown fired while waiting, new frame discarded.
    Cancelled,
}

impl PushOutcome {
    pub fn is_queued(self) -> bool {
        matches!(self, PushOutcome::Queued | PushOutcome::Evicted)
    }

    /// Whether some frame, old or new, was lost by this push.
    pub fn lost_frame(self) -> bool {
        self != PushOutcome::Queued
    }
}

#[derive(Default)]
struct Stats {
    pushed: AtomicU64,
    popped: AtomicU64,
    evicted: AtomicU64,
    rejected: AtomicU64,
    high_water: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStats {
    pub pushed: u64,
    pub popped: u64,
    pub evicted: u64,
    /// Rejected, timed out or cancelled pushes.
    pub rejected: u64,
    pub high_water: usize,
}

impl BufferStats {
    pub fn dropped(&self) -> u64 {
        self.evicted + self.rejected
    }
}

/// Bounded FIFO of frames.
///
/// Cloning yields another handle to the same queue. The queue never holds
/// more than `capacity` frames; when full, pushes follow the configured
/// [`BackpressurePolicy`]. Blocking pushes and pops wake up when the
/// shutdown signal fires.
#[derive(Clone)]
pub struct FrameBuffer {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    capacity: usize,
    policy: BackpressurePolicy,
    push_timeout: Duration,
    shutdown: Shutdown,
    stats: Arc<CachePadded<Stats>>,
}

impl FrameBuffer {
    pub fn new(
        capacity: usize,
        policy: BackpressurePolicy,
        push_timeout: Duration,
        shutdown: Shutdown,
    ) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = flume::bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            policy,
            push_timeout,
            shutdown,
            stats: Arc::new(CachePadded::new(Stats::default())),
        }
    }

    /// Producer: push a frame at the tail.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        let outcome = match self.tx.try_send(frame) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Full(frame)) => self.push_full(frame),
            // Both ends live in self, so the channel cannot disconnect.
            Err(TrySendError::Disconnected(_)) => PushOutcome::Cancelled,
        };
        self.record(outcome);
        outcome
    }

    fn push_full(&self, frame: Frame) -> PushOutcome {
        match self.policy {
            BackpressurePolicy::DropNewest => PushOutcome::Rejected,
            BackpressurePolicy::DropOldest => self.push_evicting(frame),
            BackpressurePolicy::Block => Selector::new()
                .send(&self.tx, frame, |r| match r {
                    Ok(()) => PushOutcome::Queued,
                    Err(_) => PushOutcome::Cancelled,
                })
                .recv(self.shutdown.listener(), |_| PushOutcome::Cancelled)
                .wait(),
            BackpressurePolicy::BlockTimeout => Selector::new()
                .send(&self.tx, frame, |r| match r {
                    Ok(()) => PushOutcome::Queued,
                    Err(_) => PushOutcome::Cancelled,
                })
                .recv(self.shutdown.listener(), |_| PushOutcome::Cancelled)
                .wait_timeout(self.push_timeout)
                .unwrap_or(PushOutcome::TimedOut),
        }
    }

    fn push_evicting(&self, mut frame: Frame) -> PushOutcome {
        let mut evicted = false;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => {
                    return if evicted {
                        PushOutcome::Evicted
                    } else {
                        PushOutcome::Queued
                    };
                }
                Err(TrySendError::Full(back)) => {
                    frame = back;
                    // The consumer may win the race for the head; either way
                    // a slot frees up.
                    if let Ok(old) = self.rx.try_recv() {
                        trace!(sequence = old.sequence, "evicted oldest frame");
                        self.stats.evicted.fetch_add(1, Ordering::Relaxed);
                        evicted = true;
                    }
                }
                Err(TrySendError::Disconnected(_)) => return PushOutcome::Cancelled,
            }
        }
    }

    fn record(&self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Queued | PushOutcome::Evicted => {
                self.stats.pushed.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .high_water
                    .fetch_max(self.rx.len(), Ordering::Relaxed);
            }
            PushOutcome::Rejected | PushOutcome::TimedOut | PushOutcome::Cancelled => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            }
        }
        if outcome != PushOutcome::Queued {
            metrics::counter!("lepton_frames_dropped").increment(1);
        }
    }

    /// Consumer: pop the head, blocking until a frame arrives.
    ///
    /// Returns `None` once shutdown has fired.
    pub fn pop(&self) -> Option<Frame> {
        if self.shutdown.is_triggered() {
            return None;
        }
        let frame = Selector::new()
            .recv(&self.rx, |r| r.ok())
            .recv(self.shutdown.listener(), |_| None)
            .wait()?;
        self.stats.popped.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<Frame> {
        let frame = self.rx.try_recv().ok()?;
        self.stats.popped.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            pushed: self.stats.pushed.load(Ordering::Relaxed),
            popped: self.stats.popped.load(Ordering::Relaxed),
            evicted: self.stats.evicted.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            high_water: self.stats.high_water.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Bounds;
    use crate::shutdown::ShutdownReason;
    use std::thread;
    use std::time::Instant;

    const CAPACITY: usize = 4;

    fn frame(sequence: u64) -> Frame {
        let mut f = Frame::new(Bounds::new(2, 2));
        f.sequence = sequence;
        f
    }

    fn buffer(policy: BackpressurePolicy) -> FrameBuffer {
        FrameBuffer::new(CAPACITY, policy, Duration::from_millis(50), Shutdown::new())
    }

    fn fill(buf: &FrameBuffer) {
        for seq in 0..CAPACITY as u64 {
            assert_eq!(buf.push(frame(seq)), PushOutcome::Queued);
        }
    }

    fn drain(buf: &FrameBuffer) -> Vec<u64> {
        std::iter::from_fn(|| buf.try_pop()).map(|f| f.sequence).collect()
    }

    #[test]
    fn drop_oldest_evicts_head() {
        let buf = buffer(BackpressurePolicy::DropOldest);
        fill(&buf);
        assert_eq!(buf.push(frame(4)), PushOutcome::Evicted);
        assert_eq!(buf.len(), CAPACITY);
        assert_eq!(drain(&buf), vec![1, 2, 3, 4]);
        assert_eq!(buf.stats().evicted, 1);
    }

    #[test]
    fn drop_newest_rejects_tail() {
        let buf = buffer(BackpressurePolicy::DropNewest);
        fill(&buf);
        assert_eq!(buf.push(frame(4)), PushOutcome::Rejected);
        assert_eq!(drain(&buf), vec![0, 1, 2, 3]);
        assert_eq!(buf.stats().rejected, 1);
    }

    #[test]
    fn block_timeout_gives_up() {
        let buf = buffer(BackpressurePolicy::BlockTimeout);
        fill(&buf);
        let start = Instant::now();
        assert_eq!(buf.push(frame(4)), PushOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(drain(&buf), vec![0, 1, 2, 3]);
    }

    #[test]
    fn block_waits_for_pop() {
        let buf = buffer(BackpressurePolicy::Block);
        fill(&buf);

        let producer = {
            let buf = buf.clone();
            thread::spawn(move || buf.push(frame(4)))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());
        assert_eq!(buf.len(), CAPACITY);

        assert_eq!(buf.pop().map(|f| f.sequence), Some(0));
        assert_eq!(producer.join().unwrap(), PushOutcome::Queued);
        assert_eq!(drain(&buf), vec![1, 2, 3, 4]);
    }

    #[test]
    fn block_wakes_on_shutdown() {
        let shutdown = Shutdown::new();
        let buf = FrameBuffer::new(
            1,
            BackpressurePolicy::Block,
            Duration::ZERO,
            shutdown.clone(),
        );
        assert_eq!(buf.push(frame(0)), PushOutcome::Queued);

        let producer = {
            let buf = buf.clone();
            thread::spawn(move || buf.push(frame(1)))
        };
        thread::sleep(Duration::from_millis(20));
        shutdown.trigger(ShutdownReason::Interrupt);
        assert_eq!(producer.join().unwrap(), PushOutcome::Cancelled);
    }

    #[test]
    fn pop_returns_none_after_shutdown() {
        let shutdown = Shutdown::new();
        let buf = FrameBuffer::new(
            2,
            BackpressurePolicy::DropOldest,
            Duration::ZERO,
            shutdown.clone(),
        );
        let consumer = {
            let buf = buf.clone();
            thread::spawn(move || buf.pop())
        };
        thread::sleep(Duration::from_millis(20));
        shutdown.trigger(ShutdownReason::Reload);
        assert!(consumer.join().unwrap().is_none());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let buf = FrameBuffer::new(
            0,
            BackpressurePolicy::DropNewest,
            Duration::ZERO,
            Shutdown::new(),
        );
        assert_eq!(buf.capacity(), 1);
        assert_eq!(buf.push(frame(0)), PushOutcome::Queued);
        assert_eq!(buf.push(frame(1)), PushOutcome::Rejected);
    }
}
