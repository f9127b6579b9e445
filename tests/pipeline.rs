//! End-to-end tests of the acquisition → buffer → distribution path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lepton_stream::capture::{Bounds, Device, DeviceError, Frame};
use lepton_stream::display::Viewer;
use lepton_stream::pipeline::{BackpressurePolicy, Pipeline};
use lepton_stream::{PipelineConfig, Shutdown, ShutdownReason};

/// Produces `total` attempts, failing the listed ones, then blocks until
/// shutdown like a driver waiting on a silent bus.
struct ScriptedDevice {
    attempt: u64,
    total: u64,
    fail: Vec<u64>,
    shutdown: Shutdown,
}

impl ScriptedDevice {
    fn new(total: u64, fail: Vec<u64>, shutdown: &Shutdown) -> Box<Self> {
        Box::new(Self {
            attempt: 0,
            total,
            fail,
            shutdown: shutdown.clone(),
        })
    }
}

impl Device for ScriptedDevice {
    fn bounds(&self) -> Bounds {
        Bounds::new(4, 3)
    }

    fn next_frame(&mut self, frame: &mut Frame) -> Result<(), DeviceError> {
        if self.attempt >= self.total {
            self.shutdown.wait();
            return Err(DeviceError::Frame("script finished".into()));
        }
        let attempt = self.attempt;
        self.attempt += 1;
        if self.fail.contains(&attempt) {
            return Err(DeviceError::SyncLost(3));
        }
        frame.pixels.fill(attempt as u16);
        Ok(())
    }
}

/// Forwards frames to a channel after an optional delay.
struct ChannelViewer {
    tx: flume::Sender<Frame>,
    delay: Duration,
}

impl Viewer for ChannelViewer {
    fn add_image(&self, frame: Frame) {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let _ = self.tx.send(frame);
    }
}

fn viewer(delay: Duration) -> (Arc<dyn Viewer>, flume::Receiver<Frame>) {
    let (tx, rx) = flume::unbounded();
    (Arc::new(ChannelViewer { tx, delay }), rx)
}

fn config(capacity: usize, policy: BackpressurePolicy) -> PipelineConfig {
    PipelineConfig {
        capacity: Some(capacity),
        policy,
        failure_threshold: 0,
        ..PipelineConfig::default()
    }
}

fn collect(rx: &flume::Receiver<Frame>, n: usize) -> Vec<Frame> {
    (0..n)
        .map_while(|_| rx.recv_timeout(Duration::from_secs(10)).ok())
        .collect()
}

#[test]
fn one_bad_frame_in_ten_is_skipped() {
    let shutdown = Shutdown::new();
    let (viewer, rx) = viewer(Duration::ZERO);
    let device = ScriptedDevice::new(10, vec![4], &shutdown);
    let pipeline = Pipeline::start(
        device,
        viewer,
        &config(16, BackpressurePolicy::DropOldest),
        &shutdown,
    )
    .unwrap();

    let frames = collect(&rx, 9);
    shutdown.trigger(ShutdownReason::Interrupt);
    let report = pipeline.join();

    let fills: Vec<u16> = frames.iter().map(|f| f.pixels[0]).collect();
    let sequences: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
    assert_eq!(fills, vec![0, 1, 2, 3, 5, 6, 7, 8, 9]);
    assert_eq!(sequences, (0..9).collect::<Vec<_>>());
    assert_eq!(report.acquisition.acquired, 9);
    assert_eq!(report.delivered, 9);
    assert!(rx.try_recv().is_err());
}

#[test]
fn slow_consumer_sees_fifo_and_bounded_buffer() {
    const CAPACITY: usize = 8;
    const FRAMES: u64 = 120;

    let shutdown = Shutdown::new();
    let (viewer, rx) = viewer(Duration::from_millis(1));
    let device = ScriptedDevice::new(FRAMES, vec![], &shutdown);
    let pipeline = Pipeline::start(
        device,
        viewer,
        &config(CAPACITY, BackpressurePolicy::Block),
        &shutdown,
    )
    .unwrap();

    let buffer = pipeline.buffer().clone();
    let sampling = Arc::new(AtomicBool::new(true));
    let sampler = {
        let sampling = sampling.clone();
        thread::spawn(move || {
            let mut max = 0;
            while sampling.load(Ordering::Relaxed) {
                max = max.max(buffer.len());
                thread::yield_now();
            }
            max
        })
    };

    let frames = collect(&rx, FRAMES as usize);
    sampling.store(false, Ordering::Relaxed);
    shutdown.trigger(ShutdownReason::Interrupt);
    let report = pipeline.join();
    let observed_max = sampler.join().unwrap();

    let sequences: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
    assert_eq!(sequences, (0..FRAMES).collect::<Vec<_>>());
    assert!(observed_max <= CAPACITY);
    assert!(report.buffer.high_water <= CAPACITY);
    assert_eq!(report.buffer.dropped(), 0);
}

#[test]
fn drop_oldest_keeps_order_and_accounts_for_every_frame() {
    const FRAMES: u64 = 200;

    let shutdown = Shutdown::new();
    let (viewer, rx) = viewer(Duration::from_millis(2));
    let device = ScriptedDevice::new(FRAMES, vec![], &shutdown);
    let pipeline = Pipeline::start(
        device,
        viewer,
        &config(4, BackpressurePolicy::DropOldest),
        &shutdown,
    )
    .unwrap();

    // Wait for the producer to finish its script and the buffer to drain.
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut received = Vec::new();
    while Instant::now() < deadline {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(frame) => received.push(frame.sequence),
            Err(_) if pipeline.buffer().stats().pushed == FRAMES => break,
            Err(_) => {}
        }
    }
    shutdown.trigger(ShutdownReason::Interrupt);
    let report = pipeline.join();

    assert!(received.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(received.last().copied(), Some(FRAMES - 1));
    assert_eq!(report.buffer.pushed, FRAMES);
    assert_eq!(
        report.delivered + report.buffer.evicted,
        FRAMES,
        "every pushed frame is either delivered or evicted"
    );
}

#[test]
fn shutdown_stops_both_loops_promptly() {
    let shutdown = Shutdown::new();
    let (viewer, _rx) = viewer(Duration::ZERO);
    let device = ScriptedDevice::new(0, vec![], &shutdown);
    let pipeline = Pipeline::start(
        device,
        viewer,
        &config(4, BackpressurePolicy::Block),
        &shutdown,
    )
    .unwrap();

    thread::sleep(Duration::from_millis(20));
    let start = Instant::now();
    shutdown.trigger(ShutdownReason::Interrupt);
    let report = pipeline.join();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(report.delivered, 0);
    assert_eq!(report.acquisition.acquired, 0);
}
