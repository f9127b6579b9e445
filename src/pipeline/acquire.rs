//! Acquisition loop: keeps the camera serviced and feeds the frame buffer.

use std::io;
use std::thread::{self, JoinHandle};

use tracing::{debug, debug_span, info, warn};

use super::breaker::FailureBreaker;
use super::buffer::{FrameBuffer, PushOutcome};
use crate::capture::{Device, Frame};
use crate::shutdown::Shutdown;

/// Counters returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionReport {
    pub acquired: u64,
    pub failed: u64,
    /// Pushes that lost a frame, evictions included.
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Pushed(PushOutcome),
    Failed,
    Stopped,
}

pub struct AcquisitionLoop {
    device: Box<dyn Device>,
    buffer: FrameBuffer,
    shutdown: Shutdown,
    breaker: FailureBreaker,
    report: AcquisitionReport,
}

impl AcquisitionLoop {
    pub fn new(
        device: Box<dyn Device>,
        buffer: FrameBuffer,
        shutdown: Shutdown,
        breaker: FailureBreaker,
    ) -> Self {
        Self {
            device,
            buffer,
            shutdown,
            breaker,
            report: AcquisitionReport::default(),
        }
    }

    /// One iteration: fresh frame, blocking fill, push.
    pub fn step(&mut self) -> Step {
        if self.shutdown.is_triggered() {
            return Step::Stopped;
        }

        // Always a new allocation: the previous frame may still be in flight
        // to the viewer.
        let mut frame = Frame::new(self.device.bounds());
        let result = {
            let _span = debug_span!("next_frame").entered();
            self.device.next_frame(&mut frame)
        };

        if let Err(e) = result {
            self.report.failed += 1;
            metrics::counter!("lepton_frame_errors").increment(1);
            debug!(error = %e, "frame acquisition failed");
            if let Some(pause) = self.breaker.record_failure() {
                if self.shutdown.wait_timeout(pause).is_some() {
                    return Step::Stopped;
                }
            }
            return Step::Failed;
        }
        self.breaker.record_success();

        frame.sequence = self.report.acquired;
        self.report.acquired += 1;
        metrics::counter!("lepton_frames_acquired").increment(1);

        let outcome = {
            let _span = debug_span!("push", sequence = frame.sequence).entered();
            self.buffer.push(frame)
        };
        if outcome.lost_frame() {
            self.report.dropped += 1;
            debug!(?outcome, "frame lost at push");
        }
        Step::Pushed(outcome)
    }

    /// Runs until shutdown fires.
    ///
    /// The driver call itself cannot be interrupted, so after the signal the
    /// loop exits only once the in-flight `next_frame` returns.
    pub fn run(mut self) -> AcquisitionReport {
        info!(bounds = ?self.device.bounds(), "Acquisition loop started");
        while self.step() != Step::Stopped {}
        info!(
            acquired = self.report.acquired,
            failed = self.report.failed,
            dropped = self.report.dropped,
            "Acquisition loop stopped"
        );
        self.report
    }

    /// Runs the loop on a dedicated thread, optionally pinned to `cpu`.
    pub fn spawn(self, cpu: Option<usize>) -> io::Result<JoinHandle<AcquisitionReport>> {
        thread::Builder::new()
            .name("lepton-acquire".into())
            .spawn(move || {
                if let Some(id) = cpu {
                    if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                        warn!(cpu = id, "Failed to pin acquisition thread");
                    }
                }
                self.run()
            })
    }

    pub fn report(&self) -> AcquisitionReport {
        self.report
    }
}
