//! Frame pipeline: acquisition thread → bounded buffer → distribution thread.

pub mod acquire;
pub mod breaker;
pub mod buffer;
pub mod distribute;

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{error, info};

pub use acquire::{AcquisitionLoop, AcquisitionReport};
pub use breaker::FailureBreaker;
pub use buffer::{BackpressurePolicy, BufferStats, FrameBuffer, PushOutcome};
pub use distribute::DistributionLoop;

use crate::capture::Device;
use crate::display::Viewer;
use crate::shutdown::Shutdown;
use crate::PipelineConfig;

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineReport {
    pub acquisition: AcquisitionReport,
    pub delivered: u64,
    pub buffer: BufferStats,
}

/// Both loops, running.
pub struct Pipeline {
    buffer: FrameBuffer,
    acquire: Option<JoinHandle<AcquisitionReport>>,
    distribute: Option<JoinHandle<u64>>,
}

impl Pipeline {
    /// Starts acquisition and distribution threads connected by a fresh
    /// [`FrameBuffer`]. Both stop when `shutdown` fires.
    pub fn start(
        device: Box<dyn Device>,
        viewer: Arc<dyn Viewer>,
        config: &PipelineConfig,
        shutdown: &Shutdown,
    ) -> std::io::Result<Self> {
        let buffer = FrameBuffer::new(
            config.capacity(),
            config.policy,
            config.push_timeout(),
            shutdown.clone(),
        );
        info!(
            capacity = buffer.capacity(),
            policy = ?buffer.policy(),
            "Frame buffer ready"
        );

        let distribute = DistributionLoop::new(buffer.clone(), viewer).spawn()?;
        let acquire = AcquisitionLoop::new(
            device,
            buffer.clone(),
            shutdown.clone(),
            config.breaker(),
        )
        .spawn(config.acquisition_cpu);

        let acquire = match acquire {
            Ok(handle) => handle,
            Err(e) => {
                // Unblock the distribution thread before bailing out.
                shutdown.trigger(crate::shutdown::ShutdownReason::StartupFailed);
                let _ = distribute.join();
                return Err(e);
            }
        };

        Ok(Self {
            buffer,
            acquire: Some(acquire),
            distribute: Some(distribute),
        })
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Joins both threads. The caller must have fired the shutdown signal.
    ///
    /// Returns only after the in-flight driver call has completed, so the
    /// device is dropped before this returns.
    pub fn join(mut self) -> PipelineReport {
        let delivered = match self.distribute.take().map(JoinHandle::join) {
            Some(Ok(n)) => n,
            Some(Err(_)) => {
                error!("Distribution thread panicked");
                0
            }
            None => 0,
        };
        let acquisition = match self.acquire.take().map(JoinHandle::join) {
            Some(Ok(report)) => report,
            Some(Err(_)) => {
                error!("Acquisition thread panicked");
                AcquisitionReport::default()
            }
            None => AcquisitionReport::default(),
        };
        PipelineReport {
            acquisition,
            delivered,
            buffer: self.buffer.stats(),
        }
    }
}
