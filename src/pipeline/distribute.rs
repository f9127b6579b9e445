//! Distribution loop: moves frames from the buffer to the viewer.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug_span, info};

use super::buffer::FrameBuffer;
use crate::display::Viewer;

pub struct DistributionLoop {
    buffer: FrameBuffer,
    viewer: Arc<dyn Viewer>,
    delivered: u64,
}

impl DistributionLoop {
    pub fn new(buffer: FrameBuffer, viewer: Arc<dyn Viewer>) -> Self {
        Self {
            buffer,
            viewer,
            delivered: 0,
        }
    }

    /// Forwards frames until the buffer reports shutdown. Returns the number
    /// of frames handed to the viewer.
    pub fn run(mut self) -> u64 {
        info!("Distribution loop started");
        while let Some(frame) = self.buffer.pop() {
            let _span = debug_span!("add_image", sequence = frame.sequence).entered();
            self.viewer.add_image(frame);
            self.delivered += 1;
            metrics::counter!("lepton_frames_distributed").increment(1);
        }
        info!(
            delivered = self.delivered,
            left_in_buffer = self.buffer.len(),
            "Distribution loop stopped"
        );
        self.delivered
    }

    pub fn spawn(self) -> io::Result<JoinHandle<u64>> {
        thread::Builder::new()
            .name("lepton-distribute".into())
            .spawn(move || self.run())
    }
}
