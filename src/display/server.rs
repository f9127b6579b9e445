use std::io;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::viewer::{RecentFrames, Viewer, ViewerError, ViewerServer};
use crate::capture::Frame;

/// Presentation layer that claims the listening port and feeds a shared
/// [`RecentFrames`] store.
///
/// The wire protocol spoken on the port belongs to the viewer front end.
/// Until one is attached the port is only reserved: connections are
/// accepted and closed at once so clients fail fast instead of hanging. A
/// port conflict fails startup instead of surfacing later.
pub struct PortServer {
    store: Arc<RecentFrames>,
}

impl PortServer {
    pub fn new(store: Arc<RecentFrames>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<RecentFrames> {
        &self.store
    }
}

const ACCEPT_POLL: Duration = Duration::from_millis(50);

struct PortViewer {
    store: Arc<RecentFrames>,
    stop: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl Drop for PortViewer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
    }
}

fn accept_and_close(listener: TcpListener, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "closing viewer connection");
                drop(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!(error = %e, "viewer accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

impl Viewer for PortViewer {
    fn add_image(&self, frame: Frame) {
        self.store.add_image(frame);
    }
}

impl ViewerServer for PortServer {
    fn start(&self, port: u16) -> Result<Arc<dyn Viewer>, ViewerError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|source| ViewerError::Bind { port, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| ViewerError::Bind { port, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ViewerError::Bind { port, source })?;
        info!(%addr, "Viewer listening");

        let stop = Arc::new(AtomicBool::new(false));
        let acceptor = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("lepton-viewer".into())
                .spawn(move || accept_and_close(listener, stop))
                .map_err(|source| ViewerError::Bind { port, source })?
        };

        Ok(Arc::new(PortViewer {
            store: self.store.clone(),
            stop,
            acceptor: Some(acceptor),
        }))
    }
}
