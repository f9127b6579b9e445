//! Startup, steady state and shutdown of the streamer.
//!
//! ```text
//! Configuring → AcquiringResources → Running → ShuttingDown → Terminated
//! ```
//!
//! Every resource acquired during startup registers its release on a
//! [`CleanupStack`]; the stack unwinds on every exit path, after the
//! acquisition thread (and with it the device) is gone.

use std::sync::Arc;
use std::thread;

use crossbeam::atomic::AtomicCell;
use tracing::{info, warn};

use crate::capture::{BusKind, Host};
use crate::display::ViewerServer;
use crate::pipeline::{Pipeline, PipelineReport};
use crate::scope::CleanupStack;
use crate::shutdown::{Shutdown, ShutdownReason};
use crate::watch::{ReloadWatch, WatchError};
use crate::{Config, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Configuring,
    AcquiringResources,
    Running,
    ShuttingDown,
    Terminated,
}

/// How a run ended.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub reason: ShutdownReason,
    pub pipeline: PipelineReport,
}

pub struct Lifecycle {
    config: Config,
    shutdown: Shutdown,
    state: Arc<AtomicCell<LifecycleState>>,
}

impl Lifecycle {
    pub fn new(config: Config, shutdown: Shutdown) -> Self {
        Self {
            config,
            shutdown,
            state: Arc::new(AtomicCell::new(LifecycleState::Configuring)),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.load()
    }

    /// Shared view of the state for observers on other threads.
    pub fn state_handle(&self) -> Arc<AtomicCell<LifecycleState>> {
        self.state.clone()
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    fn enter(&self, state: LifecycleState) {
        let previous = self.state.swap(state);
        if previous != state {
            info!(from = ?previous, to = ?state, "Lifecycle transition");
        }
    }

    /// Runs until the reload watch returns or the shutdown signal fires.
    ///
    /// Returns `Ok` for an orderly stop (reload or interrupt) and the first
    /// fatal error otherwise. Bus handles are closed before this returns in
    /// both cases.
    pub fn run(
        &self,
        host: &dyn Host,
        server: &dyn ViewerServer,
        watch: Box<dyn ReloadWatch>,
    ) -> Result<RunSummary> {
        self.enter(LifecycleState::AcquiringResources);
        let mut resources = CleanupStack::new();

        let result = self.run_with(host, server, watch, &mut resources);

        self.enter(LifecycleState::ShuttingDown);
        // Loops that are still blocked must see the signal too.
        self.shutdown.trigger(ShutdownReason::StartupFailed);
        let failures = resources.unwind();
        if !failures.is_empty() {
            warn!(count = failures.len(), "Some resources failed to release");
        }
        self.enter(LifecycleState::Terminated);
        result
    }

    fn run_with(
        &self,
        host: &dyn Host,
        server: &dyn ViewerServer,
        watch: Box<dyn ReloadWatch>,
        resources: &mut CleanupStack,
    ) -> Result<RunSummary> {
        host.init().map_err(Error::Host)?;

        let spi = host
            .open_bus(BusKind::Spi, &self.config.spi)
            .map_err(|source| Error::OpenBus {
                kind: BusKind::Spi,
                source,
            })?;
        {
            let spi = spi.clone();
            resources.push(format!("SPI bus {}", spi.name()), move || spi.close());
        }

        let i2c = host
            .open_bus(BusKind::I2c, &self.config.i2c)
            .map_err(|source| Error::OpenBus {
                kind: BusKind::I2c,
                source,
            })?;
        {
            let i2c = i2c.clone();
            resources.push(format!("I²C bus {}", i2c.name()), move || i2c.close());
        }

        let device = host
            .new_device(spi, i2c)
            .map_err(|source| Error::Device { source })?;
        info!(bounds = ?device.bounds(), "Camera ready");

        // The distribution loop needs the viewer handle, so the presentation
        // layer comes up just before the loops do.
        let viewer = server.start(self.config.port)?;

        let pipeline = Pipeline::start(device, viewer, &self.config.pipeline, &self.shutdown)
            .map_err(|source| Error::Thread {
                what: "pipeline",
                source,
            })?;

        let (watch_err_tx, watch_err_rx) = flume::bounded::<WatchError>(1);
        let spawned = {
            let shutdown = self.shutdown.clone();
            let mut watch = watch;
            thread::Builder::new()
                .name("lepton-watch".into())
                .spawn(move || {
                    let reason = match watch.wait_for_change() {
                        Ok(()) => ShutdownReason::Reload,
                        Err(e) => {
                            let reason = ShutdownReason::WatchFailed(e.to_string());
                            let _ = watch_err_tx.send(e);
                            reason
                        }
                    };
                    shutdown.trigger(reason);
                })
        };
        if let Err(source) = spawned {
            self.shutdown.trigger(ShutdownReason::StartupFailed);
            pipeline.join();
            return Err(Error::Thread {
                what: "reload watch",
                source,
            });
        }

        self.enter(LifecycleState::Running);
        let reason = self.shutdown.wait();

        self.enter(LifecycleState::ShuttingDown);
        info!(%reason, "Shutting down");
        let report = pipeline.join();
        info!(
            acquired = report.acquisition.acquired,
            failed = report.acquisition.failed,
            delivered = report.delivered,
            dropped = report.buffer.dropped(),
            high_water = report.buffer.high_water,
            "Pipeline stopped"
        );

        // The watch thread is left behind when something else ended the run;
        // it holds no bus resources.
        if let Ok(e) = watch_err_rx.try_recv() {
            return Err(Error::Watch(e));
        }

        Ok(RunSummary {
            reason,
            pipeline: report,
        })
    }
}
