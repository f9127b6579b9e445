//! Boundary to the device driver.
//!
//! The pipeline only needs four things from a driver: bring up the host bus
//! subsystem, open a bus by name, build a device on top of an SPI and an I²C
//! bus, and fill frames. Everything behind these traits (register access,
//! packet sync, VoSPI decoding) belongs to the driver.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::frame::{Bounds, Frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusKind {
    Spi,
    I2c,
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusKind::Spi => f.write_str("SPI"),
            BusKind::I2c => f.write_str("I²C"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no {kind} bus named {name:?}")]
    NoSuchBus { kind: BusKind, name: String },

    #[error("no {0} bus found")]
    NoBusFound(BusKind),

    #[error("{0} bus is closed")]
    BusClosed(BusKind),

    #[error("host initialization failed: {0}")]
    HostInit(String),

    #[error("camera did not respond: {0}")]
    NotDetected(String),

    #[error("frame acquisition failed: {0}")]
    Frame(String),

    #[error("lost VoSPI sync after {0} discard packets")]
    SyncLost(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An opened transport. Closing is idempotent; the first call releases the
/// underlying resource and later calls are no-ops.
pub trait Bus: Send + Sync + fmt::Debug {
    fn kind(&self) -> BusKind;
    fn name(&self) -> &str;
    fn close(&self) -> Result<(), DeviceError>;
    fn is_closed(&self) -> bool;
}

/// The logical camera.
pub trait Device: Send {
    fn bounds(&self) -> Bounds;

    /// Blocks until the next frame has been written into `frame`.
    fn next_frame(&mut self, frame: &mut Frame) -> Result<(), DeviceError>;
}

/// Host platform: bus registry plus device constructor.
pub trait Host: Send + Sync {
    /// Process-wide bus subsystem setup. Safe to call more than once.
    fn init(&self) -> Result<(), DeviceError>;

    /// Opens a bus. An empty `name` selects the first available bus of `kind`.
    fn open_bus(&self, kind: BusKind, name: &str) -> Result<Arc<dyn Bus>, DeviceError>;

    fn new_device(
        &self,
        spi: Arc<dyn Bus>,
        i2c: Arc<dyn Bus>,
    ) -> Result<Box<dyn Device>, DeviceError>;
}
