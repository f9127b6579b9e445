use std::path::PathBuf;

use thiserror::Error;

use crate::capture::{BusKind, DeviceError};
use crate::display::ViewerError;
use crate::watch::WatchError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fatal errors. Reported once, by the binary's entry point.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{}", usage_message(.0))]
    Usage(clap::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("cannot create profile {path}: {source}")]
    Profile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("cannot install interrupt handler: {0}")]
    Interrupt(#[source] std::io::Error),

    #[error("{0}")]
    Host(#[source] DeviceError),

    #[error("cannot open {kind} bus: {source}")]
    OpenBus {
        kind: BusKind,
        #[source]
        source: DeviceError,
    },

    #[error("{source}; if testing without hardware, use --fake to simulate a camera")]
    Device {
        #[source]
        source: DeviceError,
    },

    #[error(transparent)]
    Viewer(#[from] ViewerError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("cannot start {what} thread: {source}")]
    Thread {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("lifecycle task panicked")]
    Panicked,
}

impl Error {
    /// True when the error suggests the camera is not connected.
    pub fn is_hardware_absent(&self) -> bool {
        matches!(self, Error::Device { .. })
    }
}

/// First line of a clap error without its `error: ` prefix.
fn usage_message(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let line = rendered.lines().next().unwrap_or_default();
    line.trim_start_matches("error: ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_carries_hint() {
        let err = Error::Device {
            source: DeviceError::NotDetected("no reply".into()),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("camera did not respond: no reply"));
        assert!(msg.contains("--fake"));
        assert!(err.is_hardware_absent());
    }

    #[test]
    fn bus_error_names_the_bus() {
        let err = Error::OpenBus {
            kind: BusKind::I2c,
            source: DeviceError::NoSuchBus {
                kind: BusKind::I2c,
                name: "I2C9".into(),
            },
        };
        assert_eq!(
            err.to_string(),
            "cannot open I²C bus: no I²C bus named \"I2C9\""
        );
        assert!(!err.is_hardware_absent());
    }
}
