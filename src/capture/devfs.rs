//! Linux character-device buses.
//!
//! Opens `/dev/spidevB.C` and `/dev/i2c-N` nodes so the bus lifecycle is
//! real, but no Lepton protocol driver is linked into this build; device
//! construction therefore reports the camera as not detected.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::device::{Bus, BusKind, Device, DeviceError, Host};

const DEV_DIR: &str = "/dev";

#[derive(Debug)]
pub struct DevBus {
    kind: BusKind,
    name: String,
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl Bus for DevBus {
    fn kind(&self) -> BusKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&self) -> Result<(), DeviceError> {
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if file.take().is_some() {
            debug!(path = %self.path.display(), "closed {} bus", self.kind);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

/// Host backed by device nodes under a root directory (normally `/dev`).
pub struct DevHost {
    root: PathBuf,
}

impl DevHost {
    pub fn new() -> Self {
        Self::with_root(DEV_DIR)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn prefix(kind: BusKind) -> &'static str {
        match kind {
            BusKind::Spi => "spidev",
            BusKind::I2c => "i2c-",
        }
    }

    /// Maps a user supplied identifier to a node path.
    ///
    /// Accepts a full path, a node name (`spidev0.0`, `i2c-1`) or the bare
    /// bus number (`0.0`, `1`).
    fn resolve(&self, kind: BusKind, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let prefix = Self::prefix(kind);
        if name.starts_with(prefix) {
            self.root.join(name)
        } else {
            self.root.join(format!("{prefix}{name}"))
        }
    }

    /// Auto-detect the first bus node of `kind`
    fn auto_detect(&self, kind: BusKind) -> Result<PathBuf, DeviceError> {
        info!("Auto-detecting {} bus...", kind);
        let prefix = Self::prefix(kind);
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
            .map(|entry| entry.path())
            .collect();
        candidates.sort();
        candidates
            .into_iter()
            .next()
            .ok_or(DeviceError::NoBusFound(kind))
    }
}

impl Default for DevHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for DevHost {
    fn init(&self) -> Result<(), DeviceError> {
        if !self.root.is_dir() {
            return Err(DeviceError::HostInit(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }

    fn open_bus(&self, kind: BusKind, name: &str) -> Result<Arc<dyn Bus>, DeviceError> {
        let path = if name.is_empty() {
            self.auto_detect(kind)?
        } else {
            let path = self.resolve(kind, name);
            if !path.exists() {
                return Err(DeviceError::NoSuchBus {
                    kind,
                    name: name.to_string(),
                });
            }
            path
        };

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        info!(path = %path.display(), "Opened {} bus", kind);

        Ok(Arc::new(DevBus {
            kind,
            name,
            path,
            file: Mutex::new(Some(file)),
        }))
    }

    fn new_device(
        &self,
        _spi: Arc<dyn Bus>,
        i2c: Arc<dyn Bus>,
    ) -> Result<Box<dyn Device>, DeviceError> {
        Err(DeviceError::NotDetected(format!(
            "no Lepton protocol driver available for {}",
            i2c.name()
        )))
    }
}
