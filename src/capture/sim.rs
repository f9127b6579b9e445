//! Simulated Lepton host for running without hardware.
//!
//! Produces an 80x60 14-bit scene with a warm spot drifting across a
//! gradient background, paced to the sensor's native rate. Failure hooks
//! let tests exercise the error paths of the pipeline and lifecycle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info};

use super::device::{Bus, BusKind, Device, DeviceError, Host};
use super::frame::{Bounds, Frame, SAMPLE_MAX};

/// Lepton 2.x native resolution.
pub const LEPTON_BOUNDS: Bounds = Bounds::new(80, 60);

/// Largest simulated frame side.
pub const MAX_SIDE: u32 = 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub width: u32,
    pub height: u32,
    /// Frames per second; 0 delivers frames as fast as they are requested.
    pub frame_rate: f64,
    pub spi_buses: Vec<String>,
    pub i2c_buses: Vec<String>,
    /// Pretend no camera answers on the buses.
    pub absent: bool,
    /// Zero-based `next_frame` call indexes that fail.
    pub fail_attempts: Vec<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            width: LEPTON_BOUNDS.width,
            height: LEPTON_BOUNDS.height,
            frame_rate: 8.6,
            spi_buses: vec!["SPI0.0".into()],
            i2c_buses: vec!["I2C1".into()],
            absent: false,
            fail_attempts: Vec::new(),
        }
    }
}

impl SimConfig {
    /// Frame period, `None` when unpaced.
    pub fn period(&self) -> Result<Option<Duration>, String> {
        if !self.frame_rate.is_finite() || self.frame_rate < 0.0 {
            return Err(format!(
                "sim frame_rate must be a finite number >= 0, got {}",
                self.frame_rate
            ));
        }
        if self.frame_rate == 0.0 {
            return Ok(None);
        }
        Duration::try_from_secs_f64(1.0 / self.frame_rate)
            .map(Some)
            .map_err(|_| format!("sim frame_rate {} is too small", self.frame_rate))
    }

    pub fn validate(&self) -> Result<(), String> {
        for (what, side) in [("width", self.width), ("height", self.height)] {
            if side == 0 || side > MAX_SIDE {
                return Err(format!(
                    "sim {what} must be between 1 and {MAX_SIDE}, got {side}"
                ));
            }
        }
        self.period().map(|_| ())
    }
}

#[derive(Debug)]
pub struct SimBus {
    kind: BusKind,
    name: String,
    closed: AtomicBool,
    close_count: AtomicU64,
}

impl SimBus {
    pub fn close_count(&self) -> u64 {
        self.close_count.load(Ordering::SeqCst)
    }
}

impl Bus for SimBus {
    fn kind(&self) -> BusKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&self) -> Result<(), DeviceError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_count.fetch_add(1, Ordering::SeqCst);
            debug!(bus = %self.name, "closed simulated {} bus", self.kind);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct SimHost {
    config: SimConfig,
    initialized: AtomicBool,
    opened: Mutex<Vec<Arc<SimBus>>>,
    devices_built: AtomicU64,
}

impl SimHost {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            initialized: AtomicBool::new(false),
            opened: Mutex::new(Vec::new()),
            devices_built: AtomicU64::new(0),
        }
    }

    /// Every bus handed out so far, in open order.
    pub fn opened_buses(&self) -> Vec<Arc<SimBus>> {
        self.opened
            .lock()
            .map(|buses| buses.clone())
            .unwrap_or_default()
    }

    pub fn devices_built(&self) -> u64 {
        self.devices_built.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn known_buses(&self, kind: BusKind) -> &[String] {
        match kind {
            BusKind::Spi => &self.config.spi_buses,
            BusKind::I2c => &self.config.i2c_buses,
        }
    }
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl Host for SimHost {
    fn init(&self) -> Result<(), DeviceError> {
        if !self.initialized.swap(true, Ordering::SeqCst) {
            info!("Simulated host initialized");
        }
        Ok(())
    }

    fn open_bus(&self, kind: BusKind, name: &str) -> Result<Arc<dyn Bus>, DeviceError> {
        let known = self.known_buses(kind);
        let name = if name.is_empty() {
            known.first().cloned().ok_or(DeviceError::NoBusFound(kind))?
        } else if known.iter().any(|n| n == name) {
            name.to_string()
        } else {
            return Err(DeviceError::NoSuchBus {
                kind,
                name: name.to_string(),
            });
        };

        let bus = Arc::new(SimBus {
            kind,
            name,
            closed: AtomicBool::new(false),
            close_count: AtomicU64::new(0),
        });
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(bus.clone());
        }
        debug!(bus = %bus.name, "opened simulated {} bus", kind);
        Ok(bus)
    }

    fn new_device(
        &self,
        spi: Arc<dyn Bus>,
        i2c: Arc<dyn Bus>,
    ) -> Result<Box<dyn Device>, DeviceError> {
        if self.config.absent {
            return Err(DeviceError::NotDetected(format!(
                "no reply on {} at address 0x2a",
                i2c.name()
            )));
        }
        self.config.validate().map_err(DeviceError::HostInit)?;
        let period = self.config.period().map_err(DeviceError::HostInit)?;
        self.devices_built.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SimDevice {
            spi,
            i2c,
            bounds: Bounds::new(self.config.width, self.config.height),
            period,
            next_deadline: None,
            attempts: 0,
            fail_attempts: self.config.fail_attempts.iter().copied().collect(),
        }))
    }
}

struct SimDevice {
    spi: Arc<dyn Bus>,
    i2c: Arc<dyn Bus>,
    bounds: Bounds,
    period: Option<Duration>,
    next_deadline: Option<Instant>,
    attempts: u64,
    fail_attempts: HashSet<u64>,
}

impl SimDevice {
    fn pace(&mut self) {
        let Some(period) = self.period else {
            return;
        };
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        // Skip missed slots instead of bursting to catch up.
        self.next_deadline = Some(deadline.max(now) + period);
    }

    fn render(&self, frame: &mut Frame) {
        let Bounds { width, height } = self.bounds;
        let t = self.attempts as f64 * 0.15;
        let spot_x = (width as f64 / 2.0) * (1.0 + 0.6 * t.cos());
        let spot_y = (height as f64 / 2.0) * (1.0 + 0.6 * (t * 0.7).sin());
        let radius = (width.min(height) as f64) / 6.0;

        for y in 0..height {
            for x in 0..width {
                // Room temperature background with a vertical gradient.
                let mut value = 7900.0 + 80.0 * (y as f64 / height.max(1) as f64);
                let dx = x as f64 - spot_x;
                let dy = y as f64 - spot_y;
                let d2 = (dx * dx + dy * dy) / (radius * radius);
                value += 1400.0 * (-d2).exp();
                frame.set(x, y, (value as u16).min(SAMPLE_MAX));
            }
        }
    }
}

impl Device for SimDevice {
    fn bounds(&self) -> Bounds {
        self.bounds
    }

    fn next_frame(&mut self, frame: &mut Frame) -> Result<(), DeviceError> {
        if self.spi.is_closed() {
            return Err(DeviceError::BusClosed(BusKind::Spi));
        }
        if self.i2c.is_closed() {
            return Err(DeviceError::BusClosed(BusKind::I2c));
        }
        if frame.bounds != self.bounds {
            return Err(DeviceError::Frame(format!(
                "buffer is {}x{}, sensor is {}x{}",
                frame.bounds.width, frame.bounds.height, self.bounds.width, self.bounds.height
            )));
        }

        self.pace();
        let attempt = self.attempts;
        self.attempts += 1;

        if self.fail_attempts.contains(&attempt) {
            return Err(DeviceError::SyncLost(attempt as u32 + 1));
        }
        self.render(frame);
        frame.acquired_at = Instant::now();
        Ok(())
    }
}
