//! Lepton thermal camera streaming pipeline.
//!
//! A dedicated thread keeps the camera's bus serviced and pushes every frame
//! into a bounded buffer; a second thread forwards frames to the viewer. The
//! [`lifecycle`] module wires the two together and owns startup and shutdown.

pub mod args;
pub mod capture;
pub mod display;
pub mod error;
pub mod interrupt;
pub mod lifecycle;
pub mod pipeline;
pub mod scope;
pub mod shutdown;
pub mod telemetry;
pub mod watch;

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

pub use error::{Error, Result};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use shutdown::{Shutdown, ShutdownReason};

use capture::SimConfig;
use pipeline::{BackpressurePolicy, FailureBreaker};

/// Default viewer port.
pub const DEFAULT_PORT: u16 = 8010;

/// Runtime configuration.
///
/// Port and bus names come from the command line; the sections below can
/// also be set from a TOML file or `LEPTON__SECTION__KEY` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    pub port: u16,
    #[serde(skip)]
    pub spi: String,
    #[serde(skip)]
    pub i2c: String,
    pub pipeline: PipelineConfig,
    pub viewer: ViewerConfig,
    pub sim: SimConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Sensor frame rate used to size the buffer.
    pub frame_rate: u32,
    /// Seconds of frames the buffer absorbs.
    pub slack_seconds: u32,
    /// Explicit capacity, overrides `frame_rate * slack_seconds`.
    pub capacity: Option<usize>,
    pub policy: BackpressurePolicy,
    /// Bound on a `block-timeout` push.
    pub push_timeout_ms: u64,
    /// Consecutive failures before the acquisition loop backs off. 0 disables.
    pub failure_threshold: u32,
    pub failure_cooldown_ms: u64,
    /// Pin the acquisition thread to this CPU.
    pub acquisition_cpu: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Frames kept for viewers beyond the latest one.
    pub history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            spi: String::new(),
            i2c: String::new(),
            pipeline: PipelineConfig::default(),
            viewer: ViewerConfig::default(),
            sim: SimConfig::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_rate: 9,
            slack_seconds: 60,
            capacity: None,
            policy: BackpressurePolicy::DropOldest,
            push_timeout_ms: 100,
            failure_threshold: 30,
            failure_cooldown_ms: 1000,
            acquisition_cpu: None,
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self { history: 9 }
    }
}

impl PipelineConfig {
    pub fn capacity(&self) -> usize {
        self.capacity
            .unwrap_or(self.frame_rate as usize * self.slack_seconds as usize)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn breaker(&self) -> FailureBreaker {
        FailureBreaker::new(
            self.failure_threshold,
            Duration::from_millis(self.failure_cooldown_ms),
        )
    }
}

impl Config {
    /// Defaults, then `file` if given, then `LEPTON__*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                ::config::Environment::with_prefix("LEPTON")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.capacity() == 0 {
            return Err(Error::Invalid(
                "frame buffer capacity must be at least 1".into(),
            ));
        }
        if self.pipeline.policy == BackpressurePolicy::BlockTimeout
            && self.pipeline.push_timeout_ms == 0
        {
            return Err(Error::Invalid(
                "block-timeout policy needs a non-zero push timeout".into(),
            ));
        }
        if self.viewer.history == 0 {
            return Err(Error::Invalid("viewer history must be at least 1".into()));
        }
        self.sim.validate().map_err(Error::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_capacity_is_a_minute_of_frames() {
        let config = Config::default();
        assert_eq!(config.pipeline.capacity(), 540);
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_sections_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [pipeline]
            capacity = 16
            policy = "block-timeout"
            push_timeout_ms = 5

            [sim]
            frame_rate = 0.0
            fail_attempts = [3]
            "#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.pipeline.capacity(), 16);
        assert_eq!(config.pipeline.policy, BackpressurePolicy::BlockTimeout);
        assert_eq!(config.pipeline.push_timeout(), Duration::from_millis(5));
        assert_eq!(config.sim.fail_attempts, vec![3]);
        assert_eq!(config.viewer.history, 9);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::load(Some(&dir.path().join("absent.toml"))),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let mut config = Config::default();
        config.pipeline.capacity = Some(0);
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));
    }

    #[test]
    fn sim_section_is_checked() {
        let mut config = Config::default();
        config.sim.frame_rate = 1e-20;
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));

        let mut config = Config::default();
        config.sim.frame_rate = f64::NAN;
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));

        let mut config = Config::default();
        config.sim.width = 1 << 20;
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));

        let mut config = Config::default();
        config.sim.height = 0;
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));

        let mut config = Config::default();
        config.sim.frame_rate = 0.0;
        assert!(config.validate().is_ok());
    }
}
