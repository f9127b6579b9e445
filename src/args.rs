use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

use crate::pipeline::BackpressurePolicy;
use crate::{Config, Error, Result, DEFAULT_PORT};

/// Command-line arguments for the Lepton streamer.
///
/// Positional arguments are not accepted. Bus names left empty select the
/// first bus of that kind found on the host.
///
/// # Example
///
/// ```bash
/// lepton --spi spidev0.0 --i2c 1 --port 8010 --verbose
///
/// # No camera attached
/// lepton --fake
/// ```
#[derive(Parser, Debug, Clone)]
#[command(name = "lepton", author, version, about, long_about = None)]
pub struct Args {
    /// Dump CPU profile in file
    #[arg(long, value_name = "PATH")]
    pub cpuprofile: Option<PathBuf>,

    /// HTTP port to listen on
    #[arg(long, env = "LEPTON_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Enable log output
    #[arg(short, long)]
    pub verbose: bool,

    /// I²C bus to use
    #[arg(long, env = "LEPTON_I2C", default_value = "")]
    pub i2c: String,

    /// SPI bus to use
    #[arg(long, env = "LEPTON_SPI", default_value = "")]
    pub spi: String,

    /// Simulate a camera instead of opening real buses
    #[arg(long, env = "LEPTON_FAKE")]
    pub fake: bool,

    /// TOML file with [pipeline], [viewer] and [sim] sections
    #[arg(long, env = "LEPTON_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// File whose modification ends the process (default: this executable)
    #[arg(long, value_name = "PATH")]
    pub watch: Option<PathBuf>,

    /// Frame buffer policy when the viewer falls behind
    #[arg(long, value_enum)]
    pub backpressure: Option<BackpressurePolicy>,

    /// Longest a block-timeout push may wait
    #[arg(long, value_name = "MS")]
    pub push_timeout_ms: Option<u64>,
}

impl Args {
    /// Parses without touching the process: errors come back instead of
    /// exiting.
    pub fn try_parse_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args).map_err(Error::Usage)
    }

    /// Builds the runtime configuration: file and environment first, then
    /// the flags given here.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        config.port = self.port;
        config.spi = self.spi.clone();
        config.i2c = self.i2c.clone();
        if let Some(policy) = self.backpressure {
            config.pipeline.policy = policy;
        }
        if let Some(ms) = self.push_timeout_ms {
            config.pipeline.push_timeout_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }

    /// Path watched for reload.
    pub fn watch_path(&self) -> Result<PathBuf> {
        match &self.watch {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().map_err(|source| {
                Error::Watch(crate::watch::WatchError::Path {
                    path: PathBuf::from("<current executable>"),
                    source,
                })
            }),
        }
    }
}
