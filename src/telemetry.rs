//! Logging and profiling setup.
//!
//! Human-readable logs go to stderr and are silent unless `--verbose` (or
//! `RUST_LOG`) asks for them. `--cpuprofile` adds a JSON stream of span
//! timings (`next_frame`, `push`, `add_image`) written to a file that is
//! flushed when the returned [`ProfileGuard`] drops.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::{Error, Result};

const VERBOSE_FILTER: &str = "lepton_stream=debug,lepton=debug";
const PROFILE_FILTER: &str = "lepton_stream=trace";

/// Shared, line-atomic handle on the profile file.
#[derive(Clone)]
pub struct ProfileWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl Write for ProfileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "profile writer poisoned"))?;
        inner.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "profile writer poisoned"))?
            .flush()
    }
}

/// Keeps the profile file open; flushes it on drop.
pub struct ProfileGuard {
    path: PathBuf,
    writer: ProfileWriter,
}

impl ProfileGuard {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|source| Error::Profile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: ProfileWriter {
                inner: Arc::new(Mutex::new(BufWriter::new(file))),
            },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn writer(&self) -> ProfileWriter {
        self.writer.clone()
    }
}

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

fn stderr_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new(VERBOSE_FILTER)
        } else {
            EnvFilter::new("off")
        }
    })
}

/// Installs the global subscriber.
pub fn init(verbose: bool, profile: Option<&ProfileGuard>) -> Result<()> {
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_thread_names(true)
        .with_filter(stderr_filter(verbose));

    let profile = profile.map(|guard| {
        let writer = guard.writer();
        tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_thread_names(true)
            .with_writer(move || writer.clone())
            .with_filter(EnvFilter::new(PROFILE_FILTER))
    });

    let registry = tracing_subscriber::registry().with(stderr).with(profile);

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}
