//! Reload trigger.
//!
//! During development the binary is rebuilt in place; the process exits when
//! that happens so a supervisor (or the shell loop running it) restarts the
//! fresh build.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use flume::Receiver;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("cannot watch {path}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("file watcher stopped")]
    Closed,
}

/// Blocks until the watched condition occurs.
pub trait ReloadWatch: Send {
    fn wait_for_change(&mut self) -> Result<(), WatchError>;
}

/// Watches a single file for modification, replacement or removal.
pub struct FileWatcher {
    path: PathBuf,
    file_name: OsString,
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
}

impl FileWatcher {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, WatchError> {
        let path = path.as_ref();
        let path = path.canonicalize().map_err(|source| WatchError::Path {
            path: path.to_path_buf(),
            source,
        })?;
        let (dir, file_name) = match (path.parent(), path.file_name()) {
            (Some(dir), Some(name)) => (dir.to_path_buf(), name.to_os_string()),
            _ => {
                return Err(WatchError::Path {
                    path,
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "not a file path",
                    ),
                })
            }
        };

        let (tx, rx) = flume::unbounded::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        // Builds replace the file rather than rewrite it, so watch the
        // directory and filter by name.
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = %path.display(), "Watching for reload");

        Ok(Self {
            path,
            file_name,
            _watcher: watcher,
            rx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_relevant(&self, event: &Event) -> bool {
        let kind_matches = matches!(
            event.kind,
            EventKind::Create(_)
                | EventKind::Remove(_)
                | EventKind::Modify(ModifyKind::Data(_))
                | EventKind::Modify(ModifyKind::Name(_))
                | EventKind::Modify(ModifyKind::Any)
        );
        kind_matches
            && event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(self.file_name.as_os_str()))
    }
}

impl ReloadWatch for FileWatcher {
    fn wait_for_change(&mut self) -> Result<(), WatchError> {
        loop {
            let event = self.rx.recv().map_err(|_| WatchError::Closed)??;
            if self.is_relevant(&event) {
                info!(path = %self.path.display(), kind = ?event.kind, "Watched file changed");
                return Ok(());
            }
            debug!(kind = ?event.kind, paths = ?event.paths, "ignoring file event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FileWatcher::new(dir.path().join("nope")),
            Err(WatchError::Path { .. })
        ));
    }

    #[test]
    fn returns_when_file_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("lepton");
        fs::write(&target, b"v1").unwrap();
        let mut watcher = FileWatcher::new(&target).unwrap();

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            fs::write(&target, b"v2").unwrap();
        });
        watcher.wait_for_change().unwrap();
        writer.join().unwrap();
    }

    #[test]
    fn sibling_changes_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("lepton");
        let sibling = dir.path().join("other");
        fs::write(&target, b"v1").unwrap();
        let watcher = FileWatcher::new(&target).unwrap();

        let event = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(sibling);
        assert!(!watcher.is_relevant(&event));
        let event = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(target);
        assert!(watcher.is_relevant(&event));
    }
}
