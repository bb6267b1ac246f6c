//! Cross-host synchronization point (the join artifact)
//!
//! The master writes the artifact exactly once; workers only read it.
//! Writes go to a temp file that is fsynced and renamed into place, so a
//! reader sees either no artifact or the complete one.

use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum SyncPointError {
    #[error("I/O error on synchronization point {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("refusing to publish empty content to {0}")]
    Empty(PathBuf),
}

/// A named artifact on the filesystem produced by the master pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncPoint {
    pub name: String,
    pub path: PathBuf,
}

impl SyncPoint {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Atomically write the artifact content
    pub fn publish(&self, content: &str) -> Result<(), SyncPointError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncPointError::Empty(self.path.clone()));
        }
        let io_err = |source| SyncPointError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let tmp_path = self.tmp_path();
        let mut tmp_file = fs::File::create(&tmp_path).map_err(io_err)?;
        tmp_file.write_all(content.as_bytes()).map_err(io_err)?;
        tmp_file.write_all(b"\n").map_err(io_err)?;
        tmp_file.sync_all().map_err(io_err)?;
        fs::rename(&tmp_path, &self.path).map_err(io_err)?;
        Ok(())
    }

    /// Read the artifact; `None` when it does not exist yet or is empty
    pub fn read(&self) -> Result<Option<String>, SyncPointError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let content = content.trim();
                if content.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(content.to_string()))
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SyncPointError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self.read(), Ok(Some(_)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Master pipeline status as seen by workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterSignal {
    Pending,
    Ready,
    Failed,
}

/// Broadcasts master status to the worker pipelines of one run
#[derive(Debug, Clone)]
pub struct SyncGate {
    tx: std::sync::Arc<watch::Sender<MasterSignal>>,
}

impl SyncGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(MasterSignal::Pending);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    /// A gate that is already open, for running worker stages standalone
    pub fn open() -> Self {
        let gate = Self::new();
        gate.signal(MasterSignal::Ready);
        gate
    }

    pub fn signal(&self, status: MasterSignal) {
        self.tx.send_replace(status);
    }

    pub fn current(&self) -> MasterSignal {
        *self.tx.borrow()
    }
}

impl Default for SyncGate {
    fn default() -> Self {
        Self::new()
    }
}
