// Timestamped dataset files with a stable `latest_<dataset>.csv` pointer.
//
// Every write produces a new `<dataset>_<YYYYmmdd_HHMMSS>.csv`; the pointer is
// a relative symlink on unix and a plain copy elsewhere.

use chrono::NaiveDateTime;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Format of the timestamp embedded in versioned file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no latest snapshot for dataset `{dataset}` (expected {path})")]
    MissingLatest { dataset: String, path: PathBuf },

    #[error("failed to serialize {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SnapshotError + '_ {
    move |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A directory of versioned dataset files.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    root: PathBuf,
}

impl SnapshotDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the stable pointer for `dataset`.
    pub fn latest_path(&self, dataset: &str) -> PathBuf {
        self.root.join(format!("latest_{dataset}.csv"))
    }

    /// Write `contents` as a new version of `dataset` and repoint the latest
    /// pointer at it. Returns the path of the versioned file.
    pub fn write_versioned(
        &self,
        dataset: &str,
        contents: &[u8],
        timestamp: NaiveDateTime,
    ) -> Result<PathBuf, SnapshotError> {
        std::fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;

        let file_name = format!("{dataset}_{}.csv", timestamp.format(TIMESTAMP_FORMAT));
        let path = self.root.join(&file_name);
        std::fs::write(&path, contents).map_err(io_err(&path))?;
        info!("Saved {} ({} bytes)", path.display(), contents.len());

        let latest = self.latest_path(dataset);
        point_latest(&latest, &file_name, &path)?;
        debug!("{} -> {}", latest.display(), file_name);

        Ok(path)
    }

    /// Open the latest version of `dataset` for reading.
    pub fn open_latest(&self, dataset: &str) -> Result<File, SnapshotError> {
        let latest = self.latest_path(dataset);
        if !latest.exists() {
            return Err(SnapshotError::MissingLatest {
                dataset: dataset.to_string(),
                path: latest,
            });
        }
        File::open(&latest).map_err(io_err(&latest))
    }

    /// Write a pretty-printed JSON document to `<name>.json` (unversioned).
    pub fn write_json(
        &self,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<PathBuf, SnapshotError> {
        std::fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;
        let path = self.root.join(format!("{name}.json"));
        let text = serde_json::to_string_pretty(value).map_err(|source| SnapshotError::Json {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, text).map_err(io_err(&path))?;
        Ok(path)
    }
}

#[cfg(unix)]
fn point_latest(latest: &Path, file_name: &str, _target: &Path) -> Result<(), SnapshotError> {
    // symlink_metadata so that a dangling link is still removed
    if latest.symlink_metadata().is_ok() {
        std::fs::remove_file(latest).map_err(io_err(latest))?;
    }
    std::os::unix::fs::symlink(file_name, latest).map_err(io_err(latest))
}

#[cfg(not(unix))]
fn point_latest(latest: &Path, _file_name: &str, target: &Path) -> Result<(), SnapshotError> {
    std::fs::copy(target, latest).map_err(io_err(latest))?;
    Ok(())
}
