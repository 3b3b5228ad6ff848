use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveTime;
use serde::Serialize;
use tempfile::{Builder, TempDir};
use tracing::{debug, info, warn};

use crate::domain::{DeploymentDay, DownloadFilter};
use crate::error::HydroError;

pub const FILTERS_FILE: &str = "filters.json";
pub const REFERENCE_FILE: &str = "reference.bib";
const STAGING_PREFIX: &str = "tmp_";

/// On-disk layout of a download run: `<root>/<deployment fname>/...`.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MoveOutcome {
    pub moved: usize,
    pub dropped: usize,
}

impl Store {
    pub fn new(root: &Path) -> Result<Self, HydroError> {
        let root = Utf8PathBuf::from_path_buf(root.to_path_buf())
            .map_err(|_| HydroError::Filesystem("invalid save directory path".to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), HydroError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| HydroError::Filesystem(err.to_string()))
    }

    pub fn deployment_dir(&self, day: &DeploymentDay) -> Utf8PathBuf {
        self.root.join(&day.fname)
    }

    pub fn ensure_deployment_dir(&self, day: &DeploymentDay) -> Result<Utf8PathBuf, HydroError> {
        let dir = self.deployment_dir(day);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| HydroError::Filesystem(format!("create {dir}: {err}")))?;
        Ok(dir)
    }

    /// Allocates a fresh staging directory for one deployment day.
    pub fn stage(
        &self,
        day: &DeploymentDay,
        time_of_day: NaiveTime,
    ) -> Result<TempDir, HydroError> {
        let prefix = format!(
            "{STAGING_PREFIX}{}_{}_{}_{}_",
            day.device_code,
            day.station,
            day.date.format("%Y%m%d"),
            time_of_day.format("%H%M%S")
        );
        Builder::new()
            .prefix(&prefix)
            .rand_bytes(6)
            .tempdir_in(self.root.as_std_path())
            .map_err(|err| HydroError::Filesystem(err.to_string()))
    }

    /// Removes empty staging directories left behind by interrupted runs.
    pub fn remove_empty_staging(&self) -> Result<usize, HydroError> {
        if !self.root.as_std_path().exists() {
            return Ok(0);
        }
        let entries = fs::read_dir(self.root.as_std_path())
            .map_err(|err| HydroError::Filesystem(err.to_string()))?;
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_staging = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(STAGING_PREFIX))
                .unwrap_or(false);
            if !is_staging || !path.is_dir() {
                continue;
            }
            let is_empty = fs::read_dir(&path)
                .map(|mut inner| inner.next().is_none())
                .unwrap_or(false);
            if is_empty && fs::remove_dir(&path).is_ok() {
                debug!(path = %path.display(), "removed stale staging directory");
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn write_filters(dir: &Utf8Path, filter: &DownloadFilter) -> Result<(), HydroError> {
        let content = serde_json::to_vec_pretty(filter)
            .map_err(|err| HydroError::Filesystem(err.to_string()))?;
        write_bytes_atomic(dir.join(FILTERS_FILE).as_std_path(), &content)
    }

    pub fn write_reference(dir: &Utf8Path, bibtex: &str) -> Result<(), HydroError> {
        write_bytes_atomic(dir.join(REFERENCE_FILE).as_std_path(), bibtex.as_bytes())
    }

    /// Moves every top-level entry of `staging` into `dest`. Entries whose
    /// target name already exists are left behind and counted as dropped.
    pub fn move_staged(staging: &Path, dest: &Utf8Path) -> Result<MoveOutcome, HydroError> {
        let mut outcome = MoveOutcome::default();
        let entries =
            fs::read_dir(staging).map_err(|err| HydroError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| HydroError::Filesystem(err.to_string()))?;
            let target = dest.as_std_path().join(entry.file_name());
            if target.exists() {
                warn!(file = %target.display(), "target exists, dropping staged copy");
                outcome.dropped += 1;
                continue;
            }
            match fs::rename(entry.path(), &target) {
                Ok(()) => outcome.moved += 1,
                Err(err) => {
                    warn!(file = %entry.path().display(), "move failed: {err}");
                    outcome.dropped += 1;
                }
            }
        }
        Ok(outcome)
    }
}

pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), HydroError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| HydroError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content).map_err(|err| HydroError::Filesystem(err.to_string()))?;
    fs::rename(&tmp_path, path).map_err(|err| HydroError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}

pub fn ensure_free_space(dir: &Path, required: u64) -> Result<(), HydroError> {
    if required == 0 {
        return Ok(());
    }
    let available =
        fs2::available_space(dir).map_err(|err| HydroError::Filesystem(err.to_string()))?;
    if available < required {
        return Err(HydroError::InsufficientSpace {
            path: dir.to_path_buf(),
            available,
            required,
        });
    }
    Ok(())
}

/// Files directly inside `dir` with the given extension, sorted by name.
pub fn list_files_with_ext(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, HydroError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| HydroError::Filesystem(format!("read {}: {err}", dir.display())))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| HydroError::Filesystem(err.to_string()))?;
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|value| value.to_str())
            .map(|value| value.eq_ignore_ascii_case(ext))
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Blocks until `dir` holds at least `expected` files with `ext`. There is no timeout.
pub fn wait_for_files<F>(
    dir: &Path,
    ext: &str,
    expected: usize,
    poll_interval: Duration,
    mut sleep: F,
) -> Result<Vec<PathBuf>, HydroError>
where
    F: FnMut(Duration),
{
    info!(folder = %dir.display(), expected, "waiting for .{ext} files");
    loop {
        let files = list_files_with_ext(dir, ext)?;
        if files.len() >= expected {
            info!(folder = %dir.display(), found = files.len(), "folder complete");
            return Ok(files);
        }
        info!(found = files.len(), expected, "waiting");
        sleep(poll_interval);
    }
}
