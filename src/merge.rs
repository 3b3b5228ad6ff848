//! Conversion and batched merging of downloaded segment files.
//!
//! Segment files are named `<station>_<YYYYMMDD>T<HHMMSS>...`, so sorting by
//! name sorts by time. Each folder is handled on its own. A batch's sources
//! are deleted only once its merged export exists and is non-empty.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::thread;

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::audio::AudioToolkit;
use crate::config::{ConvertMode, ConvertSettings};
use crate::domain::TargetFormat;
use crate::error::HydroError;
use crate::output::{FolderChoice, FolderPrompt, create_progress, finish_progress};
use crate::store::{ensure_free_space, file_len, list_files_with_ext, wait_for_files};

pub const MERGED_DIR: &str = "merged";

static TIMESTAMP_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{8})T(\d{6})").expect("valid timestamp regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionSummary {
    pub converted: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Station, date and time tokens of a segment file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentName {
    pub station: String,
    pub date: String,
    pub time: String,
}

impl SegmentName {
    pub fn parse(path: &Path) -> Result<Self, HydroError> {
        let invalid = || HydroError::SegmentName(path.display().to_string());
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(invalid)?;
        let (station, rest) = name.split_once('_').ok_or_else(invalid)?;
        let captures = TIMESTAMP_TOKEN.captures(rest).ok_or_else(invalid)?;
        Ok(Self {
            station: station.to_string(),
            date: captures[1].to_string(),
            time: captures[2].to_string(),
        })
    }
}

/// Text before the first `_` of the file name.
pub fn station_key(path: &Path) -> String {
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    match name.split_once('_') {
        Some((station, _)) => station.to_string(),
        None => name,
    }
}

/// Groups files by station, each group sorted by file name.
pub fn group_segments(files: &[PathBuf]) -> BTreeMap<String, Vec<PathBuf>> {
    let mut groups = BTreeMap::<String, Vec<PathBuf>>::new();
    for file in files {
        groups.entry(station_key(file)).or_default().push(file.clone());
    }
    for group in groups.values_mut() {
        group.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    }
    groups
}

/// `<station>_<date>T<first time>_to_<last time>.<ext>` for a sorted batch.
pub fn merged_file_name(batch: &[PathBuf], extension: &str) -> Result<String, HydroError> {
    let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
        return Err(HydroError::SegmentName("empty batch".to_string()));
    };
    let first = SegmentName::parse(first)?;
    let last = SegmentName::parse(last)?;
    Ok(format!(
        "{}_{}T{}_to_{}.{extension}",
        first.station, first.date, first.time, last.time
    ))
}

/// Subdirectories of the sonifications directory, excluding the merged output.
pub fn deployment_folders(root: &Path) -> Result<Vec<PathBuf>, HydroError> {
    let entries = fs::read_dir(root)
        .map_err(|err| HydroError::Filesystem(format!("read {}: {err}", root.display())))?;
    let mut folders = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| path.file_name().map(|name| name != MERGED_DIR).unwrap_or(false))
        .collect::<Vec<_>>();
    folders.sort();
    Ok(folders)
}

pub struct Converter<A: AudioToolkit, P: FolderPrompt> {
    toolkit: A,
    prompt: P,
    settings: ConvertSettings,
}

impl<A: AudioToolkit, P: FolderPrompt> Converter<A, P> {
    pub fn new(toolkit: A, prompt: P, settings: ConvertSettings) -> Self {
        Self {
            toolkit,
            prompt,
            settings,
        }
    }

    /// Walks every deployment folder once. Fails only if the audio toolkit is
    /// missing or the sonifications directory cannot be read.
    pub fn run(&mut self) -> Result<ConversionSummary, HydroError> {
        self.toolkit.check_available()?;
        let merged_dir = self.settings.merged_dir();
        fs::create_dir_all(&merged_dir).map_err(|err| HydroError::Filesystem(err.to_string()))?;

        let mut summary = ConversionSummary::default();
        for folder in deployment_folders(&self.settings.sonifications_dir)? {
            if let Err(err) = self.process_folder(&folder, &merged_dir, &mut summary) {
                warn!(folder = %folder.display(), "{err}");
                summary.errors.push(format!("{}: {err}", folder.display()));
            }
        }
        Ok(summary)
    }

    fn process_folder(
        &mut self,
        folder: &Path,
        merged_dir: &Path,
        summary: &mut ConversionSummary,
    ) -> Result<(), HydroError> {
        let ext = self.settings.segment_extension.clone();
        let mut files = list_files_with_ext(folder, &ext)?;
        if files.is_empty() {
            return Ok(());
        }
        if self.settings.expected_count > 0 {
            files = wait_for_files(
                folder,
                &ext,
                self.settings.expected_count,
                self.settings.poll_interval,
                thread::sleep,
            )?;
        }

        match self.prompt.choose(folder)? {
            FolderChoice::Skip => {
                info!(folder = %folder.display(), "skipping folder");
            }
            FolderChoice::Convert(format) => match self.settings.mode {
                ConvertMode::Batched => self.merge_folder(&files, format, merged_dir, summary),
                ConvertMode::Flat => {
                    ensure_free_space(merged_dir, self.settings.min_free_bytes)?;
                    self.convert_folder(&files, format, merged_dir, summary);
                }
            },
        }
        Ok(())
    }

    /// Transcodes each file on its own and deletes the original on success.
    pub fn convert_folder(
        &self,
        files: &[PathBuf],
        format: TargetFormat,
        merged_dir: &Path,
        summary: &mut ConversionSummary,
    ) {
        let progress = create_progress(files.len(), "files");
        for file in files {
            if let Some(pb) = &progress {
                pb.inc(1);
            }
            if file_len(file) < self.settings.min_file_size {
                warn!(file = %file.display(), "file too small, skipping");
                summary.skipped += 1;
                continue;
            }
            let Some(stem) = file.file_stem() else {
                summary.errors.push(format!("{}: no file name", file.display()));
                continue;
            };
            let mut name = stem.to_os_string();
            name.push(".");
            name.push(format.extension());
            let output = merged_dir.join(name);

            if let Err(err) = self.toolkit.transcode(file, &output, format) {
                warn!(file = %file.display(), "conversion failed: {err}");
                summary.errors.push(format!("{}: {err}", file.display()));
                continue;
            }
            info!(from = %file.display(), to = %output.display(), "converted");
            summary.converted += 1;
            match fs::remove_file(file) {
                Ok(()) => summary.deleted += 1,
                Err(err) => summary
                    .errors
                    .push(format!("{}: delete failed: {err}", file.display())),
            }
        }
        finish_progress(progress, "conversion complete");
    }

    /// Merges each station's files in batches of `batch_size`.
    pub fn merge_folder(
        &self,
        files: &[PathBuf],
        format: TargetFormat,
        merged_dir: &Path,
        summary: &mut ConversionSummary,
    ) {
        let groups = group_segments(files);
        let total = groups
            .values()
            .map(|group| group.len().div_ceil(self.settings.batch_size))
            .sum();
        let progress = create_progress(total, "batches");
        for group in groups.values() {
            for batch in group.chunks(self.settings.batch_size) {
                if let Err(err) = self.merge_batch(batch, format, merged_dir, summary) {
                    warn!(first = %batch[0].display(), "batch not merged: {err}");
                    summary
                        .errors
                        .push(format!("batch starting {}: {err}", batch[0].display()));
                }
                if let Some(pb) = &progress {
                    pb.inc(1);
                }
            }
        }
        finish_progress(progress, "merge complete");
    }

    fn merge_batch(
        &self,
        batch: &[PathBuf],
        format: TargetFormat,
        merged_dir: &Path,
        summary: &mut ConversionSummary,
    ) -> Result<(), HydroError> {
        let name = merged_file_name(batch, format.extension())?;
        let output = merged_dir.join(&name);
        if output.exists() {
            info!(merged = %name, "already merged, skipping batch");
            return Ok(());
        }
        ensure_free_space(merged_dir, self.settings.min_free_bytes)?;

        let mut members = Vec::with_capacity(batch.len());
        for file in batch {
            if file_len(file) >= self.settings.min_file_size {
                members.push(file.clone());
                continue;
            }
            warn!(file = %file.display(), "file too small, deleting");
            summary.skipped += 1;
            if fs::remove_file(file).is_ok() {
                summary.deleted += 1;
            }
        }
        if members.is_empty() {
            return Ok(());
        }

        self.toolkit.concatenate(&members, &output, format)?;
        if file_len(&output) == 0 {
            let _ = fs::remove_file(&output);
            return Err(HydroError::AudioConversion(format!(
                "merged export {name} is missing or empty"
            )));
        }
        info!(merged = %name, files = members.len(), "batch merged");

        summary.converted += members.len();
        for member in &members {
            match fs::remove_file(member) {
                Ok(()) => summary.deleted += 1,
                Err(err) => summary
                    .errors
                    .push(format!("{}: delete failed: {err}", member.display())),
            }
        }
        Ok(())
    }
}
