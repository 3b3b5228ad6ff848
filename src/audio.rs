use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::domain::TargetFormat;
use crate::error::HydroError;

/// Decoding, concatenation and encoding of segment audio.
pub trait AudioToolkit {
    fn check_available(&self) -> Result<(), HydroError>;
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: TargetFormat,
    ) -> Result<(), HydroError>;
    /// Concatenates `inputs` in order into one file at `output`.
    fn concatenate(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        format: TargetFormat,
    ) -> Result<(), HydroError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg: Option<PathBuf>,
}

impl Default for FfmpegToolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegToolkit {
    pub fn new() -> Self {
        Self {
            ffmpeg: find_in_path("ffmpeg"),
        }
    }

    pub fn version(&self) -> Option<String> {
        let ffmpeg = self.ffmpeg.as_ref()?;
        let output = Command::new(ffmpeg).arg("-version").output().ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(str::to_string)
    }

    fn require_ffmpeg(&self) -> Result<&PathBuf, HydroError> {
        self.ffmpeg
            .as_ref()
            .ok_or_else(|| HydroError::MissingTool("ffmpeg".to_string()))
    }

    fn run_cmd(&self, args: &[String]) -> Result<(), HydroError> {
        let ffmpeg = self.require_ffmpeg()?;
        debug!(?args, "running ffmpeg");
        let output = Command::new(ffmpeg)
            .args(args)
            .output()
            .map_err(|err| HydroError::AudioConversion(err.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {}", ffmpeg.display())
        } else {
            stderr
        };
        Err(HydroError::AudioConversion(message))
    }

    /// Encodes into a sibling `.part` file and renames it on success, so a
    /// failed export never occupies the final name.
    fn encode_into(
        &self,
        mut args: Vec<String>,
        output: &Path,
        format: TargetFormat,
    ) -> Result<(), HydroError> {
        let partial = partial_path(output);
        args.extend(encode_args(format));
        args.push(partial.to_string_lossy().to_string());
        if let Err(err) = self.run_cmd(&args) {
            let _ = fs::remove_file(&partial);
            return Err(err);
        }
        fs::rename(&partial, output).map_err(|err| HydroError::Filesystem(err.to_string()))
    }
}

impl AudioToolkit for FfmpegToolkit {
    fn check_available(&self) -> Result<(), HydroError> {
        self.require_ffmpeg().map(|_| ())
    }

    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: TargetFormat,
    ) -> Result<(), HydroError> {
        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ];
        self.encode_into(args, output, format)
    }

    fn concatenate(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        format: TargetFormat,
    ) -> Result<(), HydroError> {
        if inputs.is_empty() {
            return Err(HydroError::AudioConversion(
                "nothing to concatenate".to_string(),
            ));
        }
        let parent = output
            .parent()
            .ok_or_else(|| HydroError::Filesystem("invalid output path".to_string()))?;
        let mut list = tempfile::Builder::new()
            .prefix("concat")
            .suffix(".txt")
            .tempfile_in(parent)
            .map_err(|err| HydroError::Filesystem(err.to_string()))?;
        for input in inputs {
            let absolute = fs::canonicalize(input)
                .map_err(|err| HydroError::Filesystem(format!("{}: {err}", input.display())))?;
            writeln!(list, "{}", concat_list_line(&absolute))
                .map_err(|err| HydroError::Filesystem(err.to_string()))?;
        }
        list.flush()
            .map_err(|err| HydroError::Filesystem(err.to_string()))?;

        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list.path().to_string_lossy().to_string(),
        ];
        self.encode_into(args, output, format)
    }
}

fn encode_args(format: TargetFormat) -> Vec<String> {
    let args: &[&str] = match format {
        TargetFormat::Wav => &["-codec:a", "pcm_s16le", "-f", "wav"],
        TargetFormat::Mp3 => &["-codec:a", "libmp3lame", "-b:a", "320k", "-f", "mp3"],
        TargetFormat::Flac => &["-codec:a", "flac", "-f", "flac"],
    };
    args.iter().map(|arg| arg.to_string()).collect()
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    output.with_file_name(name)
}

/// One entry of an ffmpeg concat-demuxer list, with single quotes escaped.
fn concat_list_line(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\'', r"'\''");
    format!("file '{escaped}'")
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
