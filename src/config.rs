use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};

use crate::domain::{ONC_LICENSE, TargetFormat};
use crate::error::HydroError;

pub const DEFAULT_CONFIG_FILE: &str = "hydrophone.json";
pub const TOKEN_ENV: &str = "ONC_TOKEN";
pub const SONIFICATIONS_ENV: &str = "SONIFICATIONS_DIR";
const TOKEN_FILE: &str = "token";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub download: DownloadSection,
    #[serde(default)]
    pub convert: ConvertSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DownloadSection {
    #[serde(default)]
    pub min_latitude: Option<f64>,
    #[serde(default)]
    pub max_latitude: Option<f64>,
    #[serde(default)]
    pub min_longitude: Option<f64>,
    #[serde(default)]
    pub max_longitude: Option<f64>,
    #[serde(default)]
    pub min_depth: Option<f64>,
    #[serde(default)]
    pub max_depth: Option<f64>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub start_time: Option<NaiveDate>,
    #[serde(default)]
    pub end_time: Option<NaiveDate>,
    #[serde(default)]
    pub save_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConvertSection {
    #[serde(default)]
    pub sonifications_dir: Option<PathBuf>,
    #[serde(default)]
    pub mode: Option<ConvertMode>,
    #[serde(default)]
    pub format: Option<TargetFormat>,
    #[serde(default)]
    pub segment_extension: Option<String>,
    #[serde(default)]
    pub expected_count: Option<usize>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub min_file_size: Option<u64>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub min_free_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConvertMode {
    Batched,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Filter applied to enumerated deployment days before download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub latitude: Range,
    pub longitude: Range,
    pub depth: Range,
    pub license: String,
    pub start_time: Option<NaiveDate>,
    pub end_time: Option<NaiveDate>,
    pub save_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertSettings {
    pub sonifications_dir: PathBuf,
    pub mode: ConvertMode,
    pub format: Option<TargetFormat>,
    pub segment_extension: String,
    pub expected_count: usize,
    pub poll_interval: Duration,
    pub min_file_size: u64,
    pub batch_size: usize,
    pub min_free_bytes: u64,
}

impl ConvertSettings {
    pub fn merged_dir(&self) -> PathBuf {
        self.sonifications_dir.join("merged")
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub download: DownloadRequest,
    pub convert: ConvertSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HydroError> {
        Self::resolve_config(Self::load(path)?)
    }

    /// Reads the JSON config. Without an explicit path a missing
    /// `hydrophone.json` yields the defaults.
    pub fn load(path: Option<&str>) -> Result<Config, HydroError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HydroError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| HydroError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HydroError> {
        let download = config.download;
        let latitude = range(
            "latitude",
            download.min_latitude.unwrap_or(-90.0),
            download.max_latitude.unwrap_or(90.0),
        )?;
        let longitude = range(
            "longitude",
            download.min_longitude.unwrap_or(-180.0),
            download.max_longitude.unwrap_or(180.0),
        )?;
        let depth = range(
            "depth",
            download.min_depth.unwrap_or(0.0),
            download.max_depth.unwrap_or(12_000.0),
        )?;
        if let (Some(start), Some(end)) = (download.start_time, download.end_time) {
            if start > end {
                return Err(HydroError::InvalidConfig(format!(
                    "start_time {start} is after end_time {end}"
                )));
            }
        }

        let convert = config.convert;
        let batch_size = convert.batch_size.unwrap_or(12);
        if batch_size == 0 {
            return Err(HydroError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        let sonifications_dir = match convert.sonifications_dir {
            Some(dir) => dir,
            None => default_sonifications_dir()?,
        };

        Ok(ResolvedConfig {
            download: DownloadRequest {
                latitude,
                longitude,
                depth,
                license: download
                    .license
                    .unwrap_or_else(|| ONC_LICENSE.to_string()),
                start_time: download.start_time,
                end_time: download.end_time,
                save_dir: download.save_dir.unwrap_or_else(|| PathBuf::from("data")),
            },
            convert: ConvertSettings {
                sonifications_dir,
                mode: convert.mode.unwrap_or(ConvertMode::Batched),
                format: convert.format,
                segment_extension: convert
                    .segment_extension
                    .unwrap_or_else(|| "flac".to_string())
                    .trim_start_matches('.')
                    .to_string(),
                expected_count: convert.expected_count.unwrap_or(288),
                poll_interval: Duration::from_secs(convert.poll_interval_secs.unwrap_or(30)),
                min_file_size: convert.min_file_size.unwrap_or(1024),
                batch_size,
                min_free_bytes: convert.min_free_bytes.unwrap_or(1024 * 1024 * 1024),
            },
        })
    }
}

fn range(name: &str, min: f64, max: f64) -> Result<Range, HydroError> {
    if min > max {
        return Err(HydroError::InvalidConfig(format!(
            "min_{name} {min} is greater than max_{name} {max}"
        )));
    }
    Ok(Range { min, max })
}

fn default_sonifications_dir() -> Result<PathBuf, HydroError> {
    if let Some(dir) = std::env::var_os(SONIFICATIONS_ENV) {
        return Ok(PathBuf::from(dir));
    }
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join("sonifications"))
        .ok_or_else(|| HydroError::Filesystem("unable to resolve home directory".to_string()))
}

pub fn token_path() -> Result<PathBuf, HydroError> {
    ProjectDirs::from("ca", "oceannetworks", "hydrophone-downloader")
        .map(|dirs| dirs.config_dir().join(TOKEN_FILE))
        .ok_or_else(|| HydroError::Filesystem("unable to resolve config directory".to_string()))
}

/// Looks up the ONC token in the environment first, then in the stored token file.
pub fn resolve_token() -> Result<String, HydroError> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.trim().is_empty() {
            return Ok(token.trim().to_string());
        }
    }
    let path = token_path()?;
    match fs::read_to_string(&path) {
        Ok(content) if !content.trim().is_empty() => Ok(content.trim().to_string()),
        _ => Err(HydroError::MissingToken),
    }
}

pub fn store_token(token: &str) -> Result<PathBuf, HydroError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(HydroError::MissingToken);
    }
    let path = token_path()?;
    crate::store::write_bytes_atomic(&path, token.as_bytes())?;
    Ok(path)
}
