use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HydroError;

pub const DEVICE_CATEGORY: &str = "HYDROPHONE";
pub const ONC_LICENSE: &str = "CC-BY 4.0";
pub const ONC_SOURCE: &str = "ONC";

/// Last day (inclusive) for which ONC archives hydrophone audio as WAV.
const LEGACY_CUTOFF: (i32, u32, u32) = (2021, 4, 9);

const ONC_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioExtension {
    Wav,
    Flac,
}

impl AudioExtension {
    pub fn for_date(date: NaiveDate) -> Self {
        if (date.year(), date.month(), date.day()) <= LEGACY_CUTOFF {
            AudioExtension::Wav
        } else {
            AudioExtension::Flac
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AudioExtension::Wav => "wav",
            AudioExtension::Flac => "flac",
        }
    }
}

impl fmt::Display for AudioExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Wav,
    Mp3,
    Flac,
}

impl TargetFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Wav => "wav",
            TargetFormat::Mp3 => "mp3",
            TargetFormat::Flac => "flac",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TargetFormat {
    type Err = HydroError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "wav" => Ok(TargetFormat::Wav),
            "mp3" => Ok(TargetFormat::Mp3),
            "flac" => Ok(TargetFormat::Flac),
            other => Err(HydroError::InvalidConfig(format!(
                "unknown target format: {other}"
            ))),
        }
    }
}

/// Query parameters sent to ONC, kept in key order so provenance files are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadFilter(BTreeMap<String, Value>);

impl DownloadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub location_code: String,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub depth: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationRecord {
    #[serde(default)]
    pub citation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub device_code: String,
    pub begin: String,
    #[serde(default)]
    pub end: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub depth: f64,
    #[serde(default)]
    pub citation: Option<CitationRecord>,
}

impl DeploymentRecord {
    pub fn citation_text(&self) -> Option<&str> {
        self.citation
            .as_ref()
            .and_then(|record| record.citation.as_deref())
    }
}

pub fn parse_onc_timestamp(value: &str) -> Result<NaiveDateTime, HydroError> {
    NaiveDateTime::parse_from_str(value.trim(), ONC_TIMESTAMP)
        .map_err(|_| HydroError::InvalidTimestamp(value.to_string()))
}

/// One calendar day of one deployment: the unit of download.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentDay {
    pub date: NaiveDate,
    pub station: String,
    pub device_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub depth: f64,
    pub license: String,
    pub source: String,
    pub fname: String,
    pub extension: AudioExtension,
    pub citation: Option<String>,
    pub filter: DownloadFilter,
}

impl DeploymentDay {
    pub fn new(station: &str, record: &DeploymentRecord, date: NaiveDate) -> Self {
        let extension = AudioExtension::for_date(date);
        Self {
            date,
            station: station.to_string(),
            device_code: record.device_code.clone(),
            latitude: record.lat,
            longitude: record.lon,
            depth: record.depth,
            license: ONC_LICENSE.to_string(),
            source: ONC_SOURCE.to_string(),
            fname: deployment_fname(date, station, record.lat, record.lon),
            extension,
            citation: record.citation_text().map(str::to_string),
            filter: primary_filter(&record.device_code, date, extension),
        }
    }
}

pub fn deployment_fname(date: NaiveDate, station: &str, lat: f64, lon: f64) -> String {
    format!("{}-{station}lat{lat:.3}lon{lon:.3}", date.format("%Y_%m_%d"))
}

pub fn next_day(date: NaiveDate) -> NaiveDate {
    date + Days::new(1)
}

pub fn primary_filter(
    device_code: &str,
    date: NaiveDate,
    extension: AudioExtension,
) -> DownloadFilter {
    DownloadFilter::new()
        .with("deviceCode", device_code)
        .with("dateFrom", format!("{}T00:00:00.000Z", date.format("%Y-%m-%d")))
        .with(
            "dateTo",
            format!("{}T00:00:00.000Z", next_day(date).format("%Y-%m-%d")),
        )
        .with("extension", extension.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub author: String,
    pub year: String,
    pub title: String,
    pub journal: String,
    pub doi: String,
}

impl Citation {
    pub fn to_bibtex(&self, key: &str) -> String {
        format!(
            "@misc{{{key}, author={{{}}}, year={{{}}}, title={{{}}}, journal={{{}}}, doi={{{}}},}}",
            self.author, self.year, self.title, self.journal, self.doi
        )
    }
}

impl FromStr for Citation {
    type Err = HydroError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts = value.split(". ").collect::<Vec<_>>();
        match parts.as_slice() {
            [author, year, title, journal, doi] => Ok(Self {
                author: author.to_string(),
                year: year.to_string(),
                title: title.to_string(),
                journal: journal.to_string(),
                doi: doi.to_string(),
            }),
            _ => Err(HydroError::CitationFormat(value.to_string())),
        }
    }
}
