use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HydroError {
    #[error("missing ONC token (set ONC_TOKEN or run `hydrophone-dl set-token <TOKEN>`)")]
    #[diagnostic(help(
        "register at https://data.oceannetworks.ca/Profile, open the 'Web Services' tab and click \"Generate Token\""
    ))]
    MissingToken,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("ONC request failed: {0}")]
    OncHttp(String),

    #[error("ONC returned status {status}: {message}")]
    OncStatus { status: u16, message: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("citation does not split into author, year, title, journal and doi: {0}")]
    CitationFormat(String),

    #[error("segment file name has no parsable date/time token: {0}")]
    SegmentName(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("audio conversion failed: {0}")]
    AudioConversion(String),

    #[error("insufficient disk space in {path}: {available} bytes free, {required} required")]
    InsufficientSpace {
        path: PathBuf,
        available: u64,
        required: u64,
    },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
