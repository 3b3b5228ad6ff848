use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::NaiveDate;

use hydrophone_downloader::config::{Config, ConfigLoader, ConvertMode};
use hydrophone_downloader::domain::TargetFormat;
use hydrophone_downloader::error::HydroError;

#[test]
fn parse_full_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("hydrophone.json");
    fs::write(
        &path,
        r#"{
            "download": {
                "min_latitude": 45.0,
                "max_latitude": 50.5,
                "min_depth": 10,
                "start_time": "2021-04-01",
                "end_time": "2021-04-30",
                "save_dir": "/data/onc"
            },
            "convert": {
                "sonifications_dir": "/data/sonifications",
                "mode": "flat",
                "format": "mp3",
                "segment_extension": ".FLAC",
                "expected_count": 0,
                "poll_interval_secs": 5,
                "batch_size": 6
            }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    let download = resolved.download;
    assert!(download.latitude.contains(50.5));
    assert!(!download.latitude.contains(44.9));
    assert!(download.longitude.contains(-180.0));
    assert!(!download.depth.contains(5.0));
    assert_eq!(download.start_time, NaiveDate::from_ymd_opt(2021, 4, 1));
    assert_eq!(download.save_dir, PathBuf::from("/data/onc"));
    assert_eq!(download.license, "CC-BY 4.0");

    let convert = resolved.convert;
    assert_eq!(convert.mode, ConvertMode::Flat);
    assert_eq!(convert.format, Some(TargetFormat::Mp3));
    assert_eq!(convert.segment_extension, "FLAC");
    assert_eq!(convert.expected_count, 0);
    assert_eq!(convert.poll_interval, Duration::from_secs(5));
    assert_eq!(convert.batch_size, 6);
    assert_eq!(convert.min_file_size, 1024);
    assert_eq!(convert.merged_dir(), PathBuf::from("/data/sonifications/merged"));
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("nope.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(HydroError::ConfigRead(_))
    );
}

#[test]
fn malformed_json_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("hydrophone.json");
    fs::write(&path, "{ \"download\": [").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(HydroError::ConfigParse(_))
    );
}

#[test]
fn inverted_bounds_are_rejected() {
    let mut config = Config::default();
    config.convert.sonifications_dir = Some(PathBuf::from("/tmp/son"));
    config.download.min_longitude = Some(10.0);
    config.download.max_longitude = Some(-10.0);
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(HydroError::InvalidConfig(message)) if message.contains("longitude")
    );
}

#[test]
fn inverted_window_and_zero_batch_are_rejected() {
    let mut config = Config::default();
    config.convert.sonifications_dir = Some(PathBuf::from("/tmp/son"));
    config.download.start_time = NaiveDate::from_ymd_opt(2022, 1, 2);
    config.download.end_time = NaiveDate::from_ymd_opt(2022, 1, 1);
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(HydroError::InvalidConfig(_))
    );

    let mut config = Config::default();
    config.convert.sonifications_dir = Some(PathBuf::from("/tmp/son"));
    config.convert.batch_size = Some(0);
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(HydroError::InvalidConfig(_))
    );
}
