use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveDateTime};

use hydrophone_downloader::config::{DownloadRequest, Range};
use hydrophone_downloader::domain::{
    AudioExtension, CitationRecord, DeploymentRecord, DownloadFilter, Location, deployment_fname,
    parse_onc_timestamp,
};
use hydrophone_downloader::download::{DayOutcome, Downloader};
use hydrophone_downloader::enumerate::{SeenDays, enumerate_deployments};
use hydrophone_downloader::error::HydroError;
use hydrophone_downloader::onc::OncClient;

const LAT: f64 = 48.3166;
const LON: f64 = -126.0508;
const CITATION: &str = "Ocean Networks Canada Society. 2021. Barkley Canyon Axis Hydrophone Deployed 2021-04-08. Ocean Networks Canada Society. https://doi.org/10.34943/abc";

#[derive(Default)]
struct MockOnc {
    locations: Vec<Location>,
    deployments: HashMap<String, Vec<DeploymentRecord>>,
    failing_stations: Vec<String>,
    archived: HashMap<String, Vec<String>>,
    failing_orders: usize,
    empty_orders: bool,
    orders: Mutex<Vec<DownloadFilter>>,
    listings: Mutex<Vec<DownloadFilter>>,
}

impl MockOnc {
    fn station(mut self, code: &str, deployments: Vec<DeploymentRecord>) -> Self {
        self.locations.push(Location {
            location_code: code.to_string(),
            location_name: None,
            lat: Some(LAT),
            lon: Some(LON),
            depth: Some(985.0),
        });
        self.deployments.insert(code.to_string(), deployments);
        self
    }

    fn archive(mut self, date_from: &str, names: &[&str]) -> Self {
        self.archived.insert(
            date_from.to_string(),
            names.iter().map(|name| name.to_string()).collect(),
        );
        self
    }

    fn orders(&self) -> Vec<DownloadFilter> {
        self.orders.lock().unwrap().clone()
    }
}

impl OncClient for MockOnc {
    fn list_locations(&self, device_category: &str) -> Result<Vec<Location>, HydroError> {
        assert_eq!(device_category, "HYDROPHONE");
        Ok(self.locations.clone())
    }

    fn list_deployments(
        &self,
        location_code: &str,
        _device_category: &str,
    ) -> Result<Vec<DeploymentRecord>, HydroError> {
        if self.failing_stations.iter().any(|code| code == location_code) {
            return Err(HydroError::OncStatus {
                status: 500,
                message: "boom".to_string(),
            });
        }
        Ok(self
            .deployments
            .get(location_code)
            .cloned()
            .unwrap_or_default())
    }

    fn list_files(&self, filter: &DownloadFilter) -> Result<Vec<String>, HydroError> {
        self.listings.lock().unwrap().push(filter.clone());
        let key = filter.get_str("dateFrom").unwrap_or_default();
        Ok(self.archived.get(key).cloned().unwrap_or_default())
    }

    fn download_files(
        &self,
        filter: &DownloadFilter,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, HydroError> {
        let mut written = Vec::new();
        for name in self.list_files(filter)? {
            let path = out_dir.join(&name);
            fs::write(&path, b"audio").unwrap();
            written.push(path);
        }
        Ok(written)
    }

    fn order_data_product(
        &self,
        filter: &DownloadFilter,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, HydroError> {
        let mut orders = self.orders.lock().unwrap();
        orders.push(filter.clone());
        if orders.len() <= self.failing_orders {
            return Err(HydroError::OncStatus {
                status: 400,
                message: "no data".to_string(),
            });
        }
        if self.empty_orders {
            return Ok(Vec::new());
        }
        let path = out_dir.join("product.flac");
        fs::write(&path, b"product").unwrap();
        Ok(vec![path])
    }
}

fn deployment(begin: &str, end: Option<&str>, citation: Option<&str>) -> DeploymentRecord {
    DeploymentRecord {
        device_code: "ICLISTENHF1353".to_string(),
        begin: begin.to_string(),
        end: end.map(str::to_string),
        lat: LAT,
        lon: LON,
        depth: 985.0,
        citation: citation.map(|text| CitationRecord {
            citation: Some(text.to_string()),
        }),
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn now() -> NaiveDateTime {
    parse_onc_timestamp("2021-04-12T08:00:00.000Z").unwrap()
}

fn request(save_dir: &Path) -> DownloadRequest {
    DownloadRequest {
        latitude: Range {
            min: -90.0,
            max: 90.0,
        },
        longitude: Range {
            min: -180.0,
            max: 180.0,
        },
        depth: Range {
            min: 0.0,
            max: 12_000.0,
        },
        license: "CC-BY 4.0".to_string(),
        start_time: None,
        end_time: None,
        save_dir: save_dir.to_path_buf(),
    }
}

fn single_day(date_from: &str) -> Vec<DeploymentRecord> {
    vec![deployment(
        &format!("{date_from}T00:00:00.000Z"),
        Some(&format!("{date_from}T23:59:59.000Z")),
        None,
    )]
}

#[test]
fn three_day_deployment_straddles_legacy_cutoff() {
    let onc = MockOnc::default().station(
        "BACAX",
        vec![deployment(
            "2021-04-08T00:00:00.000Z",
            Some("2021-04-10T23:59:59.000Z"),
            None,
        )],
    );
    let mut seen = SeenDays::new();
    let days = enumerate_deployments(&onc, now(), &mut seen);

    let summary = days
        .iter()
        .map(|day| (day.date, day.extension))
        .collect::<Vec<_>>();
    assert_eq!(
        summary,
        vec![
            (date(2021, 4, 10), AudioExtension::Flac),
            (date(2021, 4, 9), AudioExtension::Wav),
            (date(2021, 4, 8), AudioExtension::Wav),
        ]
    );
    assert_eq!(days[0].fname, "2021_04_10-BACAXlat48.317lon-126.051");
    assert_eq!(days[0].filter.get_str("extension"), Some("flac"));
    assert_eq!(days[2].filter.get_str("extension"), Some("wav"));
}

#[test]
fn overlapping_deployments_yield_each_day_once() {
    let onc = MockOnc::default()
        .station(
            "BACAX",
            vec![
                deployment("2021-04-01T00:00:00.000Z", Some("2021-04-05T12:00:00.000Z"), None),
                deployment("2021-04-05T13:00:00.000Z", None, None),
            ],
        )
        .station("NC89", single_day("2021-04-05"));
    let mut seen = SeenDays::new();
    let days = enumerate_deployments(&onc, now(), &mut seen);

    let bacax = days
        .iter()
        .filter(|day| day.station == "BACAX")
        .collect::<Vec<_>>();
    assert_eq!(bacax.len(), 12);
    assert_eq!(bacax.first().unwrap().date, date(2021, 4, 12));
    assert_eq!(bacax.last().unwrap().date, date(2021, 4, 1));
    assert!(days.iter().any(|day| day.station == "NC89"));
    assert!(days.windows(2).all(|pair| pair[0].date >= pair[1].date));
    assert_eq!(seen.len(), days.len());
}

#[test]
fn failing_station_does_not_stop_enumeration() {
    let mut onc = MockOnc::default()
        .station("BROKEN", single_day("2021-04-03"))
        .station("BACAX", single_day("2021-04-04"));
    onc.failing_stations.push("BROKEN".to_string());

    let days = enumerate_deployments(&onc, now(), &mut SeenDays::new());
    assert_eq!(days.len(), 1);
    assert_eq!(days[0].station, "BACAX");
}

#[test]
fn direct_download_moves_files_and_records_filter() {
    let temp = tempfile::tempdir().unwrap();
    let onc = MockOnc::default()
        .station("BACAX", single_day("2021-04-10"))
        .archive(
            "2021-04-10T00:00:00.000Z",
            &[
                "ICLISTENHF1353_20210410T000000.000Z.flac",
                "ICLISTENHF1353_20210410T000500.000Z.flac",
            ],
        );
    let downloader = Downloader::new(onc);

    let report = downloader.download_data(&request(temp.path()), now()).unwrap();

    assert_eq!(report.days.len(), 1);
    assert_eq!(report.days[0].outcome, DayOutcome::Direct { files: 2 });
    assert_eq!(report.moved(), 2);
    let dest = temp
        .path()
        .join(deployment_fname(date(2021, 4, 10), "BACAX", LAT, LON));
    assert!(dest.join("ICLISTENHF1353_20210410T000500.000Z.flac").exists());

    let filters: serde_json::Value =
        serde_json::from_slice(&fs::read(dest.join("filters.json")).unwrap()).unwrap();
    assert_eq!(filters["rowLimit"], 80_000);
    assert_eq!(filters["deviceCode"], "ICLISTENHF1353");
    assert_eq!(filters["dateTo"], "2021-04-11T00:00:00.000Z");
    assert!(downloader.client().orders().is_empty());

    let leftovers = fs::read_dir(temp.path())
        .unwrap()
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("tmp_"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn empty_listing_walks_overlays_until_one_succeeds() {
    let temp = tempfile::tempdir().unwrap();
    let mut onc = MockOnc::default().station("BACAX", single_day("2021-04-10"));
    onc.failing_orders = 2;
    let downloader = Downloader::new(onc);

    let report = downloader.download_data(&request(temp.path()), now()).unwrap();

    assert_matches!(
        &report.days[0].outcome,
        DayOutcome::Fallback { overlay } if overlay == "all-channels"
    );
    let orders = downloader.client().orders();
    assert_eq!(orders.len(), 3);
    assert_eq!(orders[0].get_str("dpo_hydrophoneDataDiversionMode"), Some("OD"));
    assert_eq!(orders[1].get_str("dpo_hydrophoneChannel"), Some("All"));
    assert_eq!(orders[2].get_str("dpo_hydrophoneDataDiversionMode"), None);
    assert_eq!(orders[2].get_str("locationCode"), Some("BACAX"));
    assert_eq!(orders[2].get_str("dataProductCode"), Some("AD"));
    assert_eq!(orders[2].get_str("dateFrom"), Some("2021-04-10"));

    let dest = temp
        .path()
        .join(deployment_fname(date(2021, 4, 10), "BACAX", LAT, LON));
    assert!(dest.join("product.flac").exists());
    let filters: serde_json::Value =
        serde_json::from_slice(&fs::read(dest.join("filters.json")).unwrap()).unwrap();
    assert_eq!(filters["dpo_hydrophoneChannel"], "All");
    assert_eq!(filters["dpo_audioDownsample"], -1);
}

#[test]
fn overlay_without_data_is_still_accepted() {
    let temp = tempfile::tempdir().unwrap();
    let mut onc = MockOnc::default().station("BACAX", single_day("2021-04-10"));
    onc.empty_orders = true;
    let downloader = Downloader::new(onc);

    let report = downloader.download_data(&request(temp.path()), now()).unwrap();

    assert_matches!(
        &report.days[0].outcome,
        DayOutcome::Fallback { overlay } if overlay == "diversion"
    );
    assert_eq!(report.moved(), 0);
    assert_eq!(downloader.client().orders().len(), 1);

    let dest = temp
        .path()
        .join(deployment_fname(date(2021, 4, 10), "BACAX", LAT, LON));
    let filters: serde_json::Value =
        serde_json::from_slice(&fs::read(dest.join("filters.json")).unwrap()).unwrap();
    assert_eq!(filters["dpo_hydrophoneDataDiversionMode"], "OD");
    assert!(filters.get("dpo_hydrophoneChannel").is_none());
    assert!(filters.get("dpo_audioFormatConversion").is_none());
}

#[test]
fn exhausted_overlays_leave_day_unresolved() {
    let temp = tempfile::tempdir().unwrap();
    let mut onc = MockOnc::default()
        .station("BACAX", single_day("2021-04-10"))
        .station("NC89", single_day("2021-04-09"));
    onc.failing_orders = usize::MAX;
    let downloader = Downloader::new(onc);

    let report = downloader.download_data(&request(temp.path()), now()).unwrap();

    assert_eq!(report.days.len(), 2);
    assert!(
        report
            .days
            .iter()
            .all(|day| day.outcome == DayOutcome::Unresolved)
    );
    assert_eq!(downloader.client().orders().len(), 12);
    let dest = temp
        .path()
        .join(deployment_fname(date(2021, 4, 10), "BACAX", LAT, LON));
    assert!(!dest.join("filters.json").exists());
}

#[test]
fn citation_becomes_reference_file() {
    let temp = tempfile::tempdir().unwrap();
    let onc = MockOnc::default()
        .station(
            "BACAX",
            vec![deployment(
                "2021-04-10T00:00:00.000Z",
                Some("2021-04-10T23:59:59.000Z"),
                Some(CITATION),
            )],
        )
        .station(
            "NC89",
            vec![deployment(
                "2021-04-09T00:00:00.000Z",
                Some("2021-04-09T23:59:59.000Z"),
                Some("Not. A. Citation"),
            )],
        );
    let downloader = Downloader::new(onc);

    let report = downloader.download_data(&request(temp.path()), now()).unwrap();
    assert_eq!(report.days.len(), 2);

    let fname = deployment_fname(date(2021, 4, 10), "BACAX", LAT, LON);
    let bib = fs::read_to_string(temp.path().join(&fname).join("reference.bib")).unwrap();
    assert!(bib.starts_with(&format!("@misc{{{fname}, author={{Ocean Networks Canada Society}}")));
    assert!(bib.contains("doi={https://doi.org/10.34943/abc}"));

    let broken = deployment_fname(date(2021, 4, 9), "NC89", LAT, LON);
    assert!(!temp.path().join(broken).join("reference.bib").exists());
}

#[test]
fn existing_files_are_not_overwritten() {
    let temp = tempfile::tempdir().unwrap();
    let name = "ICLISTENHF1353_20210410T000000.000Z.flac";
    let dest = temp
        .path()
        .join(deployment_fname(date(2021, 4, 10), "BACAX", LAT, LON));
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join(name), b"original").unwrap();
    let onc = MockOnc::default()
        .station("BACAX", single_day("2021-04-10"))
        .archive("2021-04-10T00:00:00.000Z", &[name]);

    let report = Downloader::new(onc)
        .download_data(&request(temp.path()), now())
        .unwrap();

    assert_eq!(report.dropped(), 1);
    assert_eq!(report.moved(), 0);
    assert_eq!(fs::read(dest.join(name)).unwrap(), b"original");
}

#[test]
fn days_outside_request_are_not_fetched() {
    let temp = tempfile::tempdir().unwrap();
    let onc = MockOnc::default().station(
        "BACAX",
        vec![deployment(
            "2021-04-01T00:00:00.000Z",
            Some("2021-04-10T23:59:59.000Z"),
            None,
        )],
    );
    let downloader = Downloader::new(onc);

    let mut window = request(temp.path());
    window.start_time = Some(date(2021, 4, 3));
    window.end_time = Some(date(2021, 4, 4));
    let days = downloader.available_days(&window, now());
    assert_eq!(
        days.iter().map(|day| day.date).collect::<Vec<_>>(),
        vec![date(2021, 4, 4), date(2021, 4, 3)]
    );

    let mut north = request(temp.path());
    north.latitude = Range {
        min: 60.0,
        max: 90.0,
    };
    let report = downloader.download_data(&north, now()).unwrap();
    assert!(report.days.is_empty());
    assert!(downloader.client().listings.lock().unwrap().is_empty());

    let mut other_license = request(temp.path());
    other_license.license = "CC0".to_string();
    assert!(downloader.available_days(&other_license, now()).is_empty());
}
