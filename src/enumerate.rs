//! Expansion of ONC hydrophone deployments into per-day download units.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{info, warn};

use crate::config::DownloadRequest;
use crate::domain::{DEVICE_CATEGORY, DeploymentDay, DeploymentRecord, parse_onc_timestamp};
use crate::error::HydroError;
use crate::onc::OncClient;

/// (station, date) pairs already produced during an enumeration.
pub type SeenDays = HashSet<(String, NaiveDate)>;

/// Lists every hydrophone deployment day known to ONC, newest first.
///
/// Open-ended deployments run until `now`. A day already present in `seen`
/// is skipped, so the first deployment to claim a (station, date) pair keeps
/// it. Failing catalog calls are reported and treated as empty pages.
pub fn enumerate_deployments<C: OncClient + ?Sized>(
    client: &C,
    now: NaiveDateTime,
    seen: &mut SeenDays,
) -> Vec<DeploymentDay> {
    let locations = match client.list_locations(DEVICE_CATEGORY) {
        Ok(locations) => locations,
        Err(err) => {
            warn!("location listing failed: {err}");
            Vec::new()
        }
    };

    let mut days = Vec::new();
    for location in &locations {
        let station = location.location_code.as_str();
        let deployments = match client.list_deployments(station, DEVICE_CATEGORY) {
            Ok(deployments) => deployments,
            Err(err) => {
                warn!(station, "deployment listing failed: {err}");
                continue;
            }
        };
        for deployment in &deployments {
            match expand_deployment(station, deployment, now, seen) {
                Ok(expanded) => days.extend(expanded),
                Err(err) => {
                    warn!(
                        station,
                        device = %deployment.device_code,
                        "skipping deployment: {err}"
                    );
                }
            }
        }
    }

    days.sort_by(|a, b| b.date.cmp(&a.date));
    info!(count = days.len(), "deployment days available from ONC");
    days
}

/// One day per calendar date from begin to end inclusive, descending.
pub fn expand_deployment(
    station: &str,
    deployment: &DeploymentRecord,
    now: NaiveDateTime,
    seen: &mut SeenDays,
) -> Result<Vec<DeploymentDay>, HydroError> {
    let begin = parse_onc_timestamp(&deployment.begin)?.date();
    let end = match deployment.end.as_deref() {
        Some(end) => parse_onc_timestamp(end)?.date(),
        None => now.date(),
    };

    let mut days = Vec::new();
    let mut date = end;
    while date >= begin {
        if seen.insert((station.to_string(), date)) {
            days.push(DeploymentDay::new(station, deployment, date));
        }
        match date.pred_opt() {
            Some(previous) => date = previous,
            None => break,
        }
    }
    Ok(days)
}

/// Keeps the days inside the requested bounds, license and time window.
pub fn filter_deployments(
    days: Vec<DeploymentDay>,
    request: &DownloadRequest,
) -> Vec<DeploymentDay> {
    days.into_iter()
        .filter(|day| request.latitude.contains(day.latitude))
        .filter(|day| request.longitude.contains(day.longitude))
        .filter(|day| request.depth.contains(day.depth))
        .filter(|day| day.license == request.license)
        .filter(|day| request.start_time.map_or(true, |start| day.date >= start))
        .filter(|day| request.end_time.map_or(true, |end| day.date <= end))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AudioExtension;

    fn record(begin: &str, end: Option<&str>) -> DeploymentRecord {
        DeploymentRecord {
            device_code: "ICLISTENHF1353".to_string(),
            begin: begin.to_string(),
            end: end.map(str::to_string),
            lat: 48.3166,
            lon: -126.0508,
            depth: 985.0,
            citation: None,
        }
    }

    fn now() -> NaiveDateTime {
        parse_onc_timestamp("2021-04-12T08:30:00.000Z").unwrap()
    }

    #[test]
    fn expands_inclusive_range_descending() {
        let mut seen = SeenDays::new();
        let days = expand_deployment(
            "BACAX",
            &record("2021-04-08T00:00:00.000Z", Some("2021-04-10T00:00:00.000Z")),
            now(),
            &mut seen,
        )
        .unwrap();
        let dates = days.iter().map(|d| d.date.to_string()).collect::<Vec<_>>();
        assert_eq!(dates, vec!["2021-04-10", "2021-04-09", "2021-04-08"]);
        let extensions = days.iter().map(|d| d.extension).collect::<Vec<_>>();
        assert_eq!(
            extensions,
            vec![AudioExtension::Flac, AudioExtension::Wav, AudioExtension::Wav]
        );
    }

    #[test]
    fn open_end_runs_until_now() {
        let mut seen = SeenDays::new();
        let days = expand_deployment(
            "BACAX",
            &record("2021-04-11T17:00:00.000Z", None),
            now(),
            &mut seen,
        )
        .unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date.to_string(), "2021-04-12");
    }

    #[test]
    fn seen_days_are_not_repeated() {
        let mut seen = SeenDays::new();
        let first = record("2021-04-08T00:00:00.000Z", Some("2021-04-10T00:00:00.000Z"));
        let second = record("2021-04-10T00:00:00.000Z", Some("2021-04-11T00:00:00.000Z"));
        let a = expand_deployment("BACAX", &first, now(), &mut seen).unwrap();
        let b = expand_deployment("BACAX", &second, now(), &mut seen).unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].date.to_string(), "2021-04-11");
    }

    #[test]
    fn bad_timestamp_is_an_error() {
        let mut seen = SeenDays::new();
        assert!(expand_deployment("BACAX", &record("yesterday", None), now(), &mut seen).is_err());
        assert!(seen.is_empty());
    }
}
