use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DownloadRequest;
use crate::domain::{AudioExtension, Citation, DeploymentDay};
use crate::enumerate::{SeenDays, enumerate_deployments, filter_deployments};
use crate::error::HydroError;
use crate::fallback;
use crate::onc::OncClient;
use crate::output::{create_progress, finish_progress};
use crate::store::Store;

/// Upper bound on archived files listed for a single day.
pub const ROW_LIMIT: u32 = 80_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DayOutcome {
    Direct { files: usize },
    DirectFailed { error: String },
    Fallback { overlay: String },
    Unresolved,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayReport {
    pub fname: String,
    pub station: String,
    pub date: NaiveDate,
    pub outcome: DayOutcome,
    pub moved: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub days: Vec<DayReport>,
    pub stale_staging_removed: usize,
}

impl DownloadReport {
    pub fn count(&self, pred: impl Fn(&DayOutcome) -> bool) -> usize {
        self.days.iter().filter(|day| pred(&day.outcome)).count()
    }

    pub fn moved(&self) -> usize {
        self.days.iter().map(|day| day.moved).sum()
    }

    pub fn dropped(&self) -> usize {
        self.days.iter().map(|day| day.dropped).sum()
    }
}

pub struct Downloader<C: OncClient> {
    client: C,
}

impl<C: OncClient> Downloader<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Enumerates every deployment day and keeps those matching `request`.
    pub fn available_days(
        &self,
        request: &DownloadRequest,
        now: NaiveDateTime,
    ) -> Vec<DeploymentDay> {
        let mut seen = SeenDays::new();
        let days = enumerate_deployments(&self.client, now, &mut seen);
        filter_deployments(days, request)
    }

    /// Downloads every matching deployment day, one at a time.
    pub fn download_data(
        &self,
        request: &DownloadRequest,
        now: NaiveDateTime,
    ) -> Result<DownloadReport, HydroError> {
        let store = Store::new(&request.save_dir)?;
        store.ensure_root()?;
        let mut report = DownloadReport {
            stale_staging_removed: store.remove_empty_staging()?,
            ..DownloadReport::default()
        };

        let days = self.available_days(request, now);
        info!(count = days.len(), save_dir = %store.root(), "deployment days selected");

        let progress = create_progress(days.len(), "days");
        for day in &days {
            let day_report = match self.download_day(&store, day, Local::now().time()) {
                Ok(day_report) => day_report,
                Err(err) => {
                    warn!(fname = %day.fname, "download failed: {err}");
                    DayReport {
                        fname: day.fname.clone(),
                        station: day.station.clone(),
                        date: day.date,
                        outcome: DayOutcome::Failed {
                            error: err.to_string(),
                        },
                        moved: 0,
                        dropped: 0,
                    }
                }
            };
            report.days.push(day_report);
            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }
        finish_progress(progress, "download complete");
        Ok(report)
    }

    pub fn download_day(
        &self,
        store: &Store,
        day: &DeploymentDay,
        time_of_day: NaiveTime,
    ) -> Result<DayReport, HydroError> {
        let dest = store.ensure_deployment_dir(day)?;
        let staging = store.stage(day, time_of_day)?;
        debug!(staging = %staging.path().display(), "staging directory allocated");

        if let Some(text) = &day.citation {
            match text.parse::<Citation>() {
                Ok(citation) => {
                    if let Err(err) = Store::write_reference(&dest, &citation.to_bibtex(&day.fname))
                    {
                        warn!(fname = %day.fname, "writing reference failed: {err}");
                    }
                }
                Err(err) => warn!(fname = %day.fname, "{err}"),
            }
        }

        let mut filter = day.filter.clone();
        filter.set("rowLimit", ROW_LIMIT);
        let listing = match self.client.list_files(&filter) {
            Ok(files) => files,
            Err(err) => {
                warn!(fname = %day.fname, "file listing failed: {err}");
                Vec::new()
            }
        };

        let outcome = if !listing.is_empty() {
            match self.client.download_files(&filter, staging.path()) {
                Ok(files) => {
                    if let Err(err) = Store::write_filters(&dest, &filter) {
                        warn!(fname = %day.fname, "writing filters failed: {err}");
                    }
                    info!(fname = %day.fname, files = files.len(), "archived files downloaded");
                    DayOutcome::Direct { files: files.len() }
                }
                Err(err) => {
                    warn!(
                        fname = %day.fname,
                        "direct download failed, keeping partial data: {err}"
                    );
                    DayOutcome::DirectFailed {
                        error: err.to_string(),
                    }
                }
            }
        } else {
            let resolution = fallback::resolve(&self.client, day, staging.path());
            match resolution.overlay {
                Some(overlay) if resolution.succeeded => {
                    if let Err(err) = Store::write_filters(&dest, &resolution.filter) {
                        warn!(fname = %day.fname, "writing filters failed: {err}");
                    }
                    DayOutcome::Fallback {
                        overlay: overlay.to_string(),
                    }
                }
                _ => DayOutcome::Unresolved,
            }
        };

        if day.extension == AudioExtension::Wav {
            info!(fname = %day.fname, "legacy day delivered as WAV, kept unconverted");
        }

        let moved = Store::move_staged(staging.path(), &dest)?;
        if let Err(err) = staging.close() {
            debug!("staging cleanup failed: {err}");
        }

        Ok(DayReport {
            fname: day.fname.clone(),
            station: day.station.clone(),
            date: day.date,
            outcome,
            moved: moved.moved,
            dropped: moved.dropped,
        })
    }
}
