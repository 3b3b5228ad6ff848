//! Alternate data-product requests for days with no archived files.
//!
//! An overlay counts as resolved as soon as its request returns without
//! error, whether or not any audio came back. Exhausting every overlay
//! leaves the day unresolved and the caller continues regardless.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{DEVICE_CATEGORY, DeploymentDay, DownloadFilter, next_day};
use crate::onc::OncClient;

const DIVERSION_MODE: &str = "dpo_hydrophoneDataDiversionMode";
const CHANNEL: &str = "dpo_hydrophoneChannel";
const FORMAT_CONVERSION: &str = "dpo_audioFormatConversion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FallbackOverlay {
    pub name: &'static str,
    pub diversion_mode: Option<&'static str>,
    pub channel: Option<&'static str>,
    pub format_conversion: Option<u8>,
}

pub const FALLBACK_OVERLAYS: [FallbackOverlay; 6] = [
    FallbackOverlay {
        name: "diversion",
        diversion_mode: Some("OD"),
        channel: None,
        format_conversion: None,
    },
    FallbackOverlay {
        name: "diversion-all-channels",
        diversion_mode: Some("OD"),
        channel: Some("All"),
        format_conversion: None,
    },
    FallbackOverlay {
        name: "all-channels",
        diversion_mode: None,
        channel: Some("All"),
        format_conversion: None,
    },
    FallbackOverlay {
        name: "raw-diversion-all-channels",
        diversion_mode: Some("OD"),
        channel: Some("All"),
        format_conversion: Some(0),
    },
    FallbackOverlay {
        name: "raw-diversion",
        diversion_mode: Some("OD"),
        channel: None,
        format_conversion: Some(0),
    },
    FallbackOverlay {
        name: "converted-diversion-all-channels",
        diversion_mode: Some("OD"),
        channel: Some("All"),
        format_conversion: Some(1),
    },
];

impl FallbackOverlay {
    pub fn apply(&self, base: &DownloadFilter) -> DownloadFilter {
        let mut filter = base.clone();
        if let Some(mode) = self.diversion_mode {
            filter.set(DIVERSION_MODE, mode);
        }
        if let Some(channel) = self.channel {
            filter.set(CHANNEL, channel);
        }
        if let Some(conversion) = self.format_conversion {
            filter.set(FORMAT_CONVERSION, conversion);
        }
        filter
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub succeeded: bool,
    pub filter: DownloadFilter,
    pub overlay: Option<&'static str>,
}

/// Data-product filter shared by every overlay, built from the station rather
/// than the device-scoped primary filter.
pub fn base_filter(day: &DeploymentDay) -> DownloadFilter {
    DownloadFilter::new()
        .with("locationCode", day.station.as_str())
        .with("deviceCategoryCode", DEVICE_CATEGORY)
        .with("dataProductCode", "AD")
        .with("extension", "flac")
        .with("dateFrom", day.date.format("%Y-%m-%d").to_string())
        .with("dateTo", next_day(day.date).format("%Y-%m-%d").to_string())
        .with("dpo_audioDownsample", -1)
}

pub fn resolve<C: OncClient + ?Sized>(
    client: &C,
    day: &DeploymentDay,
    out_dir: &Path,
) -> Resolution {
    let base = base_filter(day);
    for overlay in &FALLBACK_OVERLAYS {
        let filter = overlay.apply(&base);
        debug!(overlay = overlay.name, ?filter, "ordering data product");
        match client.order_data_product(&filter, out_dir) {
            Ok(files) => {
                info!(
                    station = %day.station,
                    date = %day.date,
                    overlay = overlay.name,
                    files = files.len(),
                    "fallback accepted"
                );
                return Resolution {
                    succeeded: true,
                    filter,
                    overlay: Some(overlay.name),
                };
            }
            Err(err) => debug!(overlay = overlay.name, "fallback attempt failed: {err}"),
        }
    }
    warn!(station = %day.station, date = %day.date, "no fallback overlay succeeded");
    Resolution {
        succeeded: false,
        filter: base,
        overlay: None,
    }
}
