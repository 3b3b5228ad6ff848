use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_DISPOSITION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::domain::{DeploymentRecord, DownloadFilter, Location};
use crate::error::HydroError;

pub const ONC_API_URL: &str = "https://data.oceannetworks.ca/api";

/// The remote catalog and data-delivery operations the downloader depends on.
pub trait OncClient {
    fn list_locations(&self, device_category: &str) -> Result<Vec<Location>, HydroError>;
    fn list_deployments(
        &self,
        location_code: &str,
        device_category: &str,
    ) -> Result<Vec<DeploymentRecord>, HydroError>;
    /// Archived file names matching a device filter.
    fn list_files(&self, filter: &DownloadFilter) -> Result<Vec<String>, HydroError>;
    /// Downloads every archived file matching `filter` into `out_dir`.
    fn download_files(
        &self,
        filter: &DownloadFilter,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, HydroError>;
    /// Requests, runs and downloads a data product into `out_dir`.
    fn order_data_product(
        &self,
        filter: &DownloadFilter,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, HydroError>;
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductRequest {
    dp_request_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductRun {
    dp_run_id: u64,
}

#[derive(Clone)]
pub struct OncHttpClient {
    client: Client,
    base_url: String,
    token: String,
    poll_interval: Duration,
    max_polls: usize,
}

impl OncHttpClient {
    pub fn new(token: &str) -> Result<Self, HydroError> {
        Self::with_base_url(token, ONC_API_URL)
    }

    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self, HydroError> {
        if token.trim().is_empty() {
            return Err(HydroError::MissingToken);
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("hydrophone-dl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HydroError::OncHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| HydroError::OncHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            poll_interval: Duration::from_secs(2),
            max_polls: 900,
        })
    }

    fn endpoint(&self, service: &str, method: &str) -> RequestBuilder {
        self.client
            .get(format!("{}/{service}", self.base_url))
            .query(&[("method", method), ("token", self.token.as_str())])
    }

    fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, HydroError> {
        let response = request
            .send()
            .map_err(|err| HydroError::OncHttp(err.to_string()))?;
        let response = handle_status(response)?;
        response
            .json::<T>()
            .map_err(|err| HydroError::OncHttp(err.to_string()))
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, HydroError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    if attempt < MAX_RETRIES && is_retryable_status(resp.status().as_u16()) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(HydroError::OncHttp(err.to_string()));
                }
            }
        }
    }

    fn download_archive_file(&self, name: &str, out_dir: &Path) -> Result<PathBuf, HydroError> {
        let response = self.send_with_retries(|| {
            self.endpoint("archivefiles", "getFile")
                .query(&[("filename", name)])
        })?;
        let destination = out_dir.join(name);
        write_response_to_file(response, &destination)?;
        Ok(destination)
    }

    fn run_product(&self, request_id: u64) -> Result<Vec<u64>, HydroError> {
        let runs: Vec<ProductRun> = self.get_json(
            self.endpoint("dataProductDelivery", "run")
                .query(&[("dpRequestId", request_id)]),
        )?;
        Ok(runs.into_iter().map(|run| run.dp_run_id).collect())
    }

    fn download_run(&self, run_id: u64, out_dir: &Path) -> Result<Vec<PathBuf>, HydroError> {
        let mut files = Vec::new();
        let mut index = 1usize;
        let mut polls = 0usize;
        loop {
            let response = self
                .endpoint("dataProductDelivery", "download")
                .query(&[("dpRunId", run_id.to_string()), ("index", index.to_string())])
                .send()
                .map_err(|err| HydroError::OncHttp(err.to_string()))?;
            match response.status() {
                StatusCode::OK => {
                    let name = attachment_name(&response)
                        .unwrap_or_else(|| format!("dp_{run_id}_{index}"));
                    let destination = out_dir.join(&name);
                    write_response_to_file(response, &destination)?;
                    debug!(file = %destination.display(), "data product file downloaded");
                    files.push(destination);
                    index += 1;
                }
                StatusCode::ACCEPTED => {
                    polls += 1;
                    if polls > self.max_polls {
                        return Err(HydroError::OncHttp(format!(
                            "data product run {run_id} still processing after {polls} polls"
                        )));
                    }
                    thread::sleep(self.poll_interval);
                }
                StatusCode::NO_CONTENT | StatusCode::NOT_FOUND if index > 1 => break,
                _ => {
                    handle_status(response)?;
                    break;
                }
            }
        }
        Ok(files)
    }
}

impl OncClient for OncHttpClient {
    fn list_locations(&self, device_category: &str) -> Result<Vec<Location>, HydroError> {
        self.get_json(
            self.endpoint("locations", "get")
                .query(&[("deviceCategoryCode", device_category)]),
        )
    }

    fn list_deployments(
        &self,
        location_code: &str,
        device_category: &str,
    ) -> Result<Vec<DeploymentRecord>, HydroError> {
        self.get_json(self.endpoint("deployments", "get").query(&[
            ("locationCode", location_code),
            ("deviceCategoryCode", device_category),
        ]))
    }

    fn list_files(&self, filter: &DownloadFilter) -> Result<Vec<String>, HydroError> {
        let list: FileList = self.get_json(
            self.endpoint("archivefiles", "getListByDevice")
                .query(&filter.query_pairs()),
        )?;
        Ok(list.files)
    }

    fn download_files(
        &self,
        filter: &DownloadFilter,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, HydroError> {
        fs::create_dir_all(out_dir).map_err(|err| HydroError::Filesystem(err.to_string()))?;
        let names = self.list_files(filter)?;
        info!(count = names.len(), "downloading archived files");
        names
            .iter()
            .map(|name| self.download_archive_file(name, out_dir))
            .collect()
    }

    fn order_data_product(
        &self,
        filter: &DownloadFilter,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, HydroError> {
        fs::create_dir_all(out_dir).map_err(|err| HydroError::Filesystem(err.to_string()))?;
        let request: ProductRequest = self.get_json(
            self.endpoint("dataProductDelivery", "request")
                .query(&filter.query_pairs()),
        )?;
        info!(request_id = request.dp_request_id, "data product requested");
        let mut files = Vec::new();
        for run_id in self.run_product(request.dp_request_id)? {
            files.extend(self.download_run(run_id, out_dir)?);
        }
        if files.is_empty() {
            warn!(request_id = request.dp_request_id, "data product delivered no files");
        }
        Ok(files)
    }
}

fn handle_status(response: Response) -> Result<Response, HydroError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let reason = response
        .status()
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();
    let body = response.text().unwrap_or_default();
    // ONC answers 400 with a JSON list of {errorMessage, parameter}; keep it verbatim.
    let message = if body.trim().is_empty() { reason } else { body };
    Err(HydroError::OncStatus { status, message })
}

fn write_response_to_file(response: Response, destination: &Path) -> Result<(), HydroError> {
    let mut response = handle_status(response)?;
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|err| HydroError::Filesystem(err.to_string()))?;
    }
    let mut file =
        File::create(destination).map_err(|err| HydroError::Filesystem(err.to_string()))?;
    std::io::copy(&mut response, &mut file)
        .map_err(|err| HydroError::Filesystem(err.to_string()))?;
    Ok(())
}

fn attachment_name(response: &Response) -> Option<String> {
    let header = response.headers().get(CONTENT_DISPOSITION)?.to_str().ok()?;
    parse_attachment_name(header)
}

fn parse_attachment_name(header: &str) -> Option<String> {
    let (_, rest) = header.split_once("filename=")?;
    let name = rest.split(';').next()?.trim().trim_matches('"');
    let name = Path::new(name).file_name()?.to_str()?;
    (!name.is_empty()).then(|| name.to_string())
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
