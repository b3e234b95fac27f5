//! Form downloader
//!
//! Resolves a catalog entry, fetches its binary into a destination directory
//! and writes the provenance sidecar next to it. Progress is published at
//! fixed checkpoints (the fetch itself is not instrumented):
//!
//! | checkpoint      | percent |
//! |-----------------|---------|
//! | form resolved   | 20      |
//! | fetch started   | 40      |
//! | metadata saved  | 80      |
//! | complete        | 100     |

use crate::models::provenance::{self, Provenance};
use crate::services::catalog::{Catalog, CatalogEntry};
use formflow_common::config::AppConfig;
use formflow_common::events::{DownloadDetail, EventBus, EventFamily, OperationReporter};
use formflow_common::StagedError;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Form code not found in catalog: {0}")]
    NotFound(String),

    #[error("Form {0} has no fetchable source URL")]
    NoSource(String),

    #[error("Fetch of {url} failed: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Logged and reported as progress; never returned from `download`
    #[error("Metadata write failed for {path}: {reason}")]
    MetadataWriteFailed { path: PathBuf, reason: String },

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl StagedError for DownloadError {
    fn stage(&self) -> &'static str {
        match self {
            DownloadError::NotFound(_) => "resolve_form",
            DownloadError::NoSource(_) => "resolve_source",
            DownloadError::FetchFailed { .. } => "fetch",
            DownloadError::Io { .. } => "write_document",
            DownloadError::MetadataWriteFailed { .. } => "write_metadata",
            DownloadError::Client(_) => "configure",
        }
    }
}

/// Result of a successful download
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub entry: CatalogEntry,
    /// `None` when the sidecar could not be written
    pub provenance_path: Option<PathBuf>,
}

/// Build the HTTP client used for form fetches
pub fn build_http_client(config: &AppConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.http_timeout)
        .build()
}

/// GET `url` and write the body to `destination`, returning the byte count
pub(crate) async fn fetch_to_file(
    client: &reqwest::Client,
    url: &str,
    destination: &Path,
) -> Result<u64, DownloadError> {
    let fetch_failed = |reason: String| DownloadError::FetchFailed {
        url: url.to_string(),
        reason,
    };

    debug!(url = %url, "Fetching document");
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| fetch_failed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(fetch_failed(format!("HTTP {}", status.as_u16())));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| fetch_failed(e.to_string()))?;

    tokio::fs::write(destination, &bytes)
        .await
        .map_err(|source| DownloadError::Io {
            path: destination.to_path_buf(),
            source,
        })?;

    Ok(bytes.len() as u64)
}

pub struct Downloader {
    http_client: reqwest::Client,
    event_bus: EventBus,
}

impl Downloader {
    pub fn new(config: &AppConfig, event_bus: EventBus) -> Result<Self, DownloadError> {
        let http_client =
            build_http_client(config).map_err(|e| DownloadError::Client(e.to_string()))?;
        Ok(Self::with_client(http_client, event_bus))
    }

    pub fn with_client(http_client: reqwest::Client, event_bus: EventBus) -> Self {
        Self {
            http_client,
            event_bus,
        }
    }

    /// Download the form `code` into `destination_dir`
    pub async fn download(
        &self,
        catalog: &Catalog,
        code: &str,
        destination_dir: &Path,
    ) -> Result<DownloadOutcome, DownloadError> {
        let mut reporter = OperationReporter::new(&self.event_bus, EventFamily::Download);
        let mut detail = DownloadDetail {
            form_code: code.to_string(),
            ..Default::default()
        };
        reporter.started(detail.clone());

        let result = self
            .download_inner(catalog, code, destination_dir, &reporter, &mut detail)
            .await;
        match result {
            Ok(outcome) => {
                info!(
                    form_code = %outcome.entry.form_code,
                    path = %outcome.path.display(),
                    "Form downloaded"
                );
                reporter.completed(detail, Some(100));
                Ok(outcome)
            }
            Err(e) => {
                reporter.failed(detail, &e);
                Err(e)
            }
        }
    }

    async fn download_inner(
        &self,
        catalog: &Catalog,
        code: &str,
        destination_dir: &Path,
        reporter: &OperationReporter,
        detail: &mut DownloadDetail,
    ) -> Result<DownloadOutcome, DownloadError> {
        let entry = catalog
            .by_code(code)
            .ok_or_else(|| DownloadError::NotFound(code.to_string()))?
            .clone();
        detail.form_code = entry.form_code.clone();
        detail.region = Some(entry.region.clone());

        let url = entry
            .fetchable_source()
            .ok_or_else(|| DownloadError::NoSource(entry.form_code.clone()))?
            .to_string();
        reporter.progress(detail.clone(), Some(20), format!("Resolved {}", entry.form_name));

        tokio::fs::create_dir_all(destination_dir)
            .await
            .map_err(|source| DownloadError::Io {
                path: destination_dir.to_path_buf(),
                source,
            })?;
        let path = destination_dir.join(entry.file_name());

        reporter.progress(detail.clone(), Some(40), format!("Fetching {}", url));
        let bytes = fetch_to_file(&self.http_client, &url, &path).await?;
        debug!(bytes, path = %path.display(), "Document written");
        detail.path = Some(path.clone());

        let record = Provenance::new(
            entry.form_code.clone(),
            entry.region.clone(),
            Some(url.clone()),
        );
        let provenance_path = match provenance::advisory_save(&record, &path).await {
            Ok(sidecar) => {
                detail.provenance_path = Some(sidecar.clone());
                reporter.progress(detail.clone(), Some(80), "Metadata saved");
                Some(sidecar)
            }
            Err(e) => {
                let warning = DownloadError::MetadataWriteFailed {
                    path: Provenance::sidecar_path(&path),
                    reason: e.to_string(),
                };
                reporter.progress(detail.clone(), Some(80), warning.to_string());
                None
            }
        };

        Ok(DownloadOutcome {
            path,
            entry,
            provenance_path,
        })
    }
}
