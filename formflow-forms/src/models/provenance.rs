//! Provenance sidecar records
//!
//! Each fetched document may carry `<document>.meta.json` describing where it
//! came from and when it was processed. A missing sidecar means "no history"
//! and is never an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Suffix appended to the document's full file name
pub const SIDECAR_SUFFIX: &str = ".meta.json";

#[derive(Debug, Error)]
pub enum ProvenanceError {
    #[error("Provenance I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed provenance record {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Origin and processing history of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub origin_form_code: String,
    pub origin_region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub downloaded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspected_at: Option<DateTime<Utc>>,
}

impl Provenance {
    pub fn new(
        origin_form_code: impl Into<String>,
        origin_region: impl Into<String>,
        source_url: Option<String>,
    ) -> Self {
        Self {
            origin_form_code: origin_form_code.into(),
            origin_region: origin_region.into(),
            source_url,
            downloaded_at: Utc::now(),
            inspected_at: None,
        }
    }

    /// `f3520.pdf` -> `f3520.pdf.meta.json`
    pub fn sidecar_path(document: &Path) -> PathBuf {
        let mut name = document
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(SIDECAR_SUFFIX);
        document.with_file_name(name)
    }

    /// Read the sidecar of `document`; `Ok(None)` when there is none
    pub async fn load(document: &Path) -> Result<Option<Self>, ProvenanceError> {
        let path = Self::sidecar_path(document);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ProvenanceError::Io { path, source }),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| ProvenanceError::Malformed { path, source })
    }

    /// Write the sidecar next to `document`, returning its path
    pub async fn save(&self, document: &Path) -> Result<PathBuf, ProvenanceError> {
        let path = Self::sidecar_path(document);
        let json = serde_json::to_string_pretty(self).map_err(|source| {
            ProvenanceError::Malformed {
                path: path.clone(),
                source,
            }
        })?;

        tokio::fs::write(&path, json)
            .await
            .map_err(|source| ProvenanceError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

/// Save a sidecar without letting a failure escape
///
/// Returns the sidecar path on success; on failure the error is logged and
/// handed back for the caller to report as a warning.
pub async fn advisory_save(
    provenance: &Provenance,
    document: &Path,
) -> Result<PathBuf, ProvenanceError> {
    let result = provenance.save(document).await;
    if let Err(e) = &result {
        warn!(document = %document.display(), "Provenance write failed (document kept): {}", e);
    }
    result
}

/// Stamp `inspected_at` on an existing sidecar
///
/// Absent sidecars are left absent. Any failure is logged and swallowed;
/// the returned value is the record as it now stands, if one exists.
pub async fn advisory_touch_inspected(document: &Path) -> Option<Provenance> {
    let mut provenance = match Provenance::load(document).await {
        Ok(Some(p)) => p,
        Ok(None) => {
            debug!(document = %document.display(), "No provenance sidecar to update");
            return None;
        }
        Err(e) => {
            warn!("Skipping inspected_at update: {}", e);
            return None;
        }
    };

    provenance.inspected_at = Some(Utc::now());
    if let Err(e) = provenance.save(document).await {
        warn!("Failed to record inspected_at: {}", e);
    }
    Some(provenance)
}
