//! Canonical field template
//!
//! A template is the field-name -> value mapping discovered in a document.
//! Field names are kept exactly as the codec reported them; the key set is
//! the only thing a fill is allowed to write.

use super::provenance::Provenance;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Ordered field-name -> value mapping (discovery order)
pub type FieldMap = IndexMap<String, String>;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(PathBuf),

    #[error("Template I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed template {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Local path or URL of the document the fields belong to
    pub document_reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(default)]
    pub fields: FieldMap,
}

impl Template {
    /// Template with every discovered field set to the empty string
    pub fn new<I>(document_reference: impl Into<String>, field_names: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            document_reference: document_reference.into(),
            provenance: None,
            fields: field_names.into_iter().map(|name| (name, String::new())).collect(),
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Copy of this template with values taken from `values`
    ///
    /// Only fields the template already knows are written. Keys in `values`
    /// that the template does not contain are returned, never added.
    pub fn with_values(&self, values: &FieldMap) -> (Template, Vec<String>) {
        let mut filled = self.clone();
        let mut unknown = Vec::new();

        for (name, value) in values {
            match filled.fields.get_mut(name) {
                Some(slot) => *slot = value.clone(),
                None => unknown.push(name.clone()),
            }
        }

        (filled, unknown)
    }

    pub async fn load(path: &Path) -> Result<Self, TemplateError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TemplateError::NotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(TemplateError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&content).map_err(|source| TemplateError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write canonical pretty JSON, creating parent directories
    pub async fn save(&self, path: &Path) -> Result<(), TemplateError> {
        let io_err = |source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut json = serde_json::to_string_pretty(self).map_err(|source| {
            TemplateError::Malformed {
                path: path.to_path_buf(),
                source,
            }
        })?;
        json.push('\n');

        tokio::fs::write(path, json).await.map_err(io_err)
    }
}
