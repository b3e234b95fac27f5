//! Form catalog
//!
//! Read-only registry of downloadable forms, loaded once from a delimited
//! file with a fixed column order:
//!
//! `region, form_name, form_code, description, format, direct_source_url,
//! info_url, online_available, notes`
//!
//! The first row is a header and is always skipped. Loading is atomic: one
//! malformed row fails the whole load.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const COLUMN_COUNT: usize = 9;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Malformed catalog source at line {line}: {reason}")]
    MalformedSource { line: u64, reason: String },

    #[error("Cannot read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Form code not found in catalog: {0}")]
    NotFound(String),
}

impl formflow_common::StagedError for CatalogError {
    fn stage(&self) -> &'static str {
        match self {
            CatalogError::MalformedSource { .. } | CatalogError::Io { .. } => "load_catalog",
            CatalogError::NotFound(_) => "lookup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub region: String,
    pub form_name: String,
    pub form_code: String,
    pub description: String,
    pub format: String,
    pub source_url: Option<String>,
    pub info_url: Option<String>,
    pub online_available: bool,
    pub notes: String,
}

impl CatalogEntry {
    /// Source URL if it can be fetched over HTTP(S)
    pub fn fetchable_source(&self) -> Option<&str> {
        self.source_url
            .as_deref()
            .filter(|url| url.starts_with("https://") || url.starts_with("http://"))
    }

    /// Local file name for the downloaded binary
    ///
    /// Last path segment of the source URL, else `<code>.<format>` lowercased.
    pub fn file_name(&self) -> String {
        let from_url = self
            .fetchable_source()
            .and_then(|url| reqwest::Url::parse(url).ok())
            .and_then(|url| {
                url.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .filter(|segment| !segment.is_empty());

        from_url.unwrap_or_else(|| {
            let extension = if self.format.is_empty() {
                "bin".to_string()
            } else {
                self.format.to_lowercase()
            };
            format!("{}.{}", self.form_code.to_lowercase(), extension)
        })
    }
}

#[derive(Debug, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    by_code: HashMap<String, usize>,
}

impl Catalog {
    /// Load a catalog file
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let file = std::fs::File::open(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_reader(file)?;
        info!(
            "Loaded {} catalog entries from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Parse a catalog from any delimited source
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut catalog = Catalog::default();
        for record in csv_reader.records() {
            let record = record.map_err(|e| CatalogError::MalformedSource {
                line: e.position().map(|p| p.line()).unwrap_or(0),
                reason: e.to_string(),
            })?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let entry = parse_record(&record, line)?;

            let key = entry.form_code.to_lowercase();
            if catalog.by_code.contains_key(&key) {
                return Err(CatalogError::MalformedSource {
                    line,
                    reason: format!("duplicate form code '{}'", entry.form_code),
                });
            }
            catalog.by_code.insert(key, catalog.entries.len());
            catalog.entries.push(entry);
        }

        Ok(catalog)
    }

    /// Case-insensitive lookup by form code
    pub fn by_code(&self, code: &str) -> Option<&CatalogEntry> {
        self.by_code
            .get(&code.trim().to_lowercase())
            .map(|&index| &self.entries[index])
    }

    /// Like [`Catalog::by_code`] but absence is an error
    pub fn require(&self, code: &str) -> Result<&CatalogEntry, CatalogError> {
        self.by_code(code)
            .ok_or_else(|| CatalogError::NotFound(code.to_string()))
    }

    /// Entries for a region (case-insensitive); empty when none match
    pub fn by_region(&self, region: &str) -> Vec<&CatalogEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.region.eq_ignore_ascii_case(region.trim()))
            .collect()
    }

    /// Distinct regions, sorted
    pub fn states(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.region.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Case-insensitive substring match on code, name and description
    pub fn search(&self, term: &str) -> Vec<&CatalogEntry> {
        let needle = term.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|entry| {
                entry.form_code.to_lowercase().contains(&needle)
                    || entry.form_name.to_lowercase().contains(&needle)
                    || entry.description.to_lowercase().contains(&needle)
            })
            .collect()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_record(record: &csv::StringRecord, line: u64) -> Result<CatalogEntry, CatalogError> {
    if record.len() < COLUMN_COUNT {
        return Err(CatalogError::MalformedSource {
            line,
            reason: format!(
                "expected {} columns, found {}",
                COLUMN_COUNT,
                record.len()
            ),
        });
    }

    let cell = |index: usize| record.get(index).unwrap_or_default().to_string();
    let optional = |index: usize| Some(cell(index)).filter(|value| !value.is_empty());

    let form_code = cell(2);
    if form_code.is_empty() {
        return Err(CatalogError::MalformedSource {
            line,
            reason: "empty form code".to_string(),
        });
    }

    let online_available =
        parse_flag(&cell(7)).ok_or_else(|| CatalogError::MalformedSource {
            line,
            reason: format!("invalid online_available value '{}'", cell(7)),
        })?;

    Ok(CatalogEntry {
        region: cell(0),
        form_name: cell(1),
        form_code,
        description: cell(3),
        format: cell(4),
        source_url: optional(5),
        info_url: optional(6),
        online_available,
        notes: cell(8),
    })
}

/// Boolean-like catalog cell; empty means false
fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" | "" => Some(false),
        _ => None,
    }
}
