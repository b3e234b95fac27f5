//! Case persistence
//!
//! Cases live at `<base>/<entity>/<form_code>/<case_id>.json`. Saves
//! overwrite in place; there is no locking between processes.

use crate::models::{Case, CaseMetadata, FormReference, Template, TemplateError, ValidationResult};
use crate::services::fill_engine::{FillEngine, FillError, FillOutcome, FillRequest, OutputTarget};
use chrono::{DateTime, TimeZone, Utc};
use formflow_common::events::{CaseAction, CaseDetail, EventBus, EventFamily, OperationReporter};
use formflow_common::StagedError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum CaseError {
    #[error("Case not found: {0}")]
    NotFound(PathBuf),

    #[error("Malformed case {path}: {source}")]
    MalformedCase {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Case {0} has neither a document nor a template reference")]
    CannotResolveDocument(String),

    #[error("Invalid name '{0}': must be non-empty and contain no path separators")]
    InvalidName(String),

    #[error("Case I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Fill(#[from] FillError),
}

impl StagedError for CaseError {
    fn stage(&self) -> &'static str {
        match self {
            CaseError::NotFound(_) | CaseError::MalformedCase { .. } => "load_case",
            CaseError::CannotResolveDocument(_) => "resolve_document",
            CaseError::InvalidName(_) => "validate_name",
            CaseError::Io { .. } => "write_case",
            CaseError::Template(_) => "load_template",
            CaseError::Fill(e) => e.stage(),
        }
    }
}

static LAST_STAMP_MICROS: AtomicI64 = AtomicI64::new(0);

/// Current time in microseconds, strictly greater than any earlier call in
/// this process
fn next_stamp() -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let mut last = LAST_STAMP_MICROS.load(Ordering::SeqCst);
    loop {
        let candidate = now.max(last + 1);
        match LAST_STAMP_MICROS.compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return Utc.timestamp_micros(candidate).single().unwrap_or_else(Utc::now),
            Err(actual) => last = actual,
        }
    }
}

/// `<entity>_<form_code>_<YYYYMMDDTHHMMSS.ffffff>`
fn case_id(entity: &str, form_code: &str, stamp: DateTime<Utc>) -> String {
    format!("{}_{}_{}", entity, form_code, stamp.format("%Y%m%dT%H%M%S%.6f"))
}

fn check_name(name: &str) -> Result<(), CaseError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." || trimmed.contains(['/', '\\']) {
        return Err(CaseError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub struct CaseStore {
    base_dir: PathBuf,
    event_bus: EventBus,
}

impl CaseStore {
    pub fn new(base_dir: impl Into<PathBuf>, event_bus: EventBus) -> Self {
        Self {
            base_dir: base_dir.into(),
            event_bus,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn case_path(&self, entity: &str, form_code: &str, case_id: &str) -> PathBuf {
        self.base_dir
            .join(entity)
            .join(form_code)
            .join(format!("{}.json", case_id))
    }

    /// Create and persist an empty case
    pub async fn create(
        &self,
        form_code: &str,
        case_name: &str,
        entity: &str,
    ) -> Result<(Case, PathBuf), CaseError> {
        let mut reporter = OperationReporter::new(&self.event_bus, EventFamily::Case);
        let mut detail = CaseDetail {
            action: CaseAction::Create,
            form_code: Some(form_code.to_string()),
            ..Default::default()
        };
        reporter.started(detail.clone());

        let result = self.create_inner(form_code, case_name, entity).await;
        match result {
            Ok((case, path)) => {
                info!(case_id = %case.case_id(), path = %path.display(), "Case created");
                detail.case_id = Some(case.case_id().to_string());
                detail.path = Some(path.clone());
                reporter.completed(detail, Some(100));
                Ok((case, path))
            }
            Err(e) => {
                reporter.failed(detail, &e);
                Err(e)
            }
        }
    }

    async fn create_inner(
        &self,
        form_code: &str,
        case_name: &str,
        entity: &str,
    ) -> Result<(Case, PathBuf), CaseError> {
        check_name(entity)?;
        check_name(form_code)?;

        let stamp = next_stamp();
        let case_id = case_id(entity, form_code, stamp);
        let mut case = Case {
            case_metadata: CaseMetadata {
                case_id: case_id.clone(),
                case_name: case_name.to_string(),
                entity: entity.to_string(),
                created_at: stamp,
                updated_at: stamp,
            },
            form_reference: FormReference {
                form_code: form_code.to_string(),
                template_reference: None,
                document_reference: None,
            },
            fields: Default::default(),
            validation: None,
        };

        let path = self.case_path(entity, form_code, &case_id);
        write_case(&mut case, &path).await?;
        Ok((case, path))
    }

    pub async fn load(&self, path: &Path) -> Result<Case, CaseError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CaseError::NotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(CaseError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&content).map_err(|source| CaseError::MalformedCase {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Stamp `updated_at` and overwrite `path`
    pub async fn save(&self, case: &mut Case, path: &Path) -> Result<(), CaseError> {
        let mut reporter = OperationReporter::new(&self.event_bus, EventFamily::Case);
        let detail = CaseDetail {
            action: CaseAction::Save,
            case_id: Some(case.case_id().to_string()),
            form_code: Some(case.form_code().to_string()),
            path: Some(path.to_path_buf()),
        };
        reporter.started(detail.clone());

        match write_case(case, path).await {
            Ok(()) => {
                debug!(case_id = %case.case_id(), "Case saved");
                reporter.completed(detail, Some(100));
                Ok(())
            }
            Err(e) => {
                reporter.failed(detail, &e);
                Err(e)
            }
        }
    }

    /// Case files under the store, optionally narrowed to one entity
    pub fn list(&self, entity: Option<&str>) -> Result<Vec<PathBuf>, CaseError> {
        let root = match entity {
            Some(entity) => {
                check_name(entity)?;
                self.base_dir.join(entity)
            }
            None => self.base_dir.clone(),
        };
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut cases = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false) {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if entry.file_type().is_file()
                        && path.extension().is_some_and(|ext| ext == "json")
                    {
                        cases.push(path.to_path_buf());
                    }
                }
                Err(e) => warn!("Error accessing case entry: {}", e),
            }
        }
        cases.sort();
        Ok(cases)
    }

    /// Record which template fields the case lacks (in memory until saved)
    pub fn validate(&self, case: &mut Case, template: &Template) -> ValidationResult {
        let result = case.validate(template).clone();
        debug!(
            case_id = %case.case_id(),
            valid = result.valid,
            missing = result.missing_fields.len(),
            "Case validated"
        );
        result
    }

    /// Fill a case's document with the case's values
    ///
    /// The document comes from `document_reference`, else from the template
    /// at `template_reference`. When a template is referenced only its fields
    /// are written; other case keys are logged and skipped.
    pub async fn fill_from_case(
        &self,
        case_path: &Path,
        output_dir: Option<&Path>,
        flatten: bool,
        engine: &FillEngine,
    ) -> Result<FillOutcome, CaseError> {
        let mut reporter = OperationReporter::new(&self.event_bus, EventFamily::Case);
        let mut detail = CaseDetail {
            action: CaseAction::Fill,
            path: Some(case_path.to_path_buf()),
            ..Default::default()
        };
        reporter.started(detail.clone());

        let result = self
            .fill_inner(case_path, output_dir, flatten, engine, &mut detail)
            .await;
        match result {
            Ok(outcome) => {
                reporter.completed(detail, Some(100));
                Ok(outcome)
            }
            Err(e) => {
                reporter.failed(detail, &e);
                Err(e)
            }
        }
    }

    async fn fill_inner(
        &self,
        case_path: &Path,
        output_dir: Option<&Path>,
        flatten: bool,
        engine: &FillEngine,
        detail: &mut CaseDetail,
    ) -> Result<FillOutcome, CaseError> {
        let case = self.load(case_path).await?;
        detail.case_id = Some(case.case_id().to_string());
        detail.form_code = Some(case.form_code().to_string());

        let template = match &case.form_reference.template_reference {
            Some(template_path) => Some(Template::load(template_path).await?),
            None => None,
        };

        let request = match (&case.form_reference.document_reference, template) {
            (document, Some(template)) => {
                let (mut filled, unknown) = template.with_values(&case.fields);
                if !unknown.is_empty() {
                    warn!(
                        case_id = %case.case_id(),
                        "Ignoring case values for fields not in the template: {}",
                        unknown.join(", ")
                    );
                }
                if let Some(document) = document {
                    filled.document_reference = document.clone();
                }
                FillRequest::from(&filled)
            }
            (Some(document), None) => FillRequest::new(document.clone(), case.fields.clone()),
            (None, None) => {
                return Err(CaseError::CannotResolveDocument(case.case_id().to_string()))
            }
        };

        let target = OutputTarget::from_options(None, output_dir.map(Path::to_path_buf));
        Ok(engine.fill(&request, &target, flatten).await?)
    }
}

async fn write_case(case: &mut Case, path: &Path) -> Result<(), CaseError> {
    let io_err = |source| CaseError::Io {
        path: path.to_path_buf(),
        source,
    };

    case.case_metadata.updated_at = Utc::now().max(case.case_metadata.created_at);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut json = serde_json::to_string_pretty(case).map_err(|source| CaseError::MalformedCase {
        path: path.to_path_buf(),
        source,
    })?;
    json.push('\n');
    tokio::fs::write(path, json).await.map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::codec::mock::MockCodec;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_stamps_are_strictly_increasing() {
        let stamps: Vec<DateTime<Utc>> = (0..1000).map(|_| next_stamp()).collect();
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_case_id_format() {
        let stamp = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap()
            + chrono::Duration::microseconds(42);
        assert_eq!(case_id("acme", "F3520", stamp), "acme_F3520_20240305T070809.000042");
    }

    #[tokio::test]
    async fn test_rapid_creation_yields_unique_ids() {
        let dir = TempDir::new().unwrap();
        let store = CaseStore::new(dir.path(), EventBus::new(16));

        let mut ids = HashSet::new();
        for _ in 0..50 {
            let (case, path) = store.create("F3520", "Batch", "acme").await.unwrap();
            assert!(path.exists());
            assert!(ids.insert(case.case_id().to_string()));
        }
        assert_eq!(store.list(Some("acme")).unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_create_layout_and_load() {
        let dir = TempDir::new().unwrap();
        let store = CaseStore::new(dir.path(), EventBus::new(16));

        let (case, path) = store.create("F3520", "First", "acme").await.unwrap();
        assert_eq!(
            path,
            dir.path()
                .join("acme")
                .join("F3520")
                .join(format!("{}.json", case.case_id()))
        );
        assert!(case.case_id().starts_with("acme_F3520_"));

        let loaded = store.load(&path).await.unwrap();
        assert_eq!(loaded.case_metadata.case_name, "First");
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let dir = TempDir::new().unwrap();
        let store = CaseStore::new(dir.path(), EventBus::new(16));

        assert!(matches!(
            store.create("F1", "x", "../escape").await,
            Err(CaseError::InvalidName(_))
        ));
        assert!(matches!(
            store.create("", "x", "acme").await,
            Err(CaseError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        let store = CaseStore::new(dir.path(), EventBus::new(16));

        assert!(matches!(
            store.load(&dir.path().join("absent.json")).await,
            Err(CaseError::NotFound(_))
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{not json").unwrap();
        assert!(matches!(
            store.load(&broken).await,
            Err(CaseError::MalformedCase { .. })
        ));
    }

    #[tokio::test]
    async fn test_validation_is_advisory() {
        let dir = TempDir::new().unwrap();
        let store = CaseStore::new(dir.path(), EventBus::new(16));
        let (mut case, path) = store.create("F3520", "First", "acme").await.unwrap();
        case.set_field("Name", "Alice");

        let template = Template::new("f.pdf", vec!["Name".to_string(), "Date".to_string()]);
        let result = store.validate(&mut case, &template);

        assert!(!result.valid);
        assert_eq!(result.missing_fields, vec!["Date".to_string()]);
        assert_eq!(case.fields.len(), 1);

        // Not persisted until saved
        assert!(store.load(&path).await.unwrap().validation.is_none());
        store.save(&mut case, &path).await.unwrap();
        let saved = store.load(&path).await.unwrap();
        assert_eq!(saved.validation.unwrap().missing_fields, vec!["Date".to_string()]);
        assert!(saved.case_metadata.updated_at >= saved.case_metadata.created_at);
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = CaseStore::new(dir.path().join("nothing"), EventBus::new(16));
        assert!(store.list(None).unwrap().is_empty());
        assert!(store.list(Some("acme")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fill_from_case_via_template_reference() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("form.pdf");
        std::fs::write(&doc, b"%PDF").unwrap();
        let template_path = dir.path().join("form_template.json");
        Template::new(doc.display().to_string(), vec!["Name".to_string()])
            .save(&template_path)
            .await
            .unwrap();

        let bus = EventBus::new(32);
        let store = CaseStore::new(dir.path().join("cases"), bus.clone());
        let engine = FillEngine::new(
            vec![Arc::new(MockCodec::new("primary", &["Name"]))],
            reqwest::Client::new(),
            bus,
        );

        let (mut case, path) = store.create("F1", "First", "acme").await.unwrap();
        case.form_reference.template_reference = Some(template_path);
        case.set_field("Name", "Alice");
        store.save(&mut case, &path).await.unwrap();

        let out_dir = dir.path().join("out");
        let outcome = store
            .fill_from_case(&path, Some(&out_dir), false, &engine)
            .await
            .unwrap();
        assert_eq!(outcome.output_path, out_dir.join("form_filled.pdf"));
    }

    #[tokio::test]
    async fn test_fill_from_case_writes_only_template_fields() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("form.pdf");
        std::fs::write(&doc, b"%PDF").unwrap();
        let template_path = dir.path().join("form_template.json");
        Template::new(
            doc.display().to_string(),
            vec!["Name".to_string(), "Date".to_string()],
        )
        .save(&template_path)
        .await
        .unwrap();

        let bus = EventBus::new(32);
        let store = CaseStore::new(dir.path().join("cases"), bus.clone());
        let engine = FillEngine::new(
            vec![Arc::new(MockCodec::new("primary", &["Name", "Date"]))],
            reqwest::Client::new(),
            bus,
        );

        let (mut case, path) = store.create("F1", "Extra", "acme").await.unwrap();
        case.form_reference.template_reference = Some(template_path);
        case.set_field("Name", "Alice");
        case.set_field("Bogus", "x");
        store.save(&mut case, &path).await.unwrap();

        let outcome = store
            .fill_from_case(&path, Some(&dir.path().join("out")), false, &engine)
            .await
            .unwrap();
        let written = std::fs::read_to_string(&outcome.output_path).unwrap();
        assert_eq!(written, r#"primary:{"Name":"Alice","Date":""}"#);
        assert!(!written.contains("Bogus"));
    }

    #[tokio::test]
    async fn test_fill_from_case_without_references() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::new(32);
        let mut sub = bus.subscribe("case.error");
        let store = CaseStore::new(dir.path(), bus.clone());
        let engine = FillEngine::new(Vec::new(), reqwest::Client::new(), bus);

        let (_, path) = store.create("F1", "First", "acme").await.unwrap();
        let err = store
            .fill_from_case(&path, None, false, &engine)
            .await
            .unwrap_err();

        assert!(matches!(err, CaseError::CannotResolveDocument(_)));
        let event = sub.try_recv().unwrap();
        assert_eq!(event.data.stage.as_deref(), Some("resolve_document"));
    }
}
