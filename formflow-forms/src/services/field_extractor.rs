//! Field discovery and template export
//!
//! Field names are passed through from the codec untouched, so the key set
//! of an exported template always equals `list_fields` for the same document.

use crate::models::provenance;
use crate::models::{Provenance, Template, TemplateError};
use crate::services::codec::SharedCodec;
use formflow_common::events::{
    EventBus, EventFamily, InspectDetail, OperationReporter, TemplateDetail,
};
use formflow_common::StagedError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Cannot list fields of {document}: {reason}")]
    ListFieldsFailed { document: PathBuf, reason: String },

    #[error("Cannot write template {path}: {source}")]
    ExportFailed {
        path: PathBuf,
        #[source]
        source: TemplateError,
    },
}

impl StagedError for ExtractError {
    fn stage(&self) -> &'static str {
        match self {
            ExtractError::ListFieldsFailed { .. } => "list_fields",
            ExtractError::ExportFailed { .. } => "write_template",
        }
    }
}

/// What `inspect` found in a document
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub document: PathBuf,
    pub fields: Vec<String>,
    pub provenance: Option<Provenance>,
}

/// Conventional template location next to a document: `<stem>_template.json`
pub fn default_template_path(document: &Path) -> PathBuf {
    let stem = document
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    document.with_file_name(format!("{}_template.json", stem))
}

pub struct FieldExtractor {
    codecs: Vec<SharedCodec>,
    event_bus: EventBus,
}

impl FieldExtractor {
    pub fn new(codecs: Vec<SharedCodec>, event_bus: EventBus) -> Self {
        Self { codecs, event_bus }
    }

    /// Field names from the first codec that can read `document`
    pub async fn list_fields(&self, document: &Path) -> Result<Vec<String>, ExtractError> {
        let failed = |reason: String| ExtractError::ListFieldsFailed {
            document: document.to_path_buf(),
            reason,
        };

        if !document.is_file() {
            return Err(failed("document does not exist".to_string()));
        }
        if self.codecs.is_empty() {
            return Err(failed("no codecs configured".to_string()));
        }

        let mut last_reason = String::new();
        for codec in &self.codecs {
            match codec.list_fields(document).await {
                Ok(fields) => {
                    debug!(
                        codec = codec.name(),
                        count = fields.len(),
                        document = %document.display(),
                        "Fields listed"
                    );
                    return Ok(fields);
                }
                Err(e) => {
                    warn!(codec = codec.name(), "Field listing failed: {}", e);
                    last_reason = e.to_string();
                }
            }
        }

        Err(failed(last_reason))
    }

    /// Write a template with empty values for every field of `document`
    pub async fn export_template(
        &self,
        document: &Path,
        destination: &Path,
    ) -> Result<Template, ExtractError> {
        let mut reporter = OperationReporter::new(&self.event_bus, EventFamily::Template);
        let mut detail = TemplateDetail {
            document: document.display().to_string(),
            template_path: Some(destination.to_path_buf()),
            field_count: None,
        };
        reporter.started(detail.clone());

        let result = self.export_inner(document, destination, &reporter, &mut detail).await;
        match result {
            Ok(template) => {
                info!(
                    document = %document.display(),
                    template = %destination.display(),
                    fields = template.fields.len(),
                    "Template exported"
                );
                reporter.completed(detail, Some(100));
                Ok(template)
            }
            Err(e) => {
                reporter.failed(detail, &e);
                Err(e)
            }
        }
    }

    async fn export_inner(
        &self,
        document: &Path,
        destination: &Path,
        reporter: &OperationReporter,
        detail: &mut TemplateDetail,
    ) -> Result<Template, ExtractError> {
        let fields = self.list_fields(document).await?;
        detail.field_count = Some(fields.len());
        reporter.progress(detail.clone(), Some(50), "Fields listed");

        let mut template = Template::new(document.display().to_string(), fields);
        template.provenance = match Provenance::load(document).await {
            Ok(provenance) => provenance,
            Err(e) => {
                warn!("Exporting template without provenance: {}", e);
                None
            }
        };

        template
            .save(destination)
            .await
            .map_err(|source| ExtractError::ExportFailed {
                path: destination.to_path_buf(),
                source,
            })?;

        Ok(template)
    }

    /// List fields and provenance; records `inspected_at` when a sidecar exists
    ///
    /// Sidecar problems are logged and never fail the inspection.
    pub async fn inspect(&self, document: &Path) -> Result<InspectReport, ExtractError> {
        let mut reporter = OperationReporter::new(&self.event_bus, EventFamily::Inspect);
        let mut detail = InspectDetail {
            document: document.display().to_string(),
            field_count: None,
        };
        reporter.started(detail.clone());

        let result = self.inspect_inner(document).await;
        match result {
            Ok(report) => {
                detail.field_count = Some(report.fields.len());
                reporter.completed(detail, Some(100));
                Ok(report)
            }
            Err(e) => {
                reporter.failed(detail, &e);
                Err(e)
            }
        }
    }

    async fn inspect_inner(&self, document: &Path) -> Result<InspectReport, ExtractError> {
        let fields = self.list_fields(document).await?;

        let provenance = provenance::advisory_touch_inspected(document).await;

        Ok(InspectReport {
            document: document.to_path_buf(),
            fields,
            provenance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::codec::mock::MockCodec;
    use formflow_common::events::EventPhase;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn document(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("f3520.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        path
    }

    #[tokio::test]
    async fn test_list_fields_falls_through_to_working_codec() {
        let dir = TempDir::new().unwrap();
        let doc = document(&dir);
        let extractor = FieldExtractor::new(
            vec![
                Arc::new(MockCodec::failing("primary")),
                Arc::new(MockCodec::new("secondary", &["Name", "Date"])),
            ],
            EventBus::new(16),
        );

        let fields = extractor.list_fields(&doc).await.unwrap();
        assert_eq!(fields, vec!["Name".to_string(), "Date".to_string()]);
    }

    #[tokio::test]
    async fn test_list_fields_without_codecs_fails() {
        let dir = TempDir::new().unwrap();
        let doc = document(&dir);
        let extractor = FieldExtractor::new(Vec::new(), EventBus::new(16));

        let result = extractor.list_fields(&doc).await;
        assert!(matches!(result, Err(ExtractError::ListFieldsFailed { .. })));
    }

    #[tokio::test]
    async fn test_export_template_round_trip() {
        let dir = TempDir::new().unwrap();
        let doc = document(&dir);
        let names = ["Name", " spaced ", "Ünïcode"];
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("template.*");
        let extractor =
            FieldExtractor::new(vec![Arc::new(MockCodec::new("primary", &names))], bus);

        let destination = default_template_path(&doc);
        let template = extractor.export_template(&doc, &destination).await.unwrap();
        let listed = extractor.list_fields(&doc).await.unwrap();

        let keys: Vec<String> = template.fields.keys().cloned().collect();
        assert_eq!(keys, listed);
        assert!(template.fields.values().all(String::is_empty));

        let reloaded = Template::load(&destination).await.unwrap();
        assert_eq!(reloaded, template);

        let phases: Vec<EventPhase> = sub.drain().iter().map(|e| e.phase()).collect();
        assert_eq!(
            phases,
            vec![EventPhase::Started, EventPhase::Progress, EventPhase::Completed]
        );
    }

    #[tokio::test]
    async fn test_export_attaches_existing_provenance() {
        let dir = TempDir::new().unwrap();
        let doc = document(&dir);
        Provenance::new("F3520", "QLD", None).save(&doc).await.unwrap();
        let extractor = FieldExtractor::new(
            vec![Arc::new(MockCodec::new("primary", &["Name"]))],
            EventBus::new(16),
        );

        let template = extractor
            .export_template(&doc, &dir.path().join("t.json"))
            .await
            .unwrap();
        assert_eq!(template.provenance.unwrap().origin_form_code, "F3520");
    }

    #[tokio::test]
    async fn test_inspect_records_inspection_time() {
        let dir = TempDir::new().unwrap();
        let doc = document(&dir);
        Provenance::new("F3520", "QLD", None).save(&doc).await.unwrap();
        let extractor = FieldExtractor::new(
            vec![Arc::new(MockCodec::new("primary", &["Name"]))],
            EventBus::new(16),
        );

        let report = extractor.inspect(&doc).await.unwrap();
        assert_eq!(report.fields, vec!["Name".to_string()]);
        assert!(report.provenance.unwrap().inspected_at.is_some());

        let stored = Provenance::load(&doc).await.unwrap().unwrap();
        assert!(stored.inspected_at.is_some());
    }

    #[tokio::test]
    async fn test_inspect_survives_malformed_sidecar() {
        let dir = TempDir::new().unwrap();
        let doc = document(&dir);
        std::fs::write(Provenance::sidecar_path(&doc), "{not json").unwrap();
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("inspect.*");
        let extractor = FieldExtractor::new(
            vec![Arc::new(MockCodec::new("primary", &["Name", "Date"]))],
            bus,
        );

        let report = extractor.inspect(&doc).await.unwrap();
        assert_eq!(report.fields, vec!["Name".to_string(), "Date".to_string()]);
        assert!(report.provenance.is_none());

        let phases: Vec<EventPhase> = sub.drain().iter().map(|e| e.phase()).collect();
        assert_eq!(phases, vec![EventPhase::Started, EventPhase::Completed]);
        // Left as found
        let sidecar = std::fs::read_to_string(Provenance::sidecar_path(&doc)).unwrap();
        assert_eq!(sidecar, "{not json");
    }

    #[tokio::test]
    async fn test_inspect_missing_document_publishes_error() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("inspect.error");
        let extractor = FieldExtractor::new(
            vec![Arc::new(MockCodec::new("primary", &["Name"]))],
            bus,
        );

        let result = extractor.inspect(&dir.path().join("absent.pdf")).await;
        let err = result.unwrap_err();

        let event = sub.try_recv().unwrap();
        assert_eq!(event.data.stage.as_deref(), Some("list_fields"));
        assert_eq!(event.error, Some(err.to_string()));
    }
}
