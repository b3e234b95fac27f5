//! Workflow orchestrator
//!
//! Chains the per-form steps into one run:
//!
//! LOOKUP → DOWNLOAD → TEMPLATE → FILL
//!
//! Lookup fails fast before anything touches the network. Every later
//! failure is wrapped with the step it happened in, keeping the step's own
//! error as the source. Batch and refresh runs live in `bulk` and `update`.

use crate::models::{FieldMap, Template};
use crate::services::catalog::{Catalog, CatalogError};
use crate::services::codec::codecs_from_config;
use crate::services::downloader::{build_http_client, DownloadError, Downloader};
use crate::services::field_extractor::{default_template_path, ExtractError, FieldExtractor};
use crate::services::fill_engine::{FillEngine, FillError, FillOutcome, FillRequest, OutputTarget};
use formflow_common::config::AppConfig;
use formflow_common::events::{
    EventBus, EventFamily, OperationReporter, WorkflowDetail, WorkflowKind,
};
use formflow_common::StagedError;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

mod bulk;
mod update;

pub use bulk::BulkWorkflowResult;
pub use update::UpdateOutcome;

/// Workflow step, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStep {
    Lookup,
    Download,
    Template,
    Fill,
}

impl WorkflowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::Lookup => "lookup",
            WorkflowStep::Download => "download",
            WorkflowStep::Template => "template",
            WorkflowStep::Fill => "fill",
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying error of a failed step
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Lookup(#[from] CatalogError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Fill(#[from] FillError),
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{step} step failed: {source}")]
    Step {
        step: WorkflowStep,
        #[source]
        source: StepError,
    },
}

impl WorkflowError {
    fn at(step: WorkflowStep, source: impl Into<StepError>) -> Self {
        WorkflowError::Step {
            step,
            source: source.into(),
        }
    }

    pub fn step(&self) -> WorkflowStep {
        match self {
            WorkflowError::Step { step, .. } => *step,
        }
    }

    pub fn source_error(&self) -> &StepError {
        match self {
            WorkflowError::Step { source, .. } => source,
        }
    }
}

impl StagedError for WorkflowError {
    fn stage(&self) -> &'static str {
        self.step().as_str()
    }
}

/// Everything a successful single-form run produced
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub form_code: String,
    pub document_path: PathBuf,
    pub template_path: PathBuf,
    pub output_path: PathBuf,
    pub strategy: String,
    pub flattened: bool,
    /// Supplied keys the document has no field for (not written)
    pub unknown_fields: Vec<String>,
}

pub struct WorkflowOrchestrator {
    downloader: Downloader,
    extractor: FieldExtractor,
    engine: FillEngine,
    event_bus: EventBus,
}

impl WorkflowOrchestrator {
    pub fn new(
        downloader: Downloader,
        extractor: FieldExtractor,
        engine: FillEngine,
        event_bus: EventBus,
    ) -> Self {
        Self {
            downloader,
            extractor,
            engine,
            event_bus,
        }
    }

    /// Wire every component from configuration, sharing one HTTP client
    pub fn from_config(config: &AppConfig, event_bus: EventBus) -> Result<Self, DownloadError> {
        let http_client =
            build_http_client(config).map_err(|e| DownloadError::Client(e.to_string()))?;
        let codecs = codecs_from_config(&config.codecs);
        if codecs.is_empty() {
            warn!("No codecs configured; field listing and filling will fail");
        }

        Ok(Self::new(
            Downloader::with_client(http_client.clone(), event_bus.clone()),
            FieldExtractor::new(codecs.clone(), event_bus.clone()),
            FillEngine::new(codecs, http_client, event_bus.clone()),
            event_bus,
        ))
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    pub fn extractor(&self) -> &FieldExtractor {
        &self.extractor
    }

    pub fn engine(&self) -> &FillEngine {
        &self.engine
    }

    /// Download, template and fill one form
    pub async fn run_workflow(
        &self,
        catalog: &Catalog,
        form_code: &str,
        field_data: &FieldMap,
        output_dir: &Path,
        flatten: bool,
    ) -> Result<WorkflowResult, WorkflowError> {
        let mut reporter = OperationReporter::new(&self.event_bus, EventFamily::Workflow);
        let mut detail = WorkflowDetail {
            kind: WorkflowKind::Single,
            form_code: Some(form_code.to_string()),
            ..Default::default()
        };
        reporter.started(detail.clone());

        let result = self
            .execute(catalog, form_code, field_data, output_dir, flatten, Some((&reporter, &mut detail)))
            .await;
        match result {
            Ok(result) => {
                info!(
                    form_code = %result.form_code,
                    output = %result.output_path.display(),
                    "Workflow completed"
                );
                detail.step = None;
                reporter.completed(detail, Some(100));
                Ok(result)
            }
            Err(e) => {
                detail.step = Some(e.step().to_string());
                reporter.failed(detail, &e);
                Err(e)
            }
        }
    }

    /// The step chain, optionally reporting each step as progress
    async fn execute(
        &self,
        catalog: &Catalog,
        form_code: &str,
        field_data: &FieldMap,
        output_dir: &Path,
        flatten: bool,
        mut progress: Option<(&OperationReporter, &mut WorkflowDetail)>,
    ) -> Result<WorkflowResult, WorkflowError> {
        let mut checkpoint = |step: WorkflowStep, percent: u8| {
            if let Some((reporter, detail)) = progress.as_mut() {
                detail.step = Some(step.to_string());
                reporter.progress(detail.clone(), Some(percent), format!("Starting {}", step));
            }
        };

        checkpoint(WorkflowStep::Lookup, 0);
        let entry = catalog
            .require(form_code)
            .map_err(|e| WorkflowError::at(WorkflowStep::Lookup, e))?;

        checkpoint(WorkflowStep::Download, 10);
        let download = self
            .downloader
            .download(catalog, &entry.form_code, output_dir)
            .await
            .map_err(|e| WorkflowError::at(WorkflowStep::Download, e))?;

        checkpoint(WorkflowStep::Template, 40);
        let template_path = default_template_path(&download.path);
        let template = self
            .extractor
            .export_template(&download.path, &template_path)
            .await
            .map_err(|e| WorkflowError::at(WorkflowStep::Template, e))?;

        checkpoint(WorkflowStep::Fill, 60);
        let (filled, unknown_fields) = template.with_values(field_data);
        if !unknown_fields.is_empty() {
            warn!(
                form_code = %entry.form_code,
                "Ignoring values for unknown fields: {}",
                unknown_fields.join(", ")
            );
        }
        let outcome = self
            .fill_template(&filled, output_dir, flatten)
            .await
            .map_err(|e| WorkflowError::at(WorkflowStep::Fill, e))?;

        Ok(WorkflowResult {
            form_code: entry.form_code.clone(),
            document_path: download.path,
            template_path,
            output_path: outcome.output_path,
            strategy: outcome.strategy,
            flattened: outcome.flattened,
            unknown_fields,
        })
    }

    async fn fill_template(
        &self,
        template: &Template,
        output_dir: &Path,
        flatten: bool,
    ) -> Result<FillOutcome, FillError> {
        let request = FillRequest::from(template);
        self.engine
            .fill(&request, &OutputTarget::Directory(output_dir.to_path_buf()), flatten)
            .await
    }
}
