//! Refresh of a previously downloaded form

use super::{WorkflowError, WorkflowOrchestrator, WorkflowStep};
use crate::services::catalog::{Catalog, CatalogEntry};
use formflow_common::events::{EventFamily, OperationReporter, WorkflowDetail, WorkflowKind};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub entry: CatalogEntry,
    pub path: PathBuf,
    /// False when an existing copy was kept
    pub downloaded: bool,
    pub provenance_path: Option<PathBuf>,
}

impl WorkflowOrchestrator {
    /// Download `code` into `dir` unless a copy already exists there
    ///
    /// `force` re-downloads regardless.
    pub async fn run_update_workflow(
        &self,
        catalog: &Catalog,
        code: &str,
        dir: &Path,
        force: bool,
    ) -> Result<UpdateOutcome, WorkflowError> {
        let mut reporter = OperationReporter::new(&self.event_bus, EventFamily::Workflow);
        let mut detail = WorkflowDetail {
            kind: WorkflowKind::Update,
            form_code: Some(code.to_string()),
            ..Default::default()
        };
        reporter.started(detail.clone());

        let result = self.update_inner(catalog, code, dir, force).await;
        match result {
            Ok(outcome) => {
                info!(
                    form_code = %outcome.entry.form_code,
                    downloaded = outcome.downloaded,
                    "Update finished"
                );
                reporter.completed(detail, Some(100));
                Ok(outcome)
            }
            Err(e) => {
                detail.step = Some(e.step().to_string());
                reporter.failed(detail, &e);
                Err(e)
            }
        }
    }

    async fn update_inner(
        &self,
        catalog: &Catalog,
        code: &str,
        dir: &Path,
        force: bool,
    ) -> Result<UpdateOutcome, WorkflowError> {
        let entry = catalog
            .require(code)
            .map_err(|e| WorkflowError::at(WorkflowStep::Lookup, e))?
            .clone();

        let existing = dir.join(entry.file_name());
        if existing.is_file() && !force {
            debug!(path = %existing.display(), "Existing copy kept");
            let sidecar = crate::models::Provenance::sidecar_path(&existing);
            return Ok(UpdateOutcome {
                entry,
                provenance_path: sidecar.is_file().then_some(sidecar),
                path: existing,
                downloaded: false,
            });
        }

        let outcome = self
            .downloader
            .download(catalog, &entry.form_code, dir)
            .await
            .map_err(|e| WorkflowError::at(WorkflowStep::Download, e))?;

        Ok(UpdateOutcome {
            entry: outcome.entry,
            path: outcome.path,
            downloaded: true,
            provenance_path: outcome.provenance_path,
        })
    }
}
