//! Batch runs over several form codes
//!
//! Codes run one after another. A failing code is recorded and the batch
//! moves on. A code listed more than once runs once.

use super::{WorkflowOrchestrator, WorkflowResult};
use crate::models::FieldMap;
use crate::services::catalog::Catalog;
use formflow_common::events::{EventFamily, OperationReporter, WorkflowDetail, WorkflowKind};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkWorkflowResult {
    pub results: BTreeMap<String, WorkflowResult>,
    /// Error message per failed code
    pub errors: BTreeMap<String, String>,
    pub succeeded: usize,
    pub failed: usize,
}

impl WorkflowOrchestrator {
    /// Run the single-form workflow for each code
    ///
    /// Codes without an entry in `field_data_by_code` are filled with no
    /// values. The returned result always covers every code.
    pub async fn run_bulk_workflow(
        &self,
        catalog: &Catalog,
        codes: &[String],
        field_data_by_code: &HashMap<String, FieldMap>,
        output_dir: &Path,
        flatten: bool,
    ) -> BulkWorkflowResult {
        let mut reporter = OperationReporter::new(&self.event_bus, EventFamily::Workflow);
        let mut detail = WorkflowDetail {
            kind: WorkflowKind::Bulk,
            succeeded: Some(0),
            failed: Some(0),
            ..Default::default()
        };
        reporter.started(detail.clone());

        let mut seen = HashSet::new();
        let codes: Vec<&String> = codes.iter().filter(|code| seen.insert(*code)).collect();

        let empty = FieldMap::new();
        let mut batch = BulkWorkflowResult::default();

        for (index, code) in codes.iter().copied().enumerate() {
            let field_data = field_data_by_code.get(code).unwrap_or(&empty);
            match self
                .execute(catalog, code, field_data, output_dir, flatten, None)
                .await
            {
                Ok(result) => {
                    batch.succeeded += 1;
                    batch.results.insert(code.clone(), result);
                }
                Err(e) => {
                    warn!(form_code = %code, "Bulk item failed: {}", e);
                    batch.failed += 1;
                    batch.errors.insert(code.clone(), e.to_string());
                }
            }

            detail.form_code = Some(code.clone());
            detail.succeeded = Some(batch.succeeded);
            detail.failed = Some(batch.failed);
            let percent = ((index + 1) * 100 / codes.len()) as u8;
            reporter.progress(
                detail.clone(),
                Some(percent),
                format!("Processed {} of {}", index + 1, codes.len()),
            );
        }

        info!(
            succeeded = batch.succeeded,
            failed = batch.failed,
            "Bulk workflow finished"
        );
        detail.form_code = None;
        reporter.completed(detail, Some(100));
        batch
    }
}
