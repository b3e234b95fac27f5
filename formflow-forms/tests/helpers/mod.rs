//! Shared fixtures for formflow-forms integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use formflow_common::events::EventBus;
use formflow_forms::models::FieldMap;
use formflow_forms::services::{
    Catalog, CodecError, Downloader, FieldExtractor, FillEngine, FormCodec, SharedCodec,
    WorkflowOrchestrator,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const CATALOG_HEADER: &str = "region,form_name,form_code,description,format,direct_source_url,info_url,online_available,notes\n";

/// Catalog whose sources point at `base_url`
pub fn catalog_for(base_url: &str) -> Catalog {
    let rows = format!(
        "{header}\
         QLD,Transfer App,F3520,Land title transfer,PDF,{base}/f3520.pdf,{base}/info,false,notes\n\
         NSW,Lease,F9,Residential lease,PDF,{base}/forms/f9.pdf,,yes,\n\
         VIC,Offline Form,F77,Paper only,PDF,,,no,\n\
         QLD,Broken Link,F404,Missing upstream,PDF,{base}/missing.pdf,,yes,\n",
        header = CATALOG_HEADER,
        base = base_url
    );
    Catalog::from_reader(rows.as_bytes()).expect("fixture catalog parses")
}

/// Codec that treats any file as a form with fixed fields
///
/// Fill writes `<name>:<json fields>`; flatten prefixes `FLAT `.
pub struct FakeCodec {
    name: String,
    fields: Vec<String>,
    fail_fill: bool,
    fills: AtomicUsize,
}

impl FakeCodec {
    pub fn working(name: &str, fields: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            fail_fill: false,
            fills: AtomicUsize::new(0),
        })
    }

    pub fn broken(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fields: Vec::new(),
            fail_fill: true,
            fills: AtomicUsize::new(0),
        })
    }

    pub fn fill_count(&self) -> usize {
        self.fills.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FormCodec for FakeCodec {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_fields(&self, document: &Path) -> Result<Vec<String>, CodecError> {
        if self.fail_fill || !document.is_file() {
            return Err(CodecError::Failed {
                codec: self.name.clone(),
                reason: "unreadable document".to_string(),
            });
        }
        Ok(self.fields.clone())
    }

    async fn fill(
        &self,
        _document: &Path,
        fields: &FieldMap,
        output: &Path,
    ) -> Result<(), CodecError> {
        self.fills.fetch_add(1, Ordering::SeqCst);
        if self.fail_fill {
            return Err(CodecError::Failed {
                codec: self.name.clone(),
                reason: "document is signed".to_string(),
            });
        }
        let body = serde_json::to_string(fields).unwrap_or_default();
        tokio::fs::write(output, format!("{}:{}", self.name, body))
            .await
            .map_err(|source| CodecError::Io {
                codec: self.name.clone(),
                path: output.to_path_buf(),
                source,
            })
    }

    async fn flatten(&self, document: &Path, output: &Path) -> Result<(), CodecError> {
        let content = tokio::fs::read_to_string(document).await.map_err(|source| {
            CodecError::Io {
                codec: self.name.clone(),
                path: document.to_path_buf(),
                source,
            }
        })?;
        tokio::fs::write(output, format!("FLAT {}", content))
            .await
            .map_err(|source| CodecError::Io {
                codec: self.name.clone(),
                path: output.to_path_buf(),
                source,
            })
    }
}

pub fn orchestrator(codecs: Vec<SharedCodec>, bus: &EventBus) -> WorkflowOrchestrator {
    let client = reqwest::Client::new();
    WorkflowOrchestrator::new(
        Downloader::with_client(client.clone(), bus.clone()),
        FieldExtractor::new(codecs.clone(), bus.clone()),
        FillEngine::new(codecs, client, bus.clone()),
        bus.clone(),
    )
}
