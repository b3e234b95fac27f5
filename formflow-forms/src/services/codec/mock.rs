//! In-process codec for unit tests

use super::{CodecError, FormCodec};
use crate::models::FieldMap;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) struct MockCodec {
    name: String,
    fields: Vec<String>,
    pub fail_list: bool,
    pub fail_fill: bool,
    pub fail_flatten: bool,
    pub fill_calls: AtomicUsize,
    pub flatten_calls: AtomicUsize,
}

impl MockCodec {
    pub fn new(name: &str, fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            fail_list: false,
            fail_fill: false,
            fail_flatten: false,
            fill_calls: AtomicUsize::new(0),
            flatten_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail_list: true,
            fail_fill: true,
            fail_flatten: true,
            ..Self::new(name, &[])
        }
    }

    pub fn fills(&self) -> usize {
        self.fill_calls.load(Ordering::SeqCst)
    }

    fn failure(&self, what: &str) -> CodecError {
        CodecError::Failed {
            codec: self.name.clone(),
            reason: format!("{} rejected", what),
        }
    }
}

#[async_trait]
impl FormCodec for MockCodec {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_fields(&self, document: &Path) -> Result<Vec<String>, CodecError> {
        if self.fail_list || !document.exists() {
            return Err(self.failure("listing"));
        }
        Ok(self.fields.clone())
    }

    async fn fill(
        &self,
        _document: &Path,
        fields: &FieldMap,
        output: &Path,
    ) -> Result<(), CodecError> {
        self.fill_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fill {
            return Err(self.failure("fill"));
        }
        let body = serde_json::to_string(fields).map_err(|e| self.failure(&e.to_string()))?;
        tokio::fs::write(output, format!("{}:{}", self.name, body))
            .await
            .map_err(|source| CodecError::Io {
                codec: self.name.clone(),
                path: output.to_path_buf(),
                source,
            })
    }

    async fn flatten(&self, document: &Path, output: &Path) -> Result<(), CodecError> {
        self.flatten_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_flatten {
            return Err(self.failure("flatten"));
        }
        let content = tokio::fs::read_to_string(document)
            .await
            .map_err(|source| CodecError::Io {
                codec: self.name.clone(),
                path: document.to_path_buf(),
                source,
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
