//! Fill strategies
//!
//! Document codecs are opaque collaborators. Every codec implements the same
//! capability trait; the extractor and fill engine hold an ordered list of
//! them (first = primary) and walk it until one succeeds.

mod external;
#[cfg(test)]
pub(crate) mod mock;

pub use external::{render_xfdf, ExternalToolCodec};

use crate::models::FieldMap;
use async_trait::async_trait;
use formflow_common::config::CodecConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    /// The tool rejected the document or could not run to completion
    #[error("{codec}: {reason}")]
    Failed { codec: String, reason: String },

    #[error("{codec}: I/O error at {path}: {source}")]
    Io {
        codec: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{codec}: flattening not supported")]
    FlattenUnsupported { codec: String },
}

/// Capability contract of a fill strategy
#[async_trait]
pub trait FormCodec: Send + Sync {
    /// Strategy identifier used in logs and events
    fn name(&self) -> &str;

    /// Fillable field names, exactly as stored in the document
    async fn list_fields(&self, document: &Path) -> Result<Vec<String>, CodecError>;

    /// Write a copy of `document` with `fields` applied to `output`
    async fn fill(
        &self,
        document: &Path,
        fields: &FieldMap,
        output: &Path,
    ) -> Result<(), CodecError>;

    /// Write a copy of `document` with every field locked to `output`
    async fn flatten(&self, document: &Path, output: &Path) -> Result<(), CodecError>;
}

pub type SharedCodec = Arc<dyn FormCodec>;

/// Instantiate the configured strategies, preserving their order
pub fn codecs_from_config(configs: &[CodecConfig]) -> Vec<SharedCodec> {
    configs
        .iter()
        .cloned()
        .map(|config| Arc::new(ExternalToolCodec::new(config)) as SharedCodec)
        .collect()
}
