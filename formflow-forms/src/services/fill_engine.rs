//! Document filling with strategy fallback
//!
//! The engine holds an ordered strategy list. The first entry is the primary;
//! later entries are only tried after every earlier one has failed for the
//! current document. Flattening is a separate pass performed by whichever
//! strategy produced the filled document.

use crate::models::{FieldMap, Template};
use crate::services::codec::{CodecError, SharedCodec};
use crate::services::downloader::{fetch_to_file, DownloadError};
use formflow_common::events::{EventBus, EventFamily, FillDetail, OperationReporter};
use formflow_common::StagedError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum FillError {
    #[error("Document not found: {0}")]
    DocumentNotFound(PathBuf),

    #[error("Invalid document reference: {0}")]
    InvalidReference(String),

    #[error("Fetch of {url} failed: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("No fill strategies configured")]
    NoStrategies,

    #[error("Primary fill failed: {0}")]
    PrimaryFillFailed(#[source] CodecError),

    #[error("Secondary fill failed: {0}")]
    SecondaryFillFailed(#[source] CodecError),

    /// The filled (unflattened) document remains at `output`
    #[error("Flattening {output} failed: {source}")]
    FlattenFailed {
        output: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StagedError for FillError {
    fn stage(&self) -> &'static str {
        match self {
            FillError::DocumentNotFound(_) | FillError::InvalidReference(_) => "resolve_document",
            FillError::FetchFailed { .. } => "fetch",
            FillError::NoStrategies => "select_strategy",
            FillError::PrimaryFillFailed(_) => "fill_primary",
            FillError::SecondaryFillFailed(_) => "fill_secondary",
            FillError::FlattenFailed { .. } => "flatten",
            FillError::Io { .. } => "write_output",
        }
    }
}

/// Document reference plus the values to write into it
#[derive(Debug, Clone, PartialEq)]
pub struct FillRequest {
    /// Local path or `http(s)://` URL
    pub document_reference: String,
    pub fields: FieldMap,
}

impl FillRequest {
    pub fn new(document_reference: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            document_reference: document_reference.into(),
            fields,
        }
    }
}

impl From<&Template> for FillRequest {
    fn from(template: &Template) -> Self {
        Self::new(template.document_reference.clone(), template.fields.clone())
    }
}

/// Where the filled document goes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputTarget {
    /// Exact output file
    Path(PathBuf),
    /// `<dir>/<stem>_filled.<ext>`
    Directory(PathBuf),
    /// `./<stem>_filled.<ext>`
    #[default]
    CurrentDir,
}

impl OutputTarget {
    /// Explicit path wins over directory
    pub fn from_options(path: Option<PathBuf>, directory: Option<PathBuf>) -> Self {
        match (path, directory) {
            (Some(path), _) => OutputTarget::Path(path),
            (None, Some(directory)) => OutputTarget::Directory(directory),
            (None, None) => OutputTarget::CurrentDir,
        }
    }

    /// Output file for an input named `input_name`
    pub fn resolve(&self, input_name: &Path) -> PathBuf {
        match self {
            OutputTarget::Path(path) => path.clone(),
            OutputTarget::Directory(dir) => dir.join(filled_file_name(input_name)),
            OutputTarget::CurrentDir => PathBuf::from(".").join(filled_file_name(input_name)),
        }
    }
}

/// `form.pdf` -> `form_filled.pdf`
pub fn filled_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    match input.extension() {
        Some(ext) => format!("{}_filled.{}", stem, ext.to_string_lossy()),
        None => format!("{}_filled", stem),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillOutcome {
    pub output_path: PathBuf,
    /// Document reference as given; URL references are fetched to scratch
    /// space that is gone by the time the fill returns
    pub input_document: String,
    pub flattened: bool,
    /// Strategy that produced the output
    pub strategy: String,
}

/// Local document a fill reads from
struct ResolvedDocument {
    path: PathBuf,
    /// Keeps fetched documents alive for the duration of the fill
    _scratch: Option<TempDir>,
}

pub struct FillEngine {
    strategies: Vec<SharedCodec>,
    http_client: reqwest::Client,
    event_bus: EventBus,
}

impl FillEngine {
    pub fn new(strategies: Vec<SharedCodec>, http_client: reqwest::Client, event_bus: EventBus) -> Self {
        Self {
            strategies,
            http_client,
            event_bus,
        }
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Fill `request` and write the result to `output`
    pub async fn fill(
        &self,
        request: &FillRequest,
        output: &OutputTarget,
        flatten: bool,
    ) -> Result<FillOutcome, FillError> {
        let mut reporter = OperationReporter::new(&self.event_bus, EventFamily::Fill);
        let mut detail = FillDetail {
            document: request.document_reference.clone(),
            ..Default::default()
        };
        reporter.started(detail.clone());

        let result = self.fill_inner(request, output, flatten, &reporter, &mut detail).await;
        match result {
            Ok(outcome) => {
                info!(
                    document = %request.document_reference,
                    output = %outcome.output_path.display(),
                    strategy = %outcome.strategy,
                    flattened = outcome.flattened,
                    "Document filled"
                );
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
        request: &FillRequest,
        output: &OutputTarget,
        flatten: bool,
        reporter: &OperationReporter,
        detail: &mut FillDetail,
    ) -> Result<FillOutcome, FillError> {
        if self.strategies.is_empty() {
            return Err(FillError::NoStrategies);
        }

        let document = self.resolve_document(&request.document_reference).await?;
        let output_path = output.resolve(&document.path);
        detail.output_path = Some(output_path.clone());
        reporter.progress(detail.clone(), Some(20), "Document resolved");

        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| FillError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let strategy = self
            .fill_with_fallback(&document.path, &request.fields, &output_path, reporter, detail)
            .await?;
        detail.strategy = Some(strategy.name().to_string());
        reporter.progress(detail.clone(), Some(70), "Fields written");

        if flatten {
            flatten_in_place(&strategy, &output_path).await?;
            detail.flattened = true;
            reporter.progress(detail.clone(), Some(90), "Document flattened");
        }

        Ok(FillOutcome {
            output_path,
            input_document: request.document_reference.trim().to_string(),
            flattened: flatten,
            strategy: strategy.name().to_string(),
        })
    }

    /// Walk the strategy list in order; the first success wins
    async fn fill_with_fallback(
        &self,
        document: &Path,
        fields: &FieldMap,
        output: &Path,
        reporter: &OperationReporter,
        detail: &FillDetail,
    ) -> Result<SharedCodec, FillError> {
        let mut last_error = None;

        for (index, strategy) in self.strategies.iter().enumerate() {
            match strategy.fill(document, fields, output).await {
                Ok(()) => {
                    debug!(strategy = strategy.name(), index, "Fill strategy succeeded");
                    return Ok(strategy.clone());
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), "Fill strategy failed: {}", e);
                    if let Some(next) = self.strategies.get(index + 1) {
                        let mut failing = detail.clone();
                        failing.strategy = Some(strategy.name().to_string());
                        reporter.progress(
                            failing,
                            None,
                            format!("{} failed, falling back to {}: {}", strategy.name(), next.name(), e),
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if self.strategies.len() == 1 => Err(FillError::PrimaryFillFailed(e)),
            Some(e) => Err(FillError::SecondaryFillFailed(e)),
            None => Err(FillError::NoStrategies),
        }
    }

    async fn resolve_document(&self, reference: &str) -> Result<ResolvedDocument, FillError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(FillError::InvalidReference("empty reference".to_string()));
        }

        if reference.starts_with("http://") || reference.starts_with("https://") {
            return self.fetch_scratch_copy(reference).await;
        }
        if reference.contains("://") {
            return Err(FillError::InvalidReference(reference.to_string()));
        }

        let path = PathBuf::from(reference);
        if !path.is_file() {
            return Err(FillError::DocumentNotFound(path));
        }
        Ok(ResolvedDocument {
            path,
            _scratch: None,
        })
    }

    async fn fetch_scratch_copy(&self, url: &str) -> Result<ResolvedDocument, FillError> {
        let file_name = reqwest::Url::parse(url)
            .map_err(|_| FillError::InvalidReference(url.to_string()))?
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .filter(|segment| !segment.is_empty())
            .unwrap_or_else(|| "document.pdf".to_string());

        let scratch = TempDir::new().map_err(|source| FillError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        let path = scratch.path().join(file_name);

        fetch_to_file(&self.http_client, url, &path)
            .await
            .map_err(|e| match e {
                DownloadError::Io { path, source } => FillError::Io { path, source },
                other => FillError::FetchFailed {
                    url: url.to_string(),
                    reason: other.to_string(),
                },
            })?;
        debug!(url = %url, path = %path.display(), "Fetched document to scratch space");

        Ok(ResolvedDocument {
            path,
            _scratch: Some(scratch),
        })
    }
}

/// Flatten into a sibling file then replace `output`
///
/// On failure `output` keeps the filled, unflattened document.
async fn flatten_in_place(strategy: &SharedCodec, output: &Path) -> Result<(), FillError> {
    let file_name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = output.with_file_name(format!(".{}.flatten", file_name));

    if let Err(source) = strategy.flatten(output, &staging).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(FillError::FlattenFailed {
            output: output.to_path_buf(),
            source,
        });
    }

    tokio::fs::rename(&staging, output)
        .await
        .map_err(|source| FillError::Io {
            path: output.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::codec::mock::MockCodec;
    use formflow_common::events::EventPhase;
    use std::sync::Arc;

    fn fields() -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("Name".to_string(), "Alice".to_string());
        fields
    }

    fn setup() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("form.pdf");
        std::fs::write(&doc, b"%PDF").unwrap();
        (dir, doc)
    }

    fn engine(primary: Arc<MockCodec>, secondary: Arc<MockCodec>, bus: EventBus) -> FillEngine {
        let strategies: Vec<SharedCodec> = vec![primary, secondary];
        FillEngine::new(strategies, reqwest::Client::new(), bus)
    }

    #[test]
    fn test_output_target_resolution() {
        let input = Path::new("/forms/f3520.pdf");
        assert_eq!(
            OutputTarget::from_options(Some("/x/out.pdf".into()), Some("/y".into())).resolve(input),
            PathBuf::from("/x/out.pdf")
        );
        assert_eq!(
            OutputTarget::from_options(None, Some("/y".into())).resolve(input),
            PathBuf::from("/y/f3520_filled.pdf")
        );
        assert_eq!(
            OutputTarget::CurrentDir.resolve(input),
            PathBuf::from("./f3520_filled.pdf")
        );
        assert_eq!(filled_file_name(Path::new("plain")), "plain_filled");
    }

    #[tokio::test]
    async fn test_primary_success_never_touches_secondary() {
        let (dir, doc) = setup();
        let primary = Arc::new(MockCodec::new("primary", &[]));
        let secondary = Arc::new(MockCodec::new("secondary", &[]));
        let engine = engine(primary.clone(), secondary.clone(), EventBus::new(16));

        let request = FillRequest::new(doc.display().to_string(), fields());
        let outcome = engine
            .fill(&request, &OutputTarget::Directory(dir.path().join("out")), false)
            .await
            .unwrap();

        assert_eq!(outcome.strategy, "primary");
        assert_eq!(outcome.output_path, dir.path().join("out/form_filled.pdf"));
        assert_eq!(primary.fills(), 1);
        assert_eq!(secondary.fills(), 0);
        let written = std::fs::read_to_string(&outcome.output_path).unwrap();
        assert_eq!(written, "primary:{\"Name\":\"Alice\"}");
    }

    #[tokio::test]
    async fn test_fallback_activation() {
        let (dir, doc) = setup();
        let primary = Arc::new(MockCodec::failing("primary"));
        let secondary = Arc::new(MockCodec::new("secondary", &[]));
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("fill.progress");
        let engine = engine(primary.clone(), secondary.clone(), bus);

        let request = FillRequest::new(doc.display().to_string(), fields());
        let outcome = engine
            .fill(&request, &OutputTarget::Path(dir.path().join("o.pdf")), false)
            .await
            .unwrap();

        assert_eq!(outcome.strategy, "secondary");
        assert_eq!(primary.fills(), 1);
        assert_eq!(secondary.fills(), 1);

        let messages: Vec<String> = sub
            .drain()
            .into_iter()
            .filter_map(|e| e.data.message)
            .collect();
        assert!(messages
            .iter()
            .any(|m| m.starts_with("primary failed, falling back to secondary")));
    }

    #[tokio::test]
    async fn test_both_strategies_fail() {
        let (dir, doc) = setup();
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("fill.*");
        let engine = engine(
            Arc::new(MockCodec::failing("primary")),
            Arc::new(MockCodec::failing("secondary")),
            bus,
        );

        let request = FillRequest::new(doc.display().to_string(), fields());
        let err = engine
            .fill(&request, &OutputTarget::Directory(dir.path().to_path_buf()), false)
            .await
            .unwrap_err();

        match &err {
            FillError::SecondaryFillFailed(CodecError::Failed { codec, .. }) => {
                assert_eq!(codec, "secondary")
            }
            other => panic!("expected SecondaryFillFailed, got {:?}", other),
        }

        let events = sub.drain();
        let last = events.last().unwrap();
        assert_eq!(last.phase(), EventPhase::Error);
        assert_eq!(last.data.stage.as_deref(), Some("fill_secondary"));
        assert_eq!(last.error, Some(err.to_string()));
        assert_eq!(events.first().unwrap().phase(), EventPhase::Started);
    }

    #[tokio::test]
    async fn test_single_strategy_failure_is_primary_failure() {
        let (dir, doc) = setup();
        let engine = FillEngine::new(
            vec![Arc::new(MockCodec::failing("only"))],
            reqwest::Client::new(),
            EventBus::new(16),
        );

        let request = FillRequest::new(doc.display().to_string(), fields());
        let result = engine
            .fill(&request, &OutputTarget::Directory(dir.path().to_path_buf()), false)
            .await;
        assert!(matches!(result, Err(FillError::PrimaryFillFailed(_))));
    }

    #[tokio::test]
    async fn test_flatten_uses_producing_strategy() {
        let (dir, doc) = setup();
        let primary = Arc::new(MockCodec::failing("primary"));
        let secondary = Arc::new(MockCodec::new("secondary", &[]));
        let engine = engine(primary.clone(), secondary.clone(), EventBus::new(16));

        let request = FillRequest::new(doc.display().to_string(), fields());
        let outcome = engine
            .fill(&request, &OutputTarget::Directory(dir.path().to_path_buf()), true)
            .await
            .unwrap();

        assert!(outcome.flattened);
        assert_eq!(primary.flatten_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(secondary.flatten_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        let written = std::fs::read_to_string(&outcome.output_path).unwrap();
        assert!(written.starts_with("FLAT secondary:"));
    }

    #[tokio::test]
    async fn test_flatten_failure_keeps_filled_output() {
        let (dir, doc) = setup();
        let mut primary = MockCodec::new("primary", &[]);
        primary.fail_flatten = true;
        let engine = engine(
            Arc::new(primary),
            Arc::new(MockCodec::new("secondary", &[])),
            EventBus::new(16),
        );

        let request = FillRequest::new(doc.display().to_string(), fields());
        let output = dir.path().join("kept.pdf");
        let err = engine
            .fill(&request, &OutputTarget::Path(output.clone()), true)
            .await
            .unwrap_err();

        assert!(matches!(err, FillError::FlattenFailed { .. }));
        let written = std::fs::read_to_string(&output).unwrap();
        assert!(written.starts_with("primary:"));
    }

    #[tokio::test]
    async fn test_reference_resolution_errors() {
        let dir = TempDir::new().unwrap();
        let engine = engine(
            Arc::new(MockCodec::new("primary", &[])),
            Arc::new(MockCodec::new("secondary", &[])),
            EventBus::new(16),
        );
        let target = OutputTarget::Directory(dir.path().to_path_buf());

        let missing = FillRequest::new(dir.path().join("absent.pdf").display().to_string(), fields());
        assert!(matches!(
            engine.fill(&missing, &target, false).await,
            Err(FillError::DocumentNotFound(_))
        ));

        let ftp = FillRequest::new("ftp://host/form.pdf", fields());
        assert!(matches!(
            engine.fill(&ftp, &target, false).await,
            Err(FillError::InvalidReference(_))
        ));
    }

    #[tokio::test]
    async fn test_no_strategies() {
        let (dir, doc) = setup();
        let engine = FillEngine::new(Vec::new(), reqwest::Client::new(), EventBus::new(16));
        let request = FillRequest::new(doc.display().to_string(), fields());
        let result = engine
            .fill(&request, &OutputTarget::Directory(dir.path().to_path_buf()), false)
            .await;
        assert!(matches!(result, Err(FillError::NoStrategies)));
    }
}
