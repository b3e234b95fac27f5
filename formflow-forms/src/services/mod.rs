//! Form services
//!
//! Catalog lookup, download, field extraction, filling and case storage,
//! plus the orchestrator that chains them.

pub mod case_store;
pub mod catalog;
pub mod codec;
pub mod downloader;
pub mod field_extractor;
pub mod fill_engine;
pub mod task_runner;
pub mod workflow_orchestrator;

pub use case_store::{CaseError, CaseStore};
pub use catalog::{Catalog, CatalogEntry, CatalogError};
pub use codec::{codecs_from_config, CodecError, ExternalToolCodec, FormCodec, SharedCodec};
pub use downloader::{DownloadError, DownloadOutcome, Downloader};
pub use field_extractor::{ExtractError, FieldExtractor, InspectReport};
pub use fill_engine::{FillEngine, FillError, FillOutcome, FillRequest, OutputTarget};
pub use task_runner::{TaskError, TaskHandle, TaskInfo, TaskRunner};
pub use workflow_orchestrator::{
    BulkWorkflowResult, StepError, UpdateOutcome, WorkflowError, WorkflowOrchestrator,
    WorkflowResult, WorkflowStep,
};
