//! Typed per-family event payloads
//!
//! One struct per command family; the family decides the `<family>.` prefix
//! of the event type, so a payload can never be published under another
//! family's name.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command family, the first segment of an event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventFamily {
    Download,
    Inspect,
    Template,
    Fill,
    Case,
    Workflow,
}

impl EventFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFamily::Download => "download",
            EventFamily::Inspect => "inspect",
            EventFamily::Template => "template",
            EventFamily::Fill => "fill",
            EventFamily::Case => "case",
            EventFamily::Workflow => "workflow",
        }
    }
}

/// Form download progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadDetail {
    pub form_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance_path: Option<PathBuf>,
}

/// Field inspection of a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InspectDetail {
    pub document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_count: Option<usize>,
}

/// Template export
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateDetail {
    pub document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_count: Option<usize>,
}

/// Document fill
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillDetail {
    pub document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Strategy that produced (or is producing) the document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default)]
    pub flattened: bool,
}

/// Which case operation an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseAction {
    #[default]
    Create,
    Save,
    Fill,
}

/// Case persistence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseDetail {
    pub action: CaseAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Which orchestrated workflow an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    #[default]
    Single,
    Bulk,
    Update,
}

/// Orchestrated workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDetail {
    pub kind: WorkflowKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<usize>,
}

/// Family-specific payload of an event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventDetail {
    Download(DownloadDetail),
    Inspect(InspectDetail),
    Template(TemplateDetail),
    Fill(FillDetail),
    Case(CaseDetail),
    Workflow(WorkflowDetail),
}

impl EventDetail {
    pub fn family(&self) -> EventFamily {
        match self {
            EventDetail::Download(_) => EventFamily::Download,
            EventDetail::Inspect(_) => EventFamily::Inspect,
            EventDetail::Template(_) => EventFamily::Template,
            EventDetail::Fill(_) => EventFamily::Fill,
            EventDetail::Case(_) => EventFamily::Case,
            EventDetail::Workflow(_) => EventFamily::Workflow,
        }
    }

    pub fn as_download(&self) -> Option<&DownloadDetail> {
        match self {
            EventDetail::Download(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_inspect(&self) -> Option<&InspectDetail> {
        match self {
            EventDetail::Inspect(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_template(&self) -> Option<&TemplateDetail> {
        match self {
            EventDetail::Template(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_fill(&self) -> Option<&FillDetail> {
        match self {
            EventDetail::Fill(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_case(&self) -> Option<&CaseDetail> {
        match self {
            EventDetail::Case(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_workflow(&self) -> Option<&WorkflowDetail> {
        match self {
            EventDetail::Workflow(d) => Some(d),
            _ => None,
        }
    }
}

impl From<DownloadDetail> for EventDetail {
    fn from(d: DownloadDetail) -> Self {
        EventDetail::Download(d)
    }
}

impl From<InspectDetail> for EventDetail {
    fn from(d: InspectDetail) -> Self {
        EventDetail::Inspect(d)
    }
}

impl From<TemplateDetail> for EventDetail {
    fn from(d: TemplateDetail) -> Self {
        EventDetail::Template(d)
    }
}

impl From<FillDetail> for EventDetail {
    fn from(d: FillDetail) -> Self {
        EventDetail::Fill(d)
    }
}

impl From<CaseDetail> for EventDetail {
    fn from(d: CaseDetail) -> Self {
        EventDetail::Case(d)
    }
}

impl From<WorkflowDetail> for EventDetail {
    fn from(d: WorkflowDetail) -> Self {
        EventDetail::Workflow(d)
    }
}
