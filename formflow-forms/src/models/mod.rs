//! Data models shared by the form services

pub mod case;
pub mod provenance;
pub mod template;

pub use case::{Case, CaseMetadata, FormReference, ValidationResult};
pub use provenance::{Provenance, ProvenanceError};
pub use template::{FieldMap, Template, TemplateError};
