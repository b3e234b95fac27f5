//! Persisted, reusable field-value sets
//!
//! On disk a case is
//! `{ "case_metadata", "form_reference", "fields", "validation"? }`.

use super::template::{FieldMap, Template};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseMetadata {
    pub case_id: String,
    pub case_name: String,
    pub entity: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the case fills
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormReference {
    pub form_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_reference: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_reference: Option<String>,
}

/// Outcome of checking a case against a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub missing_fields: Vec<String>,
    /// Value-level failures; missing-field checking never populates this
    #[serde(default)]
    pub invalid_fields: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub case_metadata: CaseMetadata,
    pub form_reference: FormReference,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

impl Case {
    pub fn case_id(&self) -> &str {
        &self.case_metadata.case_id
    }

    pub fn form_code(&self) -> &str {
        &self.form_reference.form_code
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Seed fields from a template without overwriting existing values
    ///
    /// Also records the template's document as this case's document when the
    /// case has none yet.
    pub fn apply_template(&mut self, template: &Template) {
        for name in template.field_names() {
            if !self.fields.contains_key(name) {
                self.fields.insert(name.to_string(), String::new());
            }
        }
        if self.form_reference.document_reference.is_none() {
            self.form_reference.document_reference = Some(template.document_reference.clone());
        }
    }

    /// Record which template fields this case lacks
    ///
    /// Only `validation` changes; `fields` is left as is. Extra case fields
    /// are not reported.
    pub fn validate(&mut self, template: &Template) -> &ValidationResult {
        let missing_fields: Vec<String> = template
            .field_names()
            .filter(|name| !self.fields.contains_key(*name))
            .map(str::to_string)
            .collect();

        self.validation.insert(ValidationResult {
            valid: missing_fields.is_empty(),
            missing_fields,
            invalid_fields: Vec::new(),
            checked_at: Utc::now(),
        })
    }
}
