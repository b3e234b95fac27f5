//! Fill strategy backed by an external command-line tool
//!
//! The tool is described in configuration by three argument templates.
//! `{input}`, `{output}` and `{fields}` are substituted per call; field
//! values are handed over in a scratch file (JSON or XFDF).

use super::{CodecError, FormCodec};
use crate::models::FieldMap;
use async_trait::async_trait;
use formflow_common::config::{CodecConfig, FieldsFormat};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::debug;

pub struct ExternalToolCodec {
    config: CodecConfig,
}

impl ExternalToolCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    fn expand(
        &self,
        args: &[String],
        input: &Path,
        output: Option<&Path>,
        fields: Option<&Path>,
    ) -> Vec<OsString> {
        args.iter()
            .map(|arg| expand_arg(arg, input, output, fields))
            .collect()
    }

    async fn run(&self, args: Vec<OsString>) -> Result<Vec<u8>, CodecError> {
        debug!(codec = %self.config.name, program = %self.config.program, ?args, "Running codec");

        let output = tokio::process::Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| CodecError::Io {
                codec: self.config.name.clone(),
                path: PathBuf::from(&self.config.program),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CodecError::Failed {
                codec: self.config.name.clone(),
                reason: format!(
                    "{} exited with {}: {}",
                    self.config.program,
                    output.status,
                    stderr.trim()
                ),
            });
        }

        Ok(output.stdout)
    }

    fn render_fields(&self, fields: &FieldMap) -> Result<String, CodecError> {
        match self.config.fields_format {
            FieldsFormat::Json => {
                serde_json::to_string_pretty(fields).map_err(|e| CodecError::Failed {
                    codec: self.config.name.clone(),
                    reason: format!("cannot encode fields: {}", e),
                })
            }
            FieldsFormat::Xfdf => Ok(render_xfdf(fields)),
        }
    }
}

#[async_trait]
impl FormCodec for ExternalToolCodec {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn list_fields(&self, document: &Path) -> Result<Vec<String>, CodecError> {
        let args = self.expand(&self.config.list_fields, document, None, None);
        let stdout = self.run(args).await?;
        let stdout = String::from_utf8(stdout).map_err(|_| CodecError::Failed {
            codec: self.config.name.clone(),
            reason: "field listing is not valid UTF-8".to_string(),
        })?;

        Ok(parse_field_lines(
            &stdout,
            self.config.field_prefix.as_deref(),
        ))
    }

    async fn fill(
        &self,
        document: &Path,
        fields: &FieldMap,
        output: &Path,
    ) -> Result<(), CodecError> {
        let suffix = match self.config.fields_format {
            FieldsFormat::Json => ".json",
            FieldsFormat::Xfdf => ".xfdf",
        };
        let scratch_err = |source| CodecError::Io {
            codec: self.config.name.clone(),
            path: std::env::temp_dir(),
            source,
        };
        let fields_file = tempfile::Builder::new()
            .prefix("formflow-fields-")
            .suffix(suffix)
            .tempfile()
            .map_err(scratch_err)?;

        let content = self.render_fields(fields)?;
        tokio::fs::write(fields_file.path(), content)
            .await
            .map_err(scratch_err)?;

        let args = self.expand(
            &self.config.fill,
            document,
            Some(output),
            Some(fields_file.path()),
        );
        self.run(args).await?;
        Ok(())
    }

    async fn flatten(&self, document: &Path, output: &Path) -> Result<(), CodecError> {
        let template = self
            .config
            .flatten
            .as_ref()
            .ok_or_else(|| CodecError::FlattenUnsupported {
                codec: self.config.name.clone(),
            })?;

        let args = self.expand(template, document, Some(output), None);
        self.run(args).await?;
        Ok(())
    }
}

fn expand_arg(arg: &str, input: &Path, output: Option<&Path>, fields: Option<&Path>) -> OsString {
    // Whole-argument placeholders keep non UTF-8 paths intact
    match (arg, output, fields) {
        ("{input}", _, _) => return input.as_os_str().to_os_string(),
        ("{output}", Some(output), _) => return output.as_os_str().to_os_string(),
        ("{fields}", _, Some(fields)) => return fields.as_os_str().to_os_string(),
        _ => {}
    }

    let mut expanded = arg.replace("{input}", &input.to_string_lossy());
    if let Some(output) = output {
        expanded = expanded.replace("{output}", &output.to_string_lossy());
    }
    if let Some(fields) = fields {
        expanded = expanded.replace("{fields}", &fields.to_string_lossy());
    }
    OsString::from(expanded)
}

/// One field name per line; only the line terminator is removed
fn parse_field_lines(stdout: &str, prefix: Option<&str>) -> Vec<String> {
    stdout
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter_map(|line| match prefix {
            Some(prefix) => line.strip_prefix(prefix),
            None => Some(line),
        })
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Render field values as an XFDF document
pub fn render_xfdf(fields: &FieldMap) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <xfdf xmlns=\"http://ns.adobe.com/xfdf/\" xml:space=\"preserve\">\n<fields>\n",
    );
    for (name, value) in fields {
        xml.push_str(&format!(
            "<field name=\"{}\"><value>{}</value></field>\n",
            escape_xml(name),
            escape_xml(value)
        ));
    }
    xml.push_str("</fields>\n</xfdf>\n");
    xml
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
