//! Telemetry output writer.
//!
//! Writes drained span records to a destination directory, one file per
//! trace. Strictly a sink: no lifecycle logic lives here.

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;

use super::span::SpanRecord;

/// Output format for exported traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Text,
}

pub struct TelemetryWriter;

impl TelemetryWriter {
    /// Write one trace's records to `destination`, returning the file path.
    ///
    /// File names carry a local timestamp plus the trace id so repeated
    /// requests never collide.
    pub fn write_trace(
        records: &[SpanRecord],
        format: ExportFormat,
        destination: &Path,
    ) -> Result<PathBuf> {
        if !destination.exists() {
            fs::create_dir_all(destination)?;
        }

        let trace_id = records
            .first()
            .map(|r| r.trace_id.as_str())
            .unwrap_or("empty");
        let datetime: DateTime<Local> = SystemTime::now().into();
        let extension = match format {
            ExportFormat::Json => "json",
            ExportFormat::Text => "txt",
        };
        let filename = format!(
            "{}_{}.{}",
            datetime.format("%Y-%m-%d_%H-%M-%S"),
            trace_id,
            extension
        );
        let file_path = destination.join(filename);

        // Trailing newline so log shippers pick up the record.
        let content = match format {
            ExportFormat::Json => format!("{}\n", serde_json::to_string(records)?),
            ExportFormat::Text => Self::format_human_readable(records),
        };

        fs::write(&file_path, content)?;
        Ok(file_path)
    }

    /// Format records as human-readable text.
    fn format_human_readable(records: &[SpanRecord]) -> String {
        let mut output = String::new();
        let trace_id = records
            .first()
            .map(|r| r.trace_id.as_str())
            .unwrap_or("empty");
        output.push_str(&format!("===== Lariat Trace [{trace_id}] =====\n"));
        output.push_str(&format!("Spans: {}\n\n", records.len()));

        for record in records {
            output.push_str(&format!(
                "[{}] {} ({})\n",
                record.span_id, record.name, record.resource
            ));
            if let Some(parent) = &record.parent_id {
                output.push_str(&format!("  parent: {parent}\n"));
            }
            output.push_str(&format!("  service: {}\n", record.service));
            if !record.span_type.is_empty() {
                output.push_str(&format!("  type: {}\n", record.span_type));
            }
            output.push_str(&format!("  duration: {}ns\n", record.duration_ns));
            output.push_str(&format!("  error: {}\n", record.error));

            if !record.meta.is_empty() {
                let mut keys: Vec<_> = record.meta.keys().collect();
                keys.sort();
                for key in keys {
                    output.push_str(&format!("  meta.{key}: {}\n", record.meta[key]));
                }
            }
            if !record.metrics.is_empty() {
                let mut keys: Vec<_> = record.metrics.keys().collect();
                keys.sort();
                for key in keys {
                    output.push_str(&format!("  metrics.{key}: {}\n", record.metrics[key]));
                }
            }
            output.push('\n');
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::context::TraceContext;
    use tempfile::TempDir;

    fn sample_records() -> Vec<SpanRecord> {
        let context = TraceContext::new("writer-test");
        let span = context.start_span("command_execution");
        span.set_span_type("system");
        span.set_tag("cmd.exit_code", "0");
        context.buffer().complete(&span);
        context.buffer().drain()
    }

    #[test]
    fn writes_json_file_named_after_the_trace() {
        let dir = TempDir::new().unwrap();
        let records = sample_records();

        let path =
            TelemetryWriter::write_trace(&records, ExportFormat::Json, dir.path()).unwrap();
        let content = fs::read_to_string(&path).unwrap();

        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains(&records[0].trace_id));
        assert!(content.ends_with('\n'));
        assert!(content.contains("command_execution"));
    }

    #[test]
    fn text_format_lists_tags() {
        let dir = TempDir::new().unwrap();
        let records = sample_records();

        let path =
            TelemetryWriter::write_trace(&records, ExportFormat::Text, dir.path()).unwrap();
        let content = fs::read_to_string(&path).unwrap();

        assert!(content.contains("meta.cmd.exit_code: 0"));
        assert!(content.contains("type: system"));
    }
}
