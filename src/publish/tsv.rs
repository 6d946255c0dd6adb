use anyhow::{Context, Result};
use serde_json::Value;

use crate::models::ReviewRecord;

/// Encode a course slice as tab-separated text.
///
/// The header starts with an unnamed row index column. Fields are never quoted;
/// tab, newline, carriage return and backslash are escaped with a backslash.
pub fn encode_slice(columns: &[String], records: &[ReviewRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(Vec::new());

    let header = std::iter::once(String::new()).chain(columns.iter().map(|c| escape_field(c)));
    writer
        .write_record(header)
        .context("Failed to write TSV header")?;

    for (index, record) in records.iter().enumerate() {
        let fields = std::iter::once(index.to_string())
            .chain(record.values.iter().map(|v| escape_field(&render_cell(v))));
        writer
            .write_record(fields)
            .with_context(|| format!("Failed to write TSV row {}", index))?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush TSV output: {}", e))
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\\t"),
            '\n' => out.push_str("\\\n"),
            '\r' => out.push_str("\\\r"),
            c => out.push(c),
        }
    }
    out
}
