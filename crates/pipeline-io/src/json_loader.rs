//! JSON Loader (§4.G): classify JSON vs JSON-Lines by the first non-blank
//! character, try the engine's native reader, and fall back to validation
//! plus a small set of repair heuristics applied to a copy.

use crate::column_namer::{apply_column_names, normalize_columns};
use crate::session::AnalyticSession;
use datafusion::prelude::NdJsonReadOptions;
use pipeline_core::{PipelineError, Result};
use std::path::{Path, PathBuf};
use tracing::{instrument, warn};

const MAX_COLLECTED_ERRORS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Array,
    LineDelimited,
}

#[derive(Debug, Clone)]
pub struct JsonLineError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct JsonLoadOutcome {
    pub table_name: String,
    pub loaded_rows: u64,
    pub shape: JsonShape,
    pub was_repaired: bool,
}

/// Classifies by the first non-blank character: `[` is an array, `{` is
/// line-delimited, anything else defers to the engine's auto-detection
/// (treated here as line-delimited, the more permissive of the two).
pub fn classify_shape(path: &Path) -> Result<JsonShape> {
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::external("json_classify", e))?;
    match content.trim_start().chars().next() {
        Some('[') => Ok(JsonShape::Array),
        Some('{') => Ok(JsonShape::LineDelimited),
        _ => Ok(JsonShape::LineDelimited),
    }
}

#[instrument(skip(session), fields(table_name))]
pub async fn load_json(
    session: &mut AnalyticSession,
    path: &Path,
    table_name: &str,
) -> Result<JsonLoadOutcome> {
    let shape = classify_shape(path)?;

    match try_fast_path(session, path, table_name, shape).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            warn!(error = %err, "json fast path failed, attempting repair");
            load_json_recovery(session, path, table_name, shape).await
        }
    }
}

async fn try_fast_path(
    session: &mut AnalyticSession,
    path: &Path,
    table_name: &str,
    shape: JsonShape,
) -> Result<JsonLoadOutcome> {
    let batches = match shape {
        JsonShape::Array => {
            let value: serde_json::Value = serde_json::from_str(
                &std::fs::read_to_string(path).map_err(|e| PipelineError::external("json_load", e))?,
            )?;
            read_array_value(session, &value).await?
        }
        JsonShape::LineDelimited => {
            let df = session
                .context()
                .read_json(path.to_string_lossy().as_ref(), NdJsonReadOptions::default())
                .await?;
            df.collect().await?
        }
    };

    if batches.is_empty() {
        return Err(PipelineError::format("JSON fast path produced no batches"));
    }

    let raw_columns: Vec<String> = batches[0]
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let (final_names, _) = normalize_columns(&raw_columns);
    let batches = apply_column_names(batches, &final_names)
        .map_err(|e| PipelineError::external("json_load", e))?;

    let loaded_rows: u64 = batches.iter().map(|b| b.num_rows() as u64).sum();
    session.register_table(table_name, batches)?;

    Ok(JsonLoadOutcome {
        table_name: table_name.to_string(),
        loaded_rows,
        shape,
        was_repaired: false,
    })
}

async fn read_array_value(
    session: &AnalyticSession,
    value: &serde_json::Value,
) -> Result<Vec<datafusion::arrow::array::RecordBatch>> {
    let array = value
        .as_array()
        .ok_or_else(|| PipelineError::format("expected a top-level JSON array"))?;
    let ndjson: String = array
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    read_ndjson_text(session, &ndjson).await
}

async fn read_ndjson_text(
    session: &AnalyticSession,
    ndjson: &str,
) -> Result<Vec<datafusion::arrow::array::RecordBatch>> {
    let tmp = tempfile::Builder::new()
        .suffix(".jsonl")
        .tempfile()
        .map_err(|e| PipelineError::external("json_load", e))?;
    std::fs::write(tmp.path(), ndjson).map_err(|e| PipelineError::external("json_load", e))?;
    let df = session
        .context()
        .read_json(tmp.path().to_string_lossy().as_ref(), NdJsonReadOptions::default())
        .await?;
    Ok(df.collect().await?)
}

/// Validates each non-blank line as standalone JSON, collecting up to 20
/// errors. For line-delimited input, every original or post-repair line
/// must parse or the whole load fails.
fn validate_line_delimited(content: &str) -> Vec<JsonLineError> {
    let mut errors = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if let Err(err) = serde_json::from_str::<serde_json::Value>(line) {
            if errors.len() < MAX_COLLECTED_ERRORS {
                errors.push(JsonLineError {
                    line: idx + 1,
                    column: err.column(),
                    message: err.to_string(),
                });
            }
        }
    }
    errors
}

/// Strips a UTF-8 BOM, C0 control characters other than `\n\r\t`, trailing
/// commas before `]`/`}`, and converts single-quoted JSON tokens to
/// double-quoted ones.
fn repair_text(content: &str) -> String {
    let no_bom = content.strip_prefix('\u{feff}').unwrap_or(content);
    let no_controls: String = no_bom
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();

    let trailing_comma = regex_trailing_comma();
    let no_trailing_commas = trailing_comma.replace_all(&no_controls, "$1");

    single_quote_to_double(&no_trailing_commas)
}

fn regex_trailing_comma() -> &'static regex::Regex {
    use std::sync::LazyLock;
    static RE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r",(\s*[\]}])").unwrap());
    &RE
}

/// Converts JSON tokens quoted with `'` to `"`, leaving already-double-quoted
/// string contents untouched. A best-effort character scan, not a full
/// parser; good enough for the common "almost-JSON with single quotes" case.
fn single_quote_to_double(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut in_double = false;
    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if !in_double => {
                in_double = true;
                out.push(c);
            }
            '"' if in_double => {
                in_double = false;
                out.push(c);
            }
            '\'' if !in_double => out.push('"'),
            _ => out.push(c),
        }
    }
    out
}

async fn load_json_recovery(
    session: &mut AnalyticSession,
    path: &Path,
    table_name: &str,
    shape: JsonShape,
) -> Result<JsonLoadOutcome> {
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::external("json_load", e))?;

    match shape {
        JsonShape::Array => {
            if serde_json::from_str::<serde_json::Value>(&content).is_ok() {
                return Err(PipelineError::format(
                    "JSON array parsed but fast path failed for an unrelated reason",
                ));
            }
            let repaired = repair_text(&content);
            let value: serde_json::Value = serde_json::from_str(&repaired)
                .map_err(|_| PipelineError::format("unrepairable JSON array"))?;
            let batches = read_array_value(session, &value).await?;
            let batches = rename_from_first_batch(batches)?;
            let loaded_rows = batches.iter().map(|b| b.num_rows() as u64).sum();
            session.register_table(table_name, batches)?;
            Ok(JsonLoadOutcome {
                table_name: table_name.to_string(),
                loaded_rows,
                shape,
                was_repaired: true,
            })
        }
        JsonShape::LineDelimited => {
            let original_errors = validate_line_delimited(&content);
            if original_errors.is_empty() {
                return Err(PipelineError::format(
                    "JSONL validated but fast path failed for an unrelated reason",
                ));
            }

            let repaired_lines: Vec<String> = content
                .lines()
                .map(|line| {
                    if line.trim().is_empty() {
                        line.to_string()
                    } else if serde_json::from_str::<serde_json::Value>(line).is_ok() {
                        line.to_string()
                    } else {
                        repair_text(line)
                    }
                })
                .collect();
            let repaired_content = repaired_lines.join("\n");

            let remaining_errors = validate_line_delimited(&repaired_content);
            if !remaining_errors.is_empty() {
                let summary = remaining_errors
                    .iter()
                    .map(|e| format!("line {}: {}", e.line, e.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(PipelineError::format(format!(
                    "unrecoverable JSONL lines: {summary}"
                )));
            }

            let batches = read_ndjson_text(session, &repaired_content).await?;
            let batches = rename_from_first_batch(batches)?;
            let loaded_rows = batches.iter().map(|b| b.num_rows() as u64).sum();
            session.register_table(table_name, batches)?;
            Ok(JsonLoadOutcome {
                table_name: table_name.to_string(),
                loaded_rows,
                shape,
                was_repaired: true,
            })
        }
    }
}

fn rename_from_first_batch(
    batches: Vec<datafusion::arrow::array::RecordBatch>,
) -> Result<Vec<datafusion::arrow::array::RecordBatch>> {
    if batches.is_empty() {
        return Ok(batches);
    }
    let raw_columns: Vec<String> = batches[0]
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let (final_names, _) = normalize_columns(&raw_columns);
    apply_column_names(batches, &final_names).map_err(|e| PipelineError::external("json_load", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("pipeline-io-json-loader-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn classifies_array_vs_line_delimited() {
        let array_path = write_temp("a.json", "[{\"a\":1}]");
        assert_eq!(classify_shape(&array_path).unwrap(), JsonShape::Array);

        let jsonl_path = write_temp("b.jsonl", "{\"a\":1}\n{\"a\":2}\n");
        assert_eq!(classify_shape(&jsonl_path).unwrap(), JsonShape::LineDelimited);
    }

    #[tokio::test]
    async fn well_formed_array_loads() {
        let path = write_temp("orders.json", "[{\"id\":1,\"name\":\"Ann\"},{\"id\":2,\"name\":\"Bob\"}]");
        let mut session = AnalyticSession::new();
        let outcome = load_json(&mut session, &path, "orders").await.unwrap();
        assert_eq!(outcome.loaded_rows, 2);
        assert!(!outcome.was_repaired);
    }

    #[test]
    fn trailing_comma_is_stripped() {
        let repaired = repair_text("{\"a\":1,}");
        assert_eq!(repaired, "{\"a\":1}");
    }

    #[test]
    fn single_quotes_become_double_quotes() {
        let repaired = repair_text("{'a': 1}");
        assert_eq!(repaired, "{\"a\": 1}");
    }

    #[test]
    fn unrecoverable_line_is_reported_with_location() {
        let errors = validate_line_delimited("{\"a\":1}\nthis is not json at all\n");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 2);
    }
}
