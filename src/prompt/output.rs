// Output validation
//
// Parsing is tolerant of the usual model wrappers (code fences, leading
// prose); schema checks are delegated to the schema interpreter.

use serde_json::Value;
use std::time::Instant;
use thiserror::Error;

use crate::config::constants::VALIDATION_BUDGET_MS;
use crate::schema::{SchemaTree, Violation};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OutputError {
    /// No JSON value could be recovered from the model text
    #[error("model output is not valid JSON")]
    Unparseable,

    /// Parsed, but failed the output schema
    #[error("model output failed schema validation ({} violations)", .0.len())]
    SchemaViolations(Vec<Violation>),
}

/// Recover a JSON value from raw model text.
///
/// Tries a strict parse, then the contents of a markdown code fence, then
/// the outermost `{...}` or `[...]` span.
pub fn parse_model_output(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let unfenced = strip_code_fences(trimmed).unwrap_or(trimmed);
    if let Ok(value) = serde_json::from_str(unfenced) {
        return Some(value);
    }

    outermost_spans(unfenced)
        .into_iter()
        .find_map(|span| serde_json::from_str(span).ok())
}

/// Parse and validate model text against the output schema.
pub fn validate_output(raw: &str, schema: &SchemaTree) -> Result<Value, OutputError> {
    let started = Instant::now();
    let result = match parse_model_output(raw) {
        None => Err(OutputError::Unparseable),
        Some(value) => schema.validate(&value).map_err(OutputError::SchemaViolations),
    };

    let elapsed = started.elapsed();
    if elapsed.as_millis() > VALIDATION_BUDGET_MS {
        tracing::warn!(
            elapsed_ms = elapsed.as_millis() as u64,
            budget_ms = VALIDATION_BUDGET_MS as u64,
            output_bytes = raw.len(),
            "Output validation exceeded latency budget"
        );
    }
    result
}

fn strip_code_fences(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    // Skip the info string ("json", "JSON", ...) on the opening line
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    let close = body.find("```").unwrap_or(body.len());
    Some(body[..close].trim())
}

fn outermost_spans(text: &str) -> Vec<&str> {
    let mut spans: Vec<(usize, &str)> = [('{', '}'), ('[', ']')]
        .into_iter()
        .filter_map(|(open, close)| {
            let start = text.find(open)?;
            let end = text.rfind(close)?;
            (end > start).then(|| (start, &text[start..=end]))
        })
        .collect();
    spans.sort_by_key(|(start, _)| *start);
    spans.into_iter().map(|(_, span)| span).collect()
}
