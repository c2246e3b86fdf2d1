//! Response parser
//!
//! Two stages for each field. The filename is first decoded from any
//! `{"filename": ...}` object with serde, then synthesized from the clock.
//! The code is first taken from the first fenced `python` block, then from a
//! `from docx import ... .save(...)` span. Running out of code stages is a
//! typed failure.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use shorui_core::filename::{default_filename, validate_filename};
use shorui_core::{CodeOrigin, FilenameOrigin, ParsedSnippet, Result, ShoruiError};
use std::sync::OnceLock;

#[derive(Debug, Deserialize)]
struct FilenameBlock {
    filename: String,
}

fn filename_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{[^{}]*"filename"[^{}]*\}"#).expect("filename object regex is valid")
    })
}

fn fenced_python_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)```[ \t]*(?:python3?|py)\b[^\n]*\n(.*?)```")
            .expect("fenced block regex is valid")
    })
}

fn docx_idiom_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)from\s+docx\s+import.*?\.save\([^)]*\)")
            .expect("docx idiom regex is valid")
    })
}

/// Parse a raw response using the current time for default filenames
pub fn parse_response(raw: &str) -> Result<ParsedSnippet> {
    parse_response_at(raw, Utc::now())
}

/// Parse a raw response; `now` seeds the default filename
pub fn parse_response_at(raw: &str, now: DateTime<Utc>) -> Result<ParsedSnippet> {
    let (source_code, code_origin) = extract_code(raw).ok_or_else(|| {
        ShoruiError::Parse("no executable snippet found".to_string())
    })?;

    let (target_filename, filename_origin) = match extract_filename(raw) {
        Some(name) => (name, FilenameOrigin::Model),
        None => (default_filename(now), FilenameOrigin::Generated),
    };

    // A model-chosen name that is unsafe fails the request; it is never rewritten.
    validate_filename(&target_filename)?;

    Ok(ParsedSnippet {
        target_filename,
        source_code,
        filename_origin,
        code_origin,
    })
}

/// First `{...}` object mentioning `filename` that decodes to a non-empty name
fn extract_filename(raw: &str) -> Option<String> {
    filename_object_re().find_iter(raw).find_map(|m| {
        match serde_json::from_str::<FilenameBlock>(m.as_str()) {
            Ok(block) => {
                let name = block.filename.trim().to_string();
                (!name.is_empty()).then_some(name)
            }
            Err(e) => {
                tracing::debug!("Skipping undecodable filename object: {}", e);
                None
            }
        }
    })
}

fn extract_code(raw: &str) -> Option<(String, CodeOrigin)> {
    let fenced = fenced_python_re()
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_matches('\n').trim_end().to_string())
        .filter(|code| !code.trim().is_empty());

    if let Some(code) = fenced {
        return Some((code, CodeOrigin::Fenced));
    }

    docx_idiom_re()
        .find(raw)
        .map(|m| (m.as_str().to_string(), CodeOrigin::Heuristic))
}
