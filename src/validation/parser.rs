//! Validator output parsing.
//!
//! Agents answer in several shapes: a bare JSON payload, JSON inside prose or
//! a code fence, JSON wrapped in a transport envelope, or the labelled
//! `COMPLETENESS:` / `STATUS:` text block. Each shape has its own detector.
//! Detectors never fail; they either produce a result or report that they do
//! not apply, optionally with a diagnostic. Only [`parse_validation_output`]
//! turns "nothing applied" into an error.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use super::{ValidationResult, ValidationStatus};
use crate::errors::ParseError;
use crate::util::extract_json_objects;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)```").unwrap());

static LABEL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\s>#*_`-]*(COMPLETENESS|STATUS|GAPS|RECOMMENDATIONS)[*_`]*\s*:[*_`]*\s*(.*)$")
        .unwrap()
});

static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•+]|\d+[.)])\s+(.*)$").unwrap());

static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[*_`\s]*(-?\d{1,3})(?:\.\d+)?\s*%?").unwrap());

/// Result of one detector.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Parsed(ValidationResult),
    /// The detector did not recognise the output. A diagnostic is attached
    /// when the format was recognised but the payload was unusable.
    NotApplicable(Option<ParseError>),
}

type Detector = fn(&str) -> Detection;

/// Detectors in priority order.
const DETECTORS: &[(&str, Detector)] = &[("json", detect_json), ("labelled", detect_labelled)];

/// Parse raw validator output into a verdict.
///
/// Returns the first detector's diagnostic when a format was recognised but
/// incomplete, so a missing `status` is reported by name.
pub fn parse_validation_output(output: &str) -> Result<ValidationResult, ParseError> {
    if output.trim().is_empty() {
        return Err(ParseError::EmptyOutput);
    }

    let mut diagnostic = None;
    for (name, detector) in DETECTORS {
        match detector(output) {
            Detection::Parsed(result) => {
                tracing::debug!(detector = name, status = %result.status, "parsed validator output");
                return Ok(result);
            }
            Detection::NotApplicable(err) => {
                if diagnostic.is_none() {
                    diagnostic = err;
                }
            }
        }
    }

    Err(diagnostic.unwrap_or(ParseError::NoRecognizedFormat))
}

/// Structured JSON payloads, bare or wrapped.
pub fn detect_json(output: &str) -> Detection {
    detect_json_at(output, 0)
}

/// Envelope nesting that will be unwrapped.
const MAX_ENVELOPE_DEPTH: usize = 1;

fn detect_json_at(output: &str, depth: usize) -> Detection {
    let mut diagnostic = None;
    for candidate in json_candidates(output) {
        match interpret_value(&candidate, depth) {
            Detection::Parsed(result) => return Detection::Parsed(result),
            Detection::NotApplicable(err) => {
                if diagnostic.is_none() {
                    diagnostic = err;
                }
            }
        }
    }
    Detection::NotApplicable(diagnostic)
}

/// JSON objects found in `output`: the whole text, fenced blocks, then every
/// object embedded in the prose, last first since verdicts close the answer.
fn json_candidates(output: &str) -> Vec<Value> {
    let mut candidates = Vec::new();
    let mut push = |value: Value| {
        if value.is_object() && !candidates.contains(&value) {
            candidates.push(value);
        }
    };

    if let Ok(value) = serde_json::from_str::<Value>(output.trim()) {
        push(value);
    }
    for cap in FENCED_BLOCK.captures_iter(output) {
        if let Ok(value) = serde_json::from_str::<Value>(cap[1].trim()) {
            push(value);
        }
    }
    for value in extract_json_objects(output).into_iter().rev() {
        push(value);
    }
    candidates
}

fn interpret_value(value: &Value, depth: usize) -> Detection {
    let Some(obj) = value.as_object() else {
        return Detection::NotApplicable(None);
    };

    if let Some(block) = obj.get("response_block") {
        return match block {
            Value::Object(payload) => payload_from_object(payload),
            Value::String(text) => detect_nested_text(text, depth),
            _ => Detection::NotApplicable(Some(ParseError::invalid(
                "response_block",
                "expected a string or an object",
            ))),
        };
    }

    if looks_like_payload(obj) {
        return payload_from_object(obj);
    }

    if depth < MAX_ENVELOPE_DEPTH
        && let Some(inner) = envelope_text(obj)
    {
        return detect_nested_text(&inner, depth + 1);
    }

    Detection::NotApplicable(None)
}

/// Text carried inside a response_block string or a transport envelope.
fn detect_nested_text(text: &str, depth: usize) -> Detection {
    match detect_json_at(text, depth) {
        Detection::Parsed(result) => Detection::Parsed(result),
        Detection::NotApplicable(json_err) => match detect_labelled(text) {
            Detection::Parsed(result) => Detection::Parsed(result),
            Detection::NotApplicable(text_err) => Detection::NotApplicable(json_err.or(text_err)),
        },
    }
}

fn looks_like_payload(obj: &Map<String, Value>) -> bool {
    ["completeness", "status", "findings", "gaps"]
        .iter()
        .any(|key| obj.contains_key(*key))
}

/// Text of a message envelope: a `content`/`text` array of parts, a `text`
/// string, or a `result` string.
fn envelope_text(obj: &Map<String, Value>) -> Option<String> {
    for key in ["content", "text"] {
        match obj.get(key) {
            Some(Value::Array(parts)) => {
                let joined: Vec<&str> = parts
                    .iter()
                    .filter_map(|part| match part {
                        Value::String(s) => Some(s.as_str()),
                        Value::Object(o) => o.get("text").and_then(Value::as_str),
                        _ => None,
                    })
                    .collect();
                if !joined.is_empty() {
                    return Some(joined.join("\n"));
                }
            }
            Some(Value::String(s)) => return Some(s.clone()),
            _ => {}
        }
    }
    obj.get("result").and_then(Value::as_str).map(str::to_string)
}

fn payload_from_object(obj: &Map<String, Value>) -> Detection {
    match build_result(obj) {
        Ok(result) => Detection::Parsed(result),
        Err(err) => Detection::NotApplicable(Some(err)),
    }
}

fn build_result(obj: &Map<String, Value>) -> Result<ValidationResult, ParseError> {
    let completeness = match obj.get("completeness") {
        None | Some(Value::Null) => return Err(ParseError::missing("completeness")),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| ParseError::invalid("completeness", "expected a number"))?,
    };

    let status = match obj.get("status") {
        None | Some(Value::Null) => return Err(ParseError::missing("status")),
        Some(Value::String(s)) => ValidationStatus::from_wire(s.trim()).ok_or_else(|| {
            ParseError::invalid("status", format!("expected PASS or FAIL, got '{s}'"))
        })?,
        Some(_) => return Err(ParseError::invalid("status", "expected a string")),
    };

    let (gaps_key, gaps_value) = match (obj.get("findings"), obj.get("gaps")) {
        (Some(findings), _) => ("findings", findings),
        (None, Some(gaps)) => ("gaps", gaps),
        (None, None) => return Err(ParseError::missing("findings")),
    };
    let gaps = gaps_value
        .as_array()
        .ok_or_else(|| ParseError::invalid(gaps_key, "expected a list"))?
        .iter()
        .filter_map(flatten_finding)
        .collect();

    let recommendations = match obj.get("recommendations") {
        None | Some(Value::Null) => return Err(ParseError::missing("recommendations")),
        Some(Value::Array(items)) => items.iter().filter_map(item_text).collect(),
        Some(_) => return Err(ParseError::invalid("recommendations", "expected a list")),
    };

    Ok(ValidationResult::new(
        completeness.round() as i64,
        status,
        gaps,
        recommendations,
    ))
}

/// One gap string from a finding: objects are flattened into
/// `Requirement: … | Gap: … | Original: … | Proposed: …`.
fn flatten_finding(value: &Value) -> Option<String> {
    let Value::Object(finding) = value else {
        return item_text(value);
    };

    let field = |keys: &[&str]| {
        keys.iter()
            .filter_map(|k| finding.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
    };

    let parts: Vec<String> = [
        ("Requirement", field(&["requirement", "requirement_text"])),
        ("Gap", field(&["gap", "gap_description", "description", "issue"])),
        ("Original", field(&["original", "original_snippet", "original_text"])),
        ("Proposed", field(&["proposed", "proposed_change", "proposed_text", "suggestion"])),
    ]
    .into_iter()
    .filter_map(|(label, text)| text.map(|t| format!("{label}: {t}")))
    .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

fn item_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Null | Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Gaps,
    Recommendations,
}

/// The labelled text block:
///
/// ```text
/// COMPLETENESS: 85
/// STATUS: FAIL
/// GAPS:
/// - missing retry
/// RECOMMENDATIONS:
/// - add retry
/// ```
pub fn detect_labelled(output: &str) -> Detection {
    let mut completeness: Option<Result<i64, ParseError>> = None;
    let mut status: Option<Result<ValidationStatus, ParseError>> = None;
    let mut gaps = Vec::new();
    let mut recommendations = Vec::new();
    let mut section = Section::None;

    for line in output.lines() {
        if let Some(cap) = LABEL_LINE.captures(line) {
            let label = cap[1].to_ascii_uppercase();
            let rest = cap[2].trim();
            section = Section::None;
            match label.as_str() {
                "COMPLETENESS" if completeness.is_none() => {
                    completeness = Some(
                        LEADING_NUMBER
                            .captures(rest)
                            .and_then(|c| c[1].parse::<i64>().ok())
                            .ok_or_else(|| {
                                ParseError::invalid("completeness", format!("expected a number, got '{rest}'"))
                            }),
                    );
                }
                "STATUS" if status.is_none() => {
                    let token = rest
                        .split_whitespace()
                        .next()
                        .unwrap_or("")
                        .trim_matches(|c: char| matches!(c, '*' | '_' | '`' | '.' | ','));
                    status = Some(ValidationStatus::from_wire(token).ok_or_else(|| {
                        ParseError::invalid("status", format!("expected PASS or FAIL, got '{token}'"))
                    }));
                }
                "GAPS" => {
                    section = Section::Gaps;
                    push_inline(&mut gaps, rest);
                }
                "RECOMMENDATIONS" => {
                    section = Section::Recommendations;
                    push_inline(&mut recommendations, rest);
                }
                _ => {}
            }
            continue;
        }

        let target = match section {
            Section::Gaps => &mut gaps,
            Section::Recommendations => &mut recommendations,
            Section::None => continue,
        };
        if let Some(cap) = BULLET.captures(line) {
            push_inline(target, &cap[1]);
        } else if line.trim().is_empty() {
            continue;
        } else if let Some(last) = target.last_mut() {
            // Wrapped continuation of the previous bullet
            last.push(' ');
            last.push_str(line.trim());
        }
    }

    match (completeness, status) {
        (None, None) => Detection::NotApplicable(None),
        (Some(Err(e)), _) | (_, Some(Err(e))) => Detection::NotApplicable(Some(e)),
        (None, Some(_)) => Detection::NotApplicable(Some(ParseError::missing("completeness"))),
        (Some(_), None) => Detection::NotApplicable(Some(ParseError::missing("status"))),
        (Some(Ok(completeness)), Some(Ok(status))) => Detection::Parsed(ValidationResult::new(
            completeness,
            status,
            gaps,
            recommendations,
        )),
    }
}

fn push_inline(target: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("none") || text == "-" || text.eq_ignore_ascii_case("n/a") {
        return;
    }
    target.push(text.to_string());
}
