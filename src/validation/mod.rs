//! Validator verdicts: the parsed result type, the output parser and the
//! prompts that ask for them.

pub mod parser;
pub mod prompt;

pub use parser::parse_validation_output;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationStatus {
    Pass,
    Fail,
}

impl ValidationStatus {
    /// Exact-match parse of the wire value.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "PASS" => Some(ValidationStatus::Pass),
            "FAIL" => Some(ValidationStatus::Fail),
            _ => None,
        }
    }

    pub fn is_pass(self) -> bool {
        self == ValidationStatus::Pass
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStatus::Pass => write!(f, "PASS"),
            ValidationStatus::Fail => write!(f, "FAIL"),
        }
    }
}

/// A validator's structured verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Always within 0..=100
    pub completeness: u8,
    pub status: ValidationStatus,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl ValidationResult {
    pub fn new(
        completeness: i64,
        status: ValidationStatus,
        gaps: Vec<String>,
        recommendations: Vec<String>,
    ) -> Self {
        Self {
            completeness: completeness.clamp(0, 100) as u8,
            status,
            gaps,
            recommendations,
        }
    }

    /// FAIL at zero completeness, recording why the output could not be read.
    pub fn failed_parse(err: &ParseError) -> Self {
        Self {
            completeness: 0,
            status: ValidationStatus::Fail,
            gaps: vec![format!("Validator output could not be parsed: {err}")],
            recommendations: Vec::new(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status.is_pass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_values_are_exact() {
        assert_eq!(ValidationStatus::from_wire("PASS"), Some(ValidationStatus::Pass));
        assert_eq!(ValidationStatus::from_wire("FAIL"), Some(ValidationStatus::Fail));
        assert_eq!(ValidationStatus::from_wire("pass"), None);
        assert_eq!(ValidationStatus::from_wire("PASSED"), None);
        assert_eq!(serde_json::to_string(&ValidationStatus::Pass).unwrap(), "\"PASS\"");
    }

    #[test]
    fn test_completeness_is_clamped() {
        let high = ValidationResult::new(140, ValidationStatus::Pass, vec![], vec![]);
        assert_eq!(high.completeness, 100);
        let low = ValidationResult::new(-3, ValidationStatus::Fail, vec![], vec![]);
        assert_eq!(low.completeness, 0);
    }

    #[test]
    fn test_failed_parse_names_the_problem() {
        let result = ValidationResult::failed_parse(&ParseError::missing("status"));
        assert_eq!(result.completeness, 0);
        assert_eq!(result.status, ValidationStatus::Fail);
        assert!(result.gaps[0].contains("`status`"));
    }
}
