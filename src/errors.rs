//! Typed error hierarchy for the quorum orchestrator.
//!
//! One enum per subsystem:
//! - `ToolError`: spawning and supervising a single agent process
//! - `ParseError`: turning validator output into a verdict
//! - `OrderError`: spec dependency ordering
//! - `RoleError`: lead/validator assignment invariants
//! - `OrchestratorError`: run-level failures surfaced to the CLI

use crate::tools::ToolId;
use thiserror::Error;

/// Errors from a single agent invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to spawn {tool} process: {source}")]
    SpawnFailed {
        tool: ToolId,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write prompt to {tool} stdin: {source}")]
    StdinFailed {
        tool: ToolId,
        #[source]
        source: std::io::Error,
    },

    #[error("Interrupted before {tool} finished")]
    Interrupted { tool: ToolId },

    #[error("{tool} is rate limited: {excerpt}")]
    RateLimited { tool: ToolId, excerpt: String },

    #[error("{tool} lead failed twice (exit {exit_code}): {excerpt}")]
    LeadFailed {
        tool: ToolId,
        exit_code: i32,
        excerpt: String,
    },
}

impl ToolError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ToolError::Interrupted { .. })
    }
}

/// Errors from validator output parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Validator output is empty")]
    EmptyOutput,

    #[error("Validator payload is missing required field `{field}`")]
    MissingField { field: String },

    #[error("Validator payload field `{field}` is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("No recognised validation format in output")]
    NoRecognizedFormat,
}

impl ParseError {
    pub fn missing(field: &str) -> Self {
        ParseError::MissingField {
            field: field.to_string(),
        }
    }

    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ParseError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors from spec dependency ordering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("Duplicate spec id '{id}'")]
    DuplicateId { id: String },

    #[error("Spec '{spec}' depends on unknown spec '{dependency}'")]
    UnknownDependency { spec: String, dependency: String },

    #[error("Dependency cycle detected among specs: {}", ids.join(", "))]
    Cycle { ids: Vec<String> },
}

/// Violations of the lead/validator assignment invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleError {
    #[error("Lead {lead} cannot also be a validator")]
    LeadIsValidator { lead: ToolId },

    #[error("At least one validator is required")]
    NoValidators,

    #[error("Tool {tool} is not available")]
    Unavailable { tool: ToolId },
}

/// Run-level errors from the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("No agent tools detected on PATH")]
    NoToolsDetected,

    #[error("At least two agent tools are required for lead/validator roles, found {found}")]
    InsufficientTools { found: usize },

    #[error("Nothing to resume in {dir}")]
    NothingToResume { dir: std::path::PathBuf },

    #[error("Lead {tool} produced empty output for spec '{spec}'")]
    LeadEmptyOutput { tool: ToolId, spec: String },

    #[error("Rate-limit fallback exhausted after trying: {}", tried.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    FallbackExhausted { tried: Vec<ToolId> },

    #[error("Run interrupted")]
    Interrupted,

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Role(#[from] RoleError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
