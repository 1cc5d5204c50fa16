//! Agent tools: identifiers, invocation profiles, discovery and role assignment.
//!
//! Every supported agent is a variant of [`ToolId`]. Its command line comes from
//! a static [`ToolProfile`] table; adding an agent means adding one variant and
//! one table row.

pub mod executor;
pub mod process;
pub mod registry;
pub mod roles;

pub use executor::{AgentRunner, ToolExecutor, ToolOutput, ValidatorOutput};
pub use registry::{ToolInfo, ToolRegistry};
pub use roles::RoleAssignment;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A known external coding agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolId {
    Claude,
    Codex,
    Gemini,
}

impl ToolId {
    /// All tools in fallback priority order.
    pub const ALL: [ToolId; 3] = [ToolId::Claude, ToolId::Codex, ToolId::Gemini];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolId::Claude => "claude",
            ToolId::Codex => "codex",
            ToolId::Gemini => "gemini",
        }
    }

    /// Static invocation profile for this tool.
    pub fn profile(self) -> &'static ToolProfile {
        match self {
            ToolId::Claude => &PROFILES[0],
            ToolId::Codex => &PROFILES[1],
            ToolId::Gemini => &PROFILES[2],
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "claude" => Ok(ToolId::Claude),
            "codex" => Ok(ToolId::Codex),
            "gemini" => Ok(ToolId::Gemini),
            _ => anyhow::bail!(
                "Unknown tool '{}'. Valid values: claude, codex, gemini",
                s
            ),
        }
    }
}

/// Which side of a cycle an invocation serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Lead,
    Validator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Lead => write!(f, "lead"),
            Role::Validator => write!(f, "validator"),
        }
    }
}

/// Command line template for one tool.
///
/// Lead arguments grant write access to the working directory; validator
/// arguments restrict the agent to reading. The prompt is always piped on stdin.
#[derive(Debug)]
pub struct ToolProfile {
    pub id: ToolId,
    pub command: &'static str,
    pub lead_args: &'static [&'static str],
    pub validator_args: &'static [&'static str],
    pub version_args: &'static [&'static str],
}

static PROFILES: [ToolProfile; 3] = [
    ToolProfile {
        id: ToolId::Claude,
        command: "claude",
        lead_args: &["--print", "--dangerously-skip-permissions"],
        validator_args: &["--print", "--allowedTools", "Read,Glob,Grep"],
        version_args: &["--version"],
    },
    ToolProfile {
        id: ToolId::Codex,
        command: "codex",
        lead_args: &["exec", "--dangerously-bypass-approvals-and-sandbox", "-"],
        validator_args: &["exec", "--sandbox", "read-only", "-"],
        version_args: &["--version"],
    },
    ToolProfile {
        id: ToolId::Gemini,
        command: "gemini",
        lead_args: &["--yolo"],
        validator_args: &["--approval-mode", "default"],
        version_args: &["--version"],
    },
];

/// Per-tool overrides from `[tools.<id>]` in quorum.toml.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOverride {
    /// Replacement executable (path or name on PATH)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Replacement lead arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_args: Option<Vec<String>>,
    /// Replacement validator arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator_args: Option<Vec<String>>,
}

pub type ToolOverrides = BTreeMap<ToolId, ToolOverride>;

/// A resolved command line, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Resolve the command line for `tool` acting as `role`.
    ///
    /// `full_permissions` selects the lead argument set regardless of role; it is
    /// used when a validator rejects its read-only flags.
    pub fn resolve(
        tool: ToolId,
        role: Role,
        full_permissions: bool,
        overrides: &ToolOverrides,
    ) -> Self {
        let profile = tool.profile();
        let custom = overrides.get(&tool);

        let program = custom
            .and_then(|o| o.command.clone())
            .unwrap_or_else(|| profile.command.to_string());

        let lead_args = || {
            custom
                .and_then(|o| o.lead_args.clone())
                .unwrap_or_else(|| to_owned_args(profile.lead_args))
        };

        let args = match (role, full_permissions) {
            (Role::Lead, _) | (Role::Validator, true) => lead_args(),
            (Role::Validator, false) => custom
                .and_then(|o| o.validator_args.clone())
                .unwrap_or_else(|| to_owned_args(profile.validator_args)),
        };

        Self { program, args }
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

fn to_owned_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}
