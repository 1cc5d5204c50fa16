//! Role-aware agent execution: lead retry, rate-limit detection and the
//! validator permission fallback.
//!
//! The orchestrator talks to agents only through [`AgentRunner`], so tests can
//! substitute scripted runners for real processes.

use std::path::Path;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::process::{ProcessOutcome, run_process, sandbox_wrap};
use super::{Invocation, Role, ToolId, ToolOverrides};
use crate::config::SandboxSettings;
use crate::context::RunContext;
use crate::errors::ToolError;
use crate::util::excerpt;

/// Characters of output carried in error messages.
const ERROR_EXCERPT_CHARS: usize = 500;

static RATE_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(rate[ -]?limit(ed)?|too many requests|\b429\b|quota (exceeded|exhausted)|usage limit|limit reached|resource[_ ]exhausted)",
    )
    .expect("valid regex")
});

static PERMISSION_REJECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(unknown (option|argument|flag)|unrecognized (option|argument)|unexpected argument|invalid value for|unknown command|not a valid (option|value))",
    )
    .expect("valid regex")
});

/// Normalized result of one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Stdout and stderr combined
    pub output: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ToolOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    pub fn is_empty(&self) -> bool {
        self.output.trim().is_empty()
    }
}

impl From<ProcessOutcome> for ToolOutput {
    fn from(outcome: ProcessOutcome) -> Self {
        Self {
            output: outcome.combined_output(),
            exit_code: outcome.exit_code,
            duration_ms: outcome.duration.as_millis() as u64,
            timed_out: outcome.timed_out,
        }
    }
}

/// Validator result plus whether the read-only profile had to be abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorOutput {
    pub result: ToolOutput,
    pub used_full_permissions: bool,
}

/// Runs agents in a role. Implemented by [`ToolExecutor`] for real processes.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run `tool` as lead with write permissions.
    ///
    /// Returns `RateLimited` instead of retrying when the agent reports a
    /// rate limit, and `LeadFailed` when a retry also fails with output.
    async fn run_lead(
        &self,
        tool: ToolId,
        prompt: &str,
        dir: &Path,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError>;

    /// Run `tool` as a read-only validator.
    async fn run_validator(
        &self,
        tool: ToolId,
        prompt: &str,
        dir: &Path,
        timeout: Duration,
    ) -> Result<ValidatorOutput, ToolError>;
}

/// Whether `output` looks like a provider rate-limit response.
///
/// Only failed invocations are scanned. A successful exit is real work even
/// when it talks about rate limiting.
pub fn is_rate_limited(output: &ToolOutput) -> bool {
    !output.succeeded() && RATE_LIMIT.is_match(&output.output)
}

/// Whether `output` shows the tool rejecting its command-line flags.
pub fn is_permission_rejection(output: &ToolOutput) -> bool {
    !output.succeeded() && PERMISSION_REJECTION.is_match(&output.output)
}

/// Spawns real agent processes.
pub struct ToolExecutor {
    ctx: Arc<RunContext>,
    overrides: ToolOverrides,
    sandbox: SandboxSettings,
}

impl ToolExecutor {
    pub fn new(ctx: Arc<RunContext>, overrides: ToolOverrides, sandbox: SandboxSettings) -> Self {
        Self {
            ctx,
            overrides,
            sandbox,
        }
    }

    async fn invoke(
        &self,
        tool: ToolId,
        role: Role,
        full_permissions: bool,
        prompt: &str,
        dir: &Path,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        if !self.ctx.throttle().await {
            return Err(ToolError::Interrupted { tool });
        }

        let mut invocation = Invocation::resolve(tool, role, full_permissions, &self.overrides);
        if self.sandbox.enabled {
            invocation = sandbox_wrap(&invocation, &self.sandbox, dir);
        }
        tracing::debug!(tool = %tool, role = %role, args = ?invocation.args, "resolved invocation");

        let outcome = run_process(&self.ctx, tool, &invocation, prompt, dir, timeout).await?;
        Ok(outcome.into())
    }
}

#[async_trait]
impl AgentRunner for ToolExecutor {
    async fn run_lead(
        &self,
        tool: ToolId,
        prompt: &str,
        dir: &Path,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let first = self
            .invoke(tool, Role::Lead, false, prompt, dir, timeout)
            .await?;
        if is_rate_limited(&first) {
            return Err(ToolError::RateLimited {
                tool,
                excerpt: excerpt(&first.output, ERROR_EXCERPT_CHARS),
            });
        }
        if first.succeeded() {
            return Ok(first);
        }

        tracing::warn!(
            tool = %tool,
            exit_code = first.exit_code,
            timed_out = first.timed_out,
            "lead failed, retrying once"
        );
        let second = self
            .invoke(tool, Role::Lead, false, prompt, dir, timeout)
            .await?;
        if is_rate_limited(&second) {
            return Err(ToolError::RateLimited {
                tool,
                excerpt: excerpt(&second.output, ERROR_EXCERPT_CHARS),
            });
        }
        if !second.succeeded() && !second.is_empty() {
            return Err(ToolError::LeadFailed {
                tool,
                exit_code: second.exit_code,
                excerpt: excerpt(&second.output, ERROR_EXCERPT_CHARS),
            });
        }
        Ok(second)
    }

    async fn run_validator(
        &self,
        tool: ToolId,
        prompt: &str,
        dir: &Path,
        timeout: Duration,
    ) -> Result<ValidatorOutput, ToolError> {
        let result = self
            .invoke(tool, Role::Validator, false, prompt, dir, timeout)
            .await?;
        if !is_permission_rejection(&result) {
            return Ok(ValidatorOutput {
                result,
                used_full_permissions: false,
            });
        }

        tracing::warn!(
            tool = %tool,
            "validator rejected read-only flags, retrying with full permissions"
        );
        let result = self
            .invoke(tool, Role::Validator, true, prompt, dir, timeout)
            .await?;
        Ok(ValidatorOutput {
            result,
            used_full_permissions: true,
        })
    }
}
