//! The durable session aggregate.
//!
//! A [`Session`] owns its spec entries and their cycles outright. It is
//! persisted as one complete snapshot after every mutation (see
//! [`store::SessionStore`]), so a resumed run sees exactly the last applied
//! state.

pub mod store;

pub use store::SessionStore;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::SessionConfig;
use crate::errors::RoleError;
use crate::spec::{SpecMeta, SpecRecord};
use crate::tools::{RoleAssignment, ToolId};
use crate::validation::ValidationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Partial,
    Failed,
    Abandoned,
}

impl SessionStatus {
    /// Whether a linked session in this status can be resumed.
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            SessionStatus::Pending
                | SessionStatus::InProgress
                | SessionStatus::Partial
                | SessionStatus::Failed
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Partial => "partial",
            SessionStatus::Failed => "failed",
            SessionStatus::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl SpecStatus {
    /// Forward-only transitions. Staying in place is allowed.
    pub fn can_transition_to(self, next: SpecStatus) -> bool {
        use SpecStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, InProgress)
                    | (Pending, Skipped)
                    | (InProgress, Completed)
                    | (InProgress, Failed)
                    | (InProgress, Skipped)
            )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SpecStatus::Completed | SpecStatus::Failed | SpecStatus::Skipped
        )
    }
}

impl fmt::Display for SpecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpecStatus::Pending => "pending",
            SpecStatus::InProgress => "in_progress",
            SpecStatus::Completed => "completed",
            SpecStatus::Failed => "failed",
            SpecStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadExecution {
    pub tool: ToolId,
    pub prompt: String,
    pub output: String,
    pub duration_ms: u64,
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub tool: ToolId,
    pub prompt: String,
    pub output: String,
    pub result: ValidationResult,
    pub duration_ms: u64,
    pub exit_code: i32,
    /// The read-only profile was rejected and the validator ran with lead permissions
    #[serde(default)]
    pub used_full_permissions: bool,
    /// The first output was unparseable and a format-recovery prompt was sent
    #[serde(default)]
    pub format_retried: bool,
}

/// One lead-then-validate round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    /// 1-based, strictly increasing within a spec
    pub number: u32,
    pub spec_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub lead: LeadExecution,
    pub validations: Vec<Validation>,
    pub consensus_reached: bool,
}

/// Validation-only pass run before the first lead invocation of a spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightRecord {
    pub ran_at: DateTime<Utc>,
    pub validations: Vec<Validation>,
    pub consensus_reached: bool,
}

impl PreflightRecord {
    /// Lowest completeness reported, or 0 when nothing ran.
    pub fn min_completeness(&self) -> u8 {
        self.validations
            .iter()
            .map(|v| v.result.completeness)
            .min()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecEntry {
    pub file: String,
    pub path: PathBuf,
    pub meta: SpecMeta,
    pub status: SpecStatus,
    #[serde(default)]
    pub cycles: Vec<Cycle>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub context_only: bool,
    /// Gaps carried into the next lead prompt
    #[serde(default)]
    pub pending_feedback: Vec<String>,
    #[serde(default)]
    pub preflight: Option<PreflightRecord>,
}

impl SpecEntry {
    pub fn from_record(record: &SpecRecord) -> Self {
        Self {
            file: record.file.clone(),
            path: record.path.clone(),
            meta: record.meta.clone(),
            status: SpecStatus::Pending,
            cycles: Vec::new(),
            started_at: None,
            completed_at: None,
            last_error: None,
            context_only: record.context_only,
            pending_feedback: Vec::new(),
            preflight: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Move to `next`, refusing backward transitions.
    pub fn transition(&mut self, next: SpecStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            bail!(
                "Invalid status transition for spec '{}': {} -> {}",
                self.meta.id,
                self.status,
                next
            );
        }
        if self.context_only && matches!(next, SpecStatus::Completed | SpecStatus::Failed) {
            bail!(
                "Context-only spec '{}' can only be skipped",
                self.meta.id
            );
        }
        let now = Utc::now();
        if next == SpecStatus::InProgress && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() && self.status != next {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Reopen a failed spec whose lifetime budget is not yet spent.
    ///
    /// The single backward edge in the state machine, taken only on resume.
    pub fn reopen(&mut self, max_iterations: u32) -> bool {
        if self.status != SpecStatus::Failed || self.cycles_used() >= max_iterations {
            return false;
        }
        self.status = SpecStatus::InProgress;
        self.completed_at = None;
        true
    }

    pub fn cycles_used(&self) -> u32 {
        self.cycles.len() as u32
    }

    pub fn next_cycle_number(&self) -> u32 {
        self.cycles_used() + 1
    }

    pub fn last_cycle(&self) -> Option<&Cycle> {
        self.cycles.last()
    }

    /// Whether any recorded cycle reached consensus.
    pub fn has_consensus(&self) -> bool {
        self.cycles.iter().any(|c| c.consensus_reached)
            || self.preflight.as_ref().is_some_and(|p| p.consensus_reached)
    }

    /// Spec file location, resolved against the session's working directory.
    pub fn resolved_path(&self, working_dir: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            working_dir.join(&self.path)
        }
    }
}

/// The durable run record for one working directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub working_dir: PathBuf,
    pub lead: ToolId,
    pub validators: Vec<ToolId>,
    pub config: SessionConfig,
    pub status: SessionStatus,
    /// Index of the spec being worked on; equals `specs.len()` when finished
    pub current_spec_index: usize,
    pub specs: Vec<SpecEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        working_dir: &Path,
        specs: &[SpecRecord],
        roles: RoleAssignment,
        config: SessionConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            working_dir: working_dir.to_path_buf(),
            lead: roles.lead,
            validators: roles.validators,
            config,
            status: SessionStatus::Pending,
            current_spec_index: 0,
            specs: specs.iter().map(SpecEntry::from_record).collect(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Current role assignment, re-checked against the invariants.
    pub fn roles(&self) -> Result<RoleAssignment, RoleError> {
        RoleAssignment::new(self.lead, self.validators.clone())
    }

    /// Replace the role assignment. Only checked assignments can be applied.
    pub fn apply_roles(&mut self, roles: RoleAssignment) {
        self.lead = roles.lead;
        self.validators = roles.validators;
    }

    pub fn is_finished(&self) -> bool {
        self.current_spec_index >= self.specs.len()
    }

    /// Reopen failed specs with budget left and rewind to the first of them.
    ///
    /// Returns how many specs were reopened.
    pub fn reopen_failed(&mut self) -> usize {
        let max = self.config.max_iterations;
        let mut first = None;
        let mut count = 0;
        for (i, entry) in self.specs.iter_mut().enumerate() {
            if entry.reopen(max) {
                first.get_or_insert(i);
                count += 1;
            }
        }
        if let Some(first) = first {
            self.current_spec_index = self.current_spec_index.min(first);
        }
        count
    }

    /// Status once every spec has been processed.
    pub fn final_status(&self) -> SessionStatus {
        let all_ok = self
            .specs
            .iter()
            .all(|s| matches!(s.status, SpecStatus::Completed | SpecStatus::Skipped));
        if all_ok {
            SessionStatus::Completed
        } else {
            SessionStatus::Partial
        }
    }

    pub fn count_by_status(&self, status: SpecStatus) -> usize {
        self.specs.iter().filter(|s| s.status == status).count()
    }

    pub fn total_cycles(&self) -> usize {
        self.specs.iter().map(|s| s.cycles.len()).sum()
    }

    /// Structural checks applied after loading a snapshot.
    pub fn check_invariants(&self) -> Result<()> {
        self.roles()?;
        if self.current_spec_index > self.specs.len() {
            bail!(
                "Session {} has spec index {} beyond {} specs",
                self.id,
                self.current_spec_index,
                self.specs.len()
            );
        }
        for spec in &self.specs {
            for (i, cycle) in spec.cycles.iter().enumerate() {
                if cycle.number as usize != i + 1 {
                    bail!(
                        "Spec '{}' has cycle {} at position {}",
                        spec.meta.id,
                        cycle.number,
                        i + 1
                    );
                }
            }
        }
        Ok(())
    }
}
