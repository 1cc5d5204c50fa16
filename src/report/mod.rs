//! Transcript and summary artifacts.
//!
//! Layout under `.quorum/reports/<session>/`:
//! - `<spec>/cycle-001-lead-claude.md`
//! - `<spec>/cycle-001-validator-codex.md`
//! - `<spec>/preflight-validator-codex.md`
//! - `summary.json`

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::QUORUM_DIR;
use crate::session::{
    Cycle, LeadExecution, PreflightRecord, Session, SessionStatus, SpecStatus, Validation,
};
use crate::tools::ToolId;
use crate::util::{sanitize_component, tail};

const OUTPUT_HEADING: &str = "## Output\n";

pub struct ReportWriter {
    session_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(working_dir: &Path, session_id: &str) -> Self {
        Self {
            session_dir: reports_root(working_dir).join(sanitize_component(session_id)),
        }
    }

    fn spec_dir(&self, spec_id: &str) -> PathBuf {
        self.session_dir.join(sanitize_component(spec_id))
    }

    /// Write the lead and validator transcripts of a finished cycle.
    pub fn write_cycle(&self, cycle: &Cycle) -> Result<Vec<PathBuf>> {
        let label = format!("cycle-{:03}", cycle.number);
        let mut written = vec![self.write_lead(&cycle.spec_id, &label, &cycle.lead)?];
        for validation in &cycle.validations {
            written.push(self.write_validation(&cycle.spec_id, &label, validation)?);
        }
        Ok(written)
    }

    pub fn write_preflight(&self, spec_id: &str, record: &PreflightRecord) -> Result<Vec<PathBuf>> {
        record
            .validations
            .iter()
            .map(|v| self.write_validation(spec_id, "preflight", v))
            .collect()
    }

    fn write_lead(&self, spec_id: &str, label: &str, lead: &LeadExecution) -> Result<PathBuf> {
        let body = format!(
            "# {spec_id} {label}: lead {tool}\n\n\
             - Exit code: {exit}\n\
             - Duration: {ms} ms\n\n\
             ## Prompt\n\n{prompt}\n\n{OUTPUT_HEADING}\n{output}\n",
            tool = lead.tool,
            exit = lead.exit_code,
            ms = lead.duration_ms,
            prompt = lead.prompt.trim(),
            output = lead.output.trim(),
        );
        self.write_file(spec_id, &format!("{label}-lead-{}.md", lead.tool), &body)
    }

    fn write_validation(&self, spec_id: &str, label: &str, v: &Validation) -> Result<PathBuf> {
        let list = |items: &[String]| {
            if items.is_empty() {
                "- none\n".to_string()
            } else {
                items.iter().map(|i| format!("- {i}\n")).collect()
            }
        };
        let mut notes = String::new();
        if v.used_full_permissions {
            notes.push_str("- Ran with full permissions after rejecting read-only flags\n");
        }
        if v.format_retried {
            notes.push_str("- Output needed a format-recovery retry\n");
        }

        let body = format!(
            "# {spec_id} {label}: validator {tool}\n\n\
             - Status: {status}\n\
             - Completeness: {completeness}%\n\
             - Exit code: {exit}\n\
             - Duration: {ms} ms\n\
             {notes}\n\
             ## Gaps\n\n{gaps}\n\
             ## Recommendations\n\n{recs}\n\
             ## Prompt\n\n{prompt}\n\n{OUTPUT_HEADING}\n{output}\n",
            tool = v.tool,
            status = v.result.status,
            completeness = v.result.completeness,
            exit = v.exit_code,
            ms = v.duration_ms,
            gaps = list(&v.result.gaps),
            recs = list(&v.result.recommendations),
            prompt = v.prompt.trim(),
            output = v.output.trim(),
        );
        self.write_file(spec_id, &format!("{label}-validator-{}.md", v.tool), &body)
    }

    fn write_file(&self, spec_id: &str, name: &str, body: &str) -> Result<PathBuf> {
        let dir = self.spec_dir(spec_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;
        let path = dir.join(name);
        fs::write(&path, body)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(path)
    }

    /// Output tails of the most recent validator transcripts for `spec_id`,
    /// newest first.
    pub fn recent_excerpts(&self, spec_id: &str, max_files: usize, max_chars: usize) -> Vec<Excerpt> {
        let dir = self.spec_dir(spec_id);
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with("cycle-") && name.contains("-validator-"))
            .collect();
        names.sort();
        names.reverse();

        names
            .into_iter()
            .take(max_files)
            .filter_map(|name| {
                let content = fs::read_to_string(dir.join(&name)).ok()?;
                let output = content
                    .split_once(OUTPUT_HEADING)
                    .map(|(_, rest)| rest)
                    .unwrap_or(&content);
                Some(Excerpt {
                    source: name,
                    text: tail(output, max_chars),
                })
            })
            .collect()
    }

    /// Write `summary.json` for the session.
    pub fn write_summary(&self, session: &Session) -> Result<PathBuf> {
        fs::create_dir_all(&self.session_dir).with_context(|| {
            format!("Failed to create report directory: {}", self.session_dir.display())
        })?;
        let summary = SessionSummary::from_session(session);
        let json =
            serde_json::to_string_pretty(&summary).context("Failed to serialize session summary")?;
        let path = self.session_dir.join("summary.json");
        fs::write(&path, json)
            .with_context(|| format!("Failed to write summary: {}", path.display()))?;
        Ok(path)
    }
}

/// `.quorum/reports` under the working directory.
pub fn reports_root(working_dir: &Path) -> PathBuf {
    working_dir.join(QUORUM_DIR).join("reports")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Excerpt {
    pub source: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub lead: ToolId,
    pub validators: Vec<ToolId>,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_cycles: usize,
    pub specs: Vec<SpecSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecSummary {
    pub id: String,
    pub name: String,
    pub status: SpecStatus,
    pub cycles: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_completeness: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SessionSummary {
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            status: session.status,
            lead: session.lead,
            validators: session.validators.clone(),
            created_at: session.created_at,
            finished_at: Utc::now(),
            total_cycles: session.total_cycles(),
            specs: session
                .specs
                .iter()
                .map(|s| SpecSummary {
                    id: s.meta.id.clone(),
                    name: s.meta.name.clone(),
                    status: s.status,
                    cycles: s.cycles.len(),
                    final_completeness: s
                        .last_cycle()
                        .and_then(|c| c.validations.iter().map(|v| v.result.completeness).min()),
                    last_error: s.last_error.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{cycle, session};

    #[test]
    fn test_writes_cycle_transcripts_with_keyed_names() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path(), "abc123");
        let written = writer.write_cycle(&cycle("auth", 2, false)).unwrap();

        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["cycle-002-lead-claude.md", "cycle-002-validator-codex.md"]
        );
        assert!(written[0].starts_with(dir.path().join(".quorum/reports/abc123/auth")));

        let validator = fs::read_to_string(&written[1]).unwrap();
        assert!(validator.contains("Status: FAIL"));
        assert!(validator.contains("Completeness: 50%"));
    }

    #[test]
    fn test_recent_excerpts_are_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path(), "s");
        for n in 1..=3 {
            let mut c = cycle("spec", n, false);
            c.validations[0].output = format!("verdict from cycle {n}");
            writer.write_cycle(&c).unwrap();
        }

        let excerpts = writer.recent_excerpts("spec", 2, 200);
        assert_eq!(excerpts.len(), 2);
        assert_eq!(excerpts[0].source, "cycle-003-validator-codex.md");
        assert_eq!(excerpts[0].text, "verdict from cycle 3");
        assert_eq!(excerpts[1].text, "verdict from cycle 2");
    }

    #[test]
    fn test_recent_excerpts_for_unknown_spec_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path(), "s");
        assert!(writer.recent_excerpts("nothing", 3, 100).is_empty());
    }

    #[test]
    fn test_summary_lists_each_spec() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(&["a", "b"]);
        s.specs[0].cycles.push(cycle("a", 1, true));
        s.specs[0].status = SpecStatus::Completed;
        let writer = ReportWriter::new(dir.path(), &s.id);
        let path = writer.write_summary(&s).unwrap();

        let summary: SessionSummary =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(summary.specs.len(), 2);
        assert_eq!(summary.specs[0].cycles, 1);
        assert_eq!(summary.specs[0].final_completeness, Some(50));
        assert_eq!(summary.total_cycles, 1);
    }
}
