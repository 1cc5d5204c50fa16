//! The per-spec cycle loop.
//!
//! For each spec from the session's current index: skip context-only specs,
//! skip specs whose lifetime budget is spent, optionally run a preflight
//! validation, then run lead → validators → consensus cycles until consensus
//! or the allotment for this invocation runs out. The session is persisted
//! after every state change. Every exit path goes through
//! [`CycleOrchestrator::finish`].

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;

use super::prompts::{ContextSpec, LeadPromptInput, build_lead_prompt};
use crate::config::{PromptSettings, SessionConfig};
use crate::consensus::has_consensus;
use crate::context::RunContext;
use crate::errors::{OrchestratorError, ToolError};
use crate::report::ReportWriter;
use crate::session::{
    Cycle, LeadExecution, PreflightRecord, Session, SessionStatus, SessionStore, SpecStatus,
    Validation,
};
use crate::spec::{SpecRecord, load_spec};
use crate::tools::{AgentRunner, ToolId, ToolOutput};
use crate::validation::prompt::{build_format_recovery_prompt, build_validation_prompt};
use crate::validation::{ValidationResult, ValidationStatus, parse_validation_output};

/// Validator transcripts quoted in each lead prompt.
const LEAD_PROMPT_EXCERPTS: usize = 3;
const LEAD_PROMPT_EXCERPT_CHARS: usize = 2000;

/// How a run ended when it did not hit a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every spec ended completed or skipped
    Completed,
    /// All specs processed, at least one failed
    Partial,
    /// A spec failed with stop-on-failure set
    Aborted,
    /// The interrupt was raised; state is saved for resume
    Interrupted,
}

impl RunOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Partial | RunOutcome::Aborted => 1,
            RunOutcome::Interrupted => 130,
        }
    }
}

/// What to do after a spec has been handled.
enum SpecFlow {
    Next,
    Abort,
    Interrupted,
}

enum CycleResult {
    Consensus,
    NoConsensus,
    Interrupted,
}

pub struct CycleOrchestrator {
    runner: Arc<dyn AgentRunner>,
    store: SessionStore,
    ctx: Arc<RunContext>,
    available: Vec<ToolId>,
    prompt: PromptSettings,
    rate_limit_cooldown: Duration,
}

impl CycleOrchestrator {
    pub fn new(
        runner: Arc<dyn AgentRunner>,
        store: SessionStore,
        ctx: Arc<RunContext>,
        available: Vec<ToolId>,
    ) -> Self {
        Self {
            runner,
            store,
            ctx,
            available,
            prompt: PromptSettings::default(),
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }

    pub fn with_prompt_settings(mut self, prompt: PromptSettings) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }

    /// Drive `session` until every spec is processed, a fatal error occurs,
    /// or the run is interrupted.
    pub async fn run(&self, session: &mut Session) -> Result<RunOutcome, OrchestratorError> {
        let reports = ReportWriter::new(&session.working_dir, &session.id);
        let result = self.drive(session, &reports).await;
        self.finish(session, &reports, result)
    }

    async fn drive(
        &self,
        session: &mut Session,
        reports: &ReportWriter,
    ) -> Result<RunOutcome, OrchestratorError> {
        session.status = SessionStatus::InProgress;
        self.store.persist(session)?;

        let context = load_context_specs(session);

        while !session.is_finished() {
            if self.ctx.is_interrupted() {
                return Ok(RunOutcome::Interrupted);
            }
            let idx = session.current_spec_index;
            match self.process_spec(session, idx, reports, &context).await? {
                SpecFlow::Next => {
                    session.current_spec_index += 1;
                    self.store.persist(session)?;
                }
                SpecFlow::Abort => return Ok(RunOutcome::Aborted),
                SpecFlow::Interrupted => return Ok(RunOutcome::Interrupted),
            }
        }

        Ok(match session.final_status() {
            SessionStatus::Completed => RunOutcome::Completed,
            _ => RunOutcome::Partial,
        })
    }

    /// The single teardown path: settle the session status, persist, and
    /// write the summary.
    fn finish(
        &self,
        session: &mut Session,
        reports: &ReportWriter,
        result: Result<RunOutcome, OrchestratorError>,
    ) -> Result<RunOutcome, OrchestratorError> {
        let saved = match &result {
            Ok(RunOutcome::Completed) => self.store.complete(session),
            Ok(RunOutcome::Partial) => {
                session.status = SessionStatus::Partial;
                self.store.persist(session)
            }
            Ok(RunOutcome::Aborted) => {
                session.status = SessionStatus::Failed;
                self.store.persist(session)
            }
            Ok(RunOutcome::Interrupted) | Err(OrchestratorError::Interrupted) => {
                tracing::warn!(
                    session = %session.id,
                    spec_index = session.current_spec_index,
                    "run interrupted, session saved for resume"
                );
                self.store.persist(session)
            }
            Err(OrchestratorError::LeadEmptyOutput { .. }) => {
                session.status = SessionStatus::Partial;
                self.store.persist(session)
            }
            Err(e) => {
                tracing::error!(error = %e, "run aborted");
                session.status = SessionStatus::Failed;
                self.store.persist(session)
            }
        };

        if let Err(e) = reports.write_summary(session) {
            tracing::warn!(error = %e, "failed to write session summary");
        }

        match (result, saved) {
            (Err(OrchestratorError::Interrupted), Ok(())) => Ok(RunOutcome::Interrupted),
            (Err(e), _) => Err(e),
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(e.into()),
        }
    }

    async fn process_spec(
        &self,
        session: &mut Session,
        idx: usize,
        reports: &ReportWriter,
        context: &[ContextSpec],
    ) -> Result<SpecFlow, OrchestratorError> {
        let config = session.config.clone();
        let entry = &mut session.specs[idx];
        let spec_id = entry.id().to_string();

        if entry.context_only {
            if entry.status != SpecStatus::Skipped {
                entry.transition(SpecStatus::Skipped)?;
                tracing::info!(spec = %spec_id, "context-only spec, skipping");
                self.store.persist(session)?;
            }
            return Ok(SpecFlow::Next);
        }

        if entry.status.is_terminal() {
            return Ok(SpecFlow::Next);
        }

        if entry.cycles_used() >= config.max_iterations && !entry.has_consensus() {
            let message = format!(
                "Reached the limit of {} cycle(s) without consensus; needs manual review",
                config.max_iterations
            );
            tracing::warn!(spec = %spec_id, "{}", message);
            entry.last_error = Some(message);
            entry.transition(SpecStatus::Skipped)?;
            self.store.persist(session)?;
            return Ok(self.after_failure(&config));
        }

        entry.transition(SpecStatus::InProgress)?;
        self.store.persist(session)?;

        let record = match load_spec(&session.specs[idx].resolved_path(&session.working_dir)) {
            Ok(record) => record,
            Err(e) => {
                let entry = &mut session.specs[idx];
                tracing::error!(spec = %spec_id, error = %e, "cannot read spec");
                entry.last_error = Some(format!("{e:#}"));
                entry.transition(SpecStatus::Failed)?;
                self.store.persist(session)?;
                return Ok(self.after_failure(&config));
            }
        };

        let remaining = config
            .max_iterations
            .saturating_sub(session.specs[idx].cycles_used());
        let mut allotted = config.max_iterations_per_run.min(remaining);

        let entry = &session.specs[idx];
        if config.preflight.enabled && entry.cycles.is_empty() && entry.preflight.is_none() {
            let Some(validations) = self.validate_all(session, &record).await else {
                return Ok(SpecFlow::Interrupted);
            };
            let results: Vec<ValidationResult> =
                validations.iter().map(|v| v.result.clone()).collect();
            let preflight = PreflightRecord {
                ran_at: Utc::now(),
                consensus_reached: has_consensus(&results),
                validations,
            };
            if let Err(e) = reports.write_preflight(&spec_id, &preflight) {
                tracing::warn!(error = %e, "failed to write preflight reports");
            }

            let entry = &mut session.specs[idx];
            let consensus = preflight.consensus_reached;
            let min_completeness = preflight.min_completeness();
            if consensus {
                tracing::info!(spec = %spec_id, "preflight reached consensus, no lead needed");
                entry.preflight = Some(preflight);
                entry.transition(SpecStatus::Completed)?;
                self.store.persist(session)?;
                return Ok(SpecFlow::Next);
            }
            if min_completeness >= config.preflight.threshold {
                allotted = allotted.min(config.preflight.reduced_iterations.max(1));
                entry.pending_feedback = collect_gaps(&preflight.validations);
                tracing::info!(
                    spec = %spec_id,
                    completeness = min_completeness,
                    allotted,
                    "preflight nearly complete, reducing cycles"
                );
            }
            entry.preflight = Some(preflight);
            self.store.persist(session)?;
        }

        for _ in 0..allotted {
            if self.ctx.is_interrupted() {
                return Ok(SpecFlow::Interrupted);
            }
            match self
                .run_cycle(session, idx, &record, allotted, reports, context)
                .await?
            {
                CycleResult::Consensus => return Ok(SpecFlow::Next),
                CycleResult::NoConsensus => {}
                CycleResult::Interrupted => return Ok(SpecFlow::Interrupted),
            }
        }

        let entry = &mut session.specs[idx];
        let used = entry.cycles_used();
        if used >= config.max_iterations {
            entry.last_error = Some(format!(
                "No consensus after {used} cycle(s); lifetime limit reached, needs manual review"
            ));
            entry.transition(SpecStatus::Skipped)?;
        } else {
            entry.last_error = Some(format!(
                "No consensus after {used} cycle(s); {} remaining for later runs",
                config.max_iterations - used
            ));
            entry.transition(SpecStatus::Failed)?;
        }
        tracing::warn!(spec = %spec_id, status = %entry.status, cycles = used, "spec finished without consensus");
        self.store.persist(session)?;
        Ok(self.after_failure(&config))
    }

    fn after_failure(&self, config: &SessionConfig) -> SpecFlow {
        if config.stop_on_failure {
            tracing::warn!("stop-on-failure set, aborting session");
            SpecFlow::Abort
        } else {
            SpecFlow::Next
        }
    }

    async fn run_cycle(
        &self,
        session: &mut Session,
        idx: usize,
        record: &SpecRecord,
        max_cycles: u32,
        reports: &ReportWriter,
        context: &[ContextSpec],
    ) -> Result<CycleResult, OrchestratorError> {
        let spec_id = session.specs[idx].id().to_string();
        let number = session.specs[idx].next_cycle_number();
        let started_at = Utc::now();

        let excerpts =
            reports.recent_excerpts(&spec_id, LEAD_PROMPT_EXCERPTS, LEAD_PROMPT_EXCERPT_CHARS);
        let lead_prompt = build_lead_prompt(
            &LeadPromptInput {
                spec: &session.specs[idx],
                content: &record.content,
                cycle: number,
                max_cycles,
                context,
                excerpts: &excerpts,
            },
            &session.working_dir,
            &self.prompt,
        );

        tracing::info!(spec = %spec_id, cycle = number, lead = %session.lead, "starting cycle");

        let (lead_tool, lead_output) = match self.run_lead_with_fallback(session, &lead_prompt).await {
            Ok(done) => done,
            Err(OrchestratorError::Interrupted) => return Ok(CycleResult::Interrupted),
            Err(e) => {
                let entry = &mut session.specs[idx];
                entry.last_error = Some(e.to_string());
                entry.transition(SpecStatus::Failed)?;
                self.store.persist(session)?;
                return Err(e);
            }
        };

        if lead_output.is_empty() {
            let err = OrchestratorError::LeadEmptyOutput {
                tool: lead_tool,
                spec: spec_id.clone(),
            };
            tracing::error!(spec = %spec_id, tool = %lead_tool, "lead produced empty output");
            let entry = &mut session.specs[idx];
            entry.last_error = Some(err.to_string());
            entry.transition(SpecStatus::Failed)?;
            self.store.persist(session)?;
            return Err(err);
        }

        let lead = LeadExecution {
            tool: lead_tool,
            prompt: lead_prompt,
            output: lead_output.output,
            duration_ms: lead_output.duration_ms,
            exit_code: lead_output.exit_code,
        };

        let Some(validations) = self.validate_all(session, record).await else {
            return Ok(CycleResult::Interrupted);
        };
        let results: Vec<ValidationResult> = validations.iter().map(|v| v.result.clone()).collect();
        let consensus = has_consensus(&results);
        let passes = results.iter().filter(|r| r.passed()).count();

        let cycle = Cycle {
            number,
            spec_id: spec_id.clone(),
            started_at,
            completed_at: Utc::now(),
            lead,
            validations,
            consensus_reached: consensus,
        };
        if let Err(e) = reports.write_cycle(&cycle) {
            tracing::warn!(error = %e, "failed to write cycle reports");
        }

        let entry = &mut session.specs[idx];
        let gaps = collect_gaps(&cycle.validations);
        entry.cycles.push(cycle);
        if consensus {
            entry.pending_feedback.clear();
            entry.last_error = None;
            entry.transition(SpecStatus::Completed)?;
        } else {
            entry.pending_feedback = gaps;
        }
        tracing::info!(
            spec = %spec_id,
            cycle = number,
            passes,
            validators = results.len(),
            consensus,
            "cycle finished"
        );
        self.store.persist(session)?;

        Ok(if consensus {
            CycleResult::Consensus
        } else {
            CycleResult::NoConsensus
        })
    }

    /// Run the lead, walking the fallback chain on rate limits.
    ///
    /// Each switch is applied through the role invariants, persisted, and
    /// followed by a cooldown before the next tool is tried.
    async fn run_lead_with_fallback(
        &self,
        session: &mut Session,
        prompt: &str,
    ) -> Result<(ToolId, ToolOutput), OrchestratorError> {
        let chain = session.roles()?.fallback_chain(&self.available);
        let timeout = session.config.cycle_timeout();
        let mut tried = Vec::new();

        for tool in chain {
            if tool != session.lead {
                let roles = session.roles()?.reassign_lead(tool, &self.available)?;
                tracing::warn!(from = %session.lead, to = %tool, "switching lead after rate limit");
                session.apply_roles(roles);
                self.store.persist(session)?;
                if !self.ctx.cooldown(self.rate_limit_cooldown).await {
                    return Err(OrchestratorError::Interrupted);
                }
            }

            tried.push(tool);
            match self
                .runner
                .run_lead(tool, prompt, &session.working_dir, timeout)
                .await
            {
                Ok(output) => return Ok((tool, output)),
                Err(ToolError::RateLimited { excerpt, .. }) => {
                    tracing::warn!(tool = %tool, excerpt = %excerpt, "lead rate limited");
                }
                Err(ToolError::Interrupted { .. }) => return Err(OrchestratorError::Interrupted),
                Err(e) => return Err(e.into()),
            }
        }

        Err(OrchestratorError::FallbackExhausted { tried })
    }

    /// Run every validator concurrently. `None` if the run was interrupted.
    async fn validate_all(&self, session: &Session, record: &SpecRecord) -> Option<Vec<Validation>> {
        let prompt = build_validation_prompt(record, &session.working_dir, &self.prompt);
        let timeout = session.config.cycle_timeout();
        let dir = session.working_dir.as_path();

        let runs = session
            .validators
            .iter()
            .map(|&tool| self.validate_one(tool, &prompt, dir, timeout));
        let outcomes = join_all(runs).await;

        let mut validations = Vec::with_capacity(outcomes.len());
        for (tool, outcome) in session.validators.iter().zip(outcomes) {
            match outcome {
                Ok(validation) => validations.push(validation),
                Err(e) if e.is_interrupted() => return None,
                Err(e) => {
                    tracing::warn!(tool = %tool, error = %e, "validator could not run");
                    validations.push(Validation {
                        tool: *tool,
                        prompt: prompt.clone(),
                        output: String::new(),
                        result: ValidationResult::new(
                            0,
                            ValidationStatus::Fail,
                            vec![format!("Validator {tool} could not run: {e}")],
                            Vec::new(),
                        ),
                        duration_ms: 0,
                        exit_code: -1,
                        used_full_permissions: false,
                        format_retried: false,
                    });
                }
            }
        }
        if self.ctx.is_interrupted() {
            return None;
        }
        Some(validations)
    }

    /// One validator, with a single format-recovery retry on unparseable output.
    async fn validate_one(
        &self,
        tool: ToolId,
        prompt: &str,
        dir: &Path,
        timeout: Duration,
    ) -> Result<Validation, ToolError> {
        let first = self.runner.run_validator(tool, prompt, dir, timeout).await?;
        match parse_validation_output(&first.result.output) {
            Ok(result) => Ok(Validation {
                tool,
                prompt: prompt.to_string(),
                output: first.result.output,
                result,
                duration_ms: first.result.duration_ms,
                exit_code: first.result.exit_code,
                used_full_permissions: first.used_full_permissions,
                format_retried: false,
            }),
            Err(err) => {
                tracing::warn!(tool = %tool, error = %err, "validator output unparseable, retrying with format recovery");
                let recovery = build_format_recovery_prompt(prompt, &err, &first.result.output);
                let second = self
                    .runner
                    .run_validator(tool, &recovery, dir, timeout)
                    .await?;
                let result = parse_validation_output(&second.result.output).unwrap_or_else(|err| {
                    tracing::warn!(tool = %tool, error = %err, "validator output still unparseable, recording FAIL");
                    ValidationResult::failed_parse(&err)
                });
                Ok(Validation {
                    tool,
                    prompt: recovery,
                    output: second.result.output,
                    result,
                    duration_ms: first.result.duration_ms + second.result.duration_ms,
                    exit_code: second.result.exit_code,
                    used_full_permissions: first.used_full_permissions
                        || second.used_full_permissions,
                    format_retried: true,
                })
            }
        }
    }
}

/// Gaps across validations, deduplicated in first-seen order.
fn collect_gaps(validations: &[Validation]) -> Vec<String> {
    let mut seen = HashSet::new();
    validations
        .iter()
        .flat_map(|v| v.result.gaps.iter())
        .filter(|gap| seen.insert(gap.as_str()))
        .cloned()
        .collect()
}

/// Contents of the session's context-only specs, for lead prompts.
fn load_context_specs(session: &Session) -> Vec<ContextSpec> {
    session
        .specs
        .iter()
        .filter(|s| s.context_only)
        .filter_map(|s| match load_spec(&s.resolved_path(&session.working_dir)) {
            Ok(record) => Some(ContextSpec {
                name: record.meta.name,
                content: record.content,
            }),
            Err(e) => {
                tracing::warn!(spec = %s.meta.id, error = %e, "cannot read context spec");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuorumToml;
    use crate::spec::{load_specs, order_specs};
    use crate::tools::{RoleAssignment, ValidatorOutput};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    const PASS: &str = "COMPLETENESS: 100\nSTATUS: PASS";
    const FAIL: &str = "COMPLETENESS: 40\nSTATUS: FAIL\nGAPS:\n- error handling missing";

    fn output(text: &str) -> ToolOutput {
        ToolOutput {
            output: text.to_string(),
            exit_code: 0,
            duration_ms: 1,
            timed_out: false,
        }
    }

    /// Scripted agents. Leads and verdicts are consumed in order; when a
    /// script runs dry, leads succeed and validators pass.
    struct MockRunner {
        ctx: Arc<RunContext>,
        leads: Mutex<VecDeque<Result<ToolOutput, ToolError>>>,
        verdicts: Mutex<HashMap<ToolId, VecDeque<String>>>,
        calls: Mutex<Vec<(&'static str, ToolId)>>,
        interrupt_on_lead_call: Option<usize>,
    }

    impl MockRunner {
        fn new(ctx: Arc<RunContext>) -> Self {
            Self {
                ctx,
                leads: Mutex::new(VecDeque::new()),
                verdicts: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                interrupt_on_lead_call: None,
            }
        }

        fn lead(self, result: Result<ToolOutput, ToolError>) -> Self {
            self.leads.lock().unwrap().push_back(result);
            self
        }

        fn verdicts(self, tool: ToolId, outputs: &[&str]) -> Self {
            self.verdicts
                .lock()
                .unwrap()
                .entry(tool)
                .or_default()
                .extend(outputs.iter().map(|s| s.to_string()));
            self
        }

        fn interrupt_on_lead(mut self, call: usize) -> Self {
            self.interrupt_on_lead_call = Some(call);
            self
        }

        fn lead_calls(&self) -> Vec<ToolId> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(role, _)| *role == "lead")
                .map(|(_, t)| *t)
                .collect()
        }

        fn validator_calls(&self) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(role, _)| *role == "validator")
                .count()
        }
    }

    #[async_trait]
    impl AgentRunner for MockRunner {
        async fn run_lead(
            &self,
            tool: ToolId,
            _prompt: &str,
            _dir: &Path,
            _timeout: Duration,
        ) -> Result<ToolOutput, ToolError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(("lead", tool));
                calls.iter().filter(|(r, _)| *r == "lead").count()
            };
            if self.interrupt_on_lead_call == Some(call) {
                self.ctx.interrupt();
            }
            self.leads
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(output("implemented")))
        }

        async fn run_validator(
            &self,
            tool: ToolId,
            _prompt: &str,
            _dir: &Path,
            _timeout: Duration,
        ) -> Result<ValidatorOutput, ToolError> {
            if self.ctx.is_interrupted() {
                return Err(ToolError::Interrupted { tool });
            }
            self.calls.lock().unwrap().push(("validator", tool));
            let text = self
                .verdicts
                .lock()
                .unwrap()
                .get_mut(&tool)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| PASS.to_string());
            Ok(ValidatorOutput {
                result: output(&text),
                used_full_permissions: false,
            })
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        ctx: Arc<RunContext>,
    }

    impl Fixture {
        fn new(specs: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let specs_dir = dir.path().join("project/specs");
            std::fs::create_dir_all(&specs_dir).unwrap();
            for (file, body) in specs {
                std::fs::write(specs_dir.join(file), body).unwrap();
            }
            Self {
                dir,
                ctx: Arc::new(RunContext::automated()),
            }
        }

        fn project(&self) -> std::path::PathBuf {
            self.dir.path().join("project")
        }

        fn store(&self) -> SessionStore {
            SessionStore::new(&self.dir.path().join("state"), &self.project())
        }

        fn session(&self, config: SessionConfig, validators: Vec<ToolId>) -> Session {
            let specs = order_specs(load_specs(&self.project().join("specs")).unwrap()).unwrap();
            let roles = RoleAssignment::new(ToolId::Claude, validators).unwrap();
            self.store().create(&specs, roles, config).unwrap()
        }

        fn orchestrator(&self, runner: Arc<MockRunner>) -> CycleOrchestrator {
            CycleOrchestrator::new(runner, self.store(), Arc::clone(&self.ctx), ToolId::ALL.to_vec())
        }
    }

    fn config(max_iterations: u32, per_run: u32) -> SessionConfig {
        let mut toml = QuorumToml::default();
        toml.run.max_iterations = max_iterations;
        toml.run.max_iterations_per_run = per_run;
        toml.preflight.enabled = false;
        toml.session_config()
    }

    #[tokio::test]
    async fn test_split_verdict_with_one_cycle_fails_spec_and_partial_session() {
        let fx = Fixture::new(&[("x.md", "# X")]);
        let mut session = fx.session(config(5, 1), vec![ToolId::Codex, ToolId::Gemini]);
        let runner = Arc::new(
            MockRunner::new(Arc::clone(&fx.ctx))
                .verdicts(ToolId::Codex, &[PASS])
                .verdicts(ToolId::Gemini, &[FAIL]),
        );

        let outcome = fx.orchestrator(Arc::clone(&runner)).run(&mut session).await.unwrap();

        assert_eq!(outcome, RunOutcome::Partial);
        assert_eq!(session.specs[0].status, SpecStatus::Failed);
        assert_eq!(session.status, SessionStatus::Partial);
        assert_eq!(session.specs[0].cycles.len(), 1);
        assert!(!session.specs[0].cycles[0].consensus_reached);
        assert_eq!(
            session.specs[0].pending_feedback,
            vec!["error handling missing".to_string()]
        );
        // Partial sessions stay linked for a later run
        assert!(fx.store().load().is_some());
    }

    #[tokio::test]
    async fn test_two_passes_complete_spec_and_session() {
        let fx = Fixture::new(&[("x.md", "# X")]);
        let mut session = fx.session(config(5, 3), vec![ToolId::Codex, ToolId::Gemini]);
        let runner = Arc::new(MockRunner::new(Arc::clone(&fx.ctx)));

        let outcome = fx.orchestrator(Arc::clone(&runner)).run(&mut session).await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(session.specs[0].status, SpecStatus::Completed);
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(runner.lead_calls(), vec![ToolId::Claude]);
        assert_eq!(session.current_spec_index, 1);
        assert!(fx.store().load().is_none());

        let summary = fx
            .project()
            .join(".quorum/reports")
            .join(&session.id)
            .join("summary.json");
        assert!(summary.exists());
    }

    #[tokio::test]
    async fn test_context_only_specs_are_skipped_without_invocation() {
        let fx = Fixture::new(&[
            ("arch.md", "---\ncontext_only: true\n---\nLayering rules"),
            ("impl.md", "# Impl"),
        ]);
        let mut session = fx.session(config(5, 3), vec![ToolId::Codex]);
        let runner = Arc::new(MockRunner::new(Arc::clone(&fx.ctx)));

        fx.orchestrator(Arc::clone(&runner)).run(&mut session).await.unwrap();

        assert_eq!(session.specs[0].meta.id, "arch");
        assert_eq!(session.specs[0].status, SpecStatus::Skipped);
        assert!(session.specs[0].cycles.is_empty());
        assert_eq!(session.specs[1].status, SpecStatus::Completed);
        assert_eq!(runner.lead_calls().len(), 1);
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_cycles_continue_until_consensus() {
        let fx = Fixture::new(&[("x.md", "# X")]);
        let mut session = fx.session(config(5, 3), vec![ToolId::Codex, ToolId::Gemini]);
        let runner = Arc::new(
            MockRunner::new(Arc::clone(&fx.ctx))
                .verdicts(ToolId::Codex, &[FAIL, PASS])
                .verdicts(ToolId::Gemini, &[PASS, PASS]),
        );

        fx.orchestrator(Arc::clone(&runner)).run(&mut session).await.unwrap();

        let numbers: Vec<u32> = session.specs[0].cycles.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(session.specs[0].status, SpecStatus::Completed);
        assert!(session.specs[0].pending_feedback.is_empty());
    }

    #[tokio::test]
    async fn test_lifetime_budget_exhaustion_skips_spec() {
        let fx = Fixture::new(&[("x.md", "# X")]);
        let mut session = fx.session(config(2, 5), vec![ToolId::Codex]);
        let runner = Arc::new(
            MockRunner::new(Arc::clone(&fx.ctx)).verdicts(ToolId::Codex, &[FAIL, FAIL, FAIL]),
        );

        let outcome = fx.orchestrator(Arc::clone(&runner)).run(&mut session).await.unwrap();

        assert_eq!(session.specs[0].cycles.len(), 2);
        assert_eq!(session.specs[0].status, SpecStatus::Skipped);
        assert!(session.specs[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("manual review"));
        // Skipped counts as settled
        assert_eq!(outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_interrupted_session_resumes_without_duplicate_cycles() {
        let fx = Fixture::new(&[("a.md", "# A"), ("b.md", "# B")]);
        let mut session = fx.session(config(5, 3), vec![ToolId::Codex]);
        // Cycle 1 fails, interrupt lands during cycle 2's lead
        let runner = Arc::new(
            MockRunner::new(Arc::clone(&fx.ctx))
                .verdicts(ToolId::Codex, &[FAIL])
                .interrupt_on_lead(2),
        );

        let outcome = fx.orchestrator(Arc::clone(&runner)).run(&mut session).await.unwrap();
        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_eq!(session.current_spec_index, 0);
        assert_eq!(session.specs[0].cycles.len(), 1);
        assert_eq!(session.status, SessionStatus::InProgress);

        let mut reloaded = fx.store().load().unwrap();
        assert_eq!(reloaded.current_spec_index, 0);
        assert_eq!(reloaded.specs[0].cycles.len(), 1);

        let ctx = Arc::new(RunContext::automated());
        let runner = Arc::new(MockRunner::new(Arc::clone(&ctx)));
        let orchestrator =
            CycleOrchestrator::new(runner, fx.store(), ctx, ToolId::ALL.to_vec());
        let outcome = orchestrator.run(&mut reloaded).await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        let numbers: Vec<u32> = reloaded.specs[0].cycles.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(reloaded.specs[1].cycles.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_switches_lead_and_persists_roles() {
        let fx = Fixture::new(&[("x.md", "# X")]);
        let mut session = fx.session(config(5, 3), vec![ToolId::Codex, ToolId::Gemini]);
        let runner = Arc::new(MockRunner::new(Arc::clone(&fx.ctx)).lead(Err(
            ToolError::RateLimited {
                tool: ToolId::Claude,
                excerpt: "429".into(),
            },
        )));

        let outcome = fx.orchestrator(Arc::clone(&runner)).run(&mut session).await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(runner.lead_calls(), vec![ToolId::Claude, ToolId::Codex]);
        assert_eq!(session.lead, ToolId::Codex);
        assert_eq!(session.validators, vec![ToolId::Claude, ToolId::Gemini]);
        assert_eq!(session.specs[0].cycles[0].lead.tool, ToolId::Codex);

        let raw = std::fs::read_to_string(fx.store().session_path(&session.id)).unwrap();
        let saved: Session = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved.lead, ToolId::Codex);
        assert!(!saved.validators.contains(&saved.lead));
    }

    #[tokio::test]
    async fn test_exhausted_fallback_is_fatal() {
        let fx = Fixture::new(&[("x.md", "# X"), ("y.md", "# Y")]);
        let mut session = fx.session(config(5, 3), vec![ToolId::Codex, ToolId::Gemini]);
        let limited = |tool| {
            Err(ToolError::RateLimited {
                tool,
                excerpt: "quota exceeded".into(),
            })
        };
        let runner = Arc::new(
            MockRunner::new(Arc::clone(&fx.ctx))
                .lead(limited(ToolId::Claude))
                .lead(limited(ToolId::Codex))
                .lead(limited(ToolId::Gemini)),
        );

        let err = fx
            .orchestrator(Arc::clone(&runner))
            .run(&mut session)
            .await
            .unwrap_err();

        match err {
            OrchestratorError::FallbackExhausted { tried } => {
                assert_eq!(tried, vec![ToolId::Claude, ToolId::Codex, ToolId::Gemini])
            }
            other => panic!("expected FallbackExhausted, got {other:?}"),
        }
        assert_eq!(session.specs[0].status, SpecStatus::Failed);
        assert_eq!(session.specs[1].status, SpecStatus::Pending);
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(fx.store().load().unwrap().status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_empty_lead_output_fails_spec_and_marks_session_partial() {
        let fx = Fixture::new(&[("x.md", "# X")]);
        let mut session = fx.session(config(5, 3), vec![ToolId::Codex]);
        let runner = Arc::new(MockRunner::new(Arc::clone(&fx.ctx)).lead(Ok(output("   "))));

        let err = fx
            .orchestrator(Arc::clone(&runner))
            .run(&mut session)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::LeadEmptyOutput { .. }));
        assert_eq!(session.specs[0].status, SpecStatus::Failed);
        assert_eq!(session.status, SessionStatus::Partial);
        assert_eq!(runner.validator_calls(), 0);
    }

    #[tokio::test]
    async fn test_fatal_lead_failure_aborts_run() {
        let fx = Fixture::new(&[("x.md", "# X")]);
        let mut session = fx.session(config(5, 3), vec![ToolId::Codex]);
        let runner = Arc::new(MockRunner::new(Arc::clone(&fx.ctx)).lead(Err(
            ToolError::LeadFailed {
                tool: ToolId::Claude,
                exit_code: 2,
                excerpt: "panic".into(),
            },
        )));

        let err = fx
            .orchestrator(Arc::clone(&runner))
            .run(&mut session)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Tool(ToolError::LeadFailed { .. })));
        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.specs[0].last_error.as_deref().unwrap().contains("panic"));
    }

    #[tokio::test]
    async fn test_malformed_validator_output_degrades_to_fail() {
        let fx = Fixture::new(&[("x.md", "# X")]);
        let mut session = fx.session(config(5, 1), vec![ToolId::Codex]);
        let runner = Arc::new(
            MockRunner::new(Arc::clone(&fx.ctx))
                .verdicts(ToolId::Codex, &["looks fine", r#"{"completeness": 90}"#]),
        );

        let outcome = fx.orchestrator(Arc::clone(&runner)).run(&mut session).await.unwrap();

        assert_eq!(outcome, RunOutcome::Partial);
        let validation = &session.specs[0].cycles[0].validations[0];
        assert!(validation.format_retried);
        assert_eq!(validation.result.status, ValidationStatus::Fail);
        assert_eq!(validation.result.completeness, 0);
        assert!(validation.result.gaps[0].contains("`status`"));
        assert_eq!(runner.validator_calls(), 2);
    }

    #[tokio::test]
    async fn test_format_recovery_success_is_used() {
        let fx = Fixture::new(&[("x.md", "# X")]);
        let mut session = fx.session(config(5, 1), vec![ToolId::Codex]);
        let runner = Arc::new(
            MockRunner::new(Arc::clone(&fx.ctx)).verdicts(ToolId::Codex, &["hmm", PASS]),
        );

        let outcome = fx.orchestrator(Arc::clone(&runner)).run(&mut session).await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert!(session.specs[0].cycles[0].validations[0].format_retried);
    }

    #[tokio::test]
    async fn test_preflight_consensus_skips_lead() {
        let fx = Fixture::new(&[("x.md", "# X")]);
        let mut cfg = config(5, 3);
        cfg.preflight.enabled = true;
        let mut session = fx.session(cfg, vec![ToolId::Codex, ToolId::Gemini]);
        let runner = Arc::new(MockRunner::new(Arc::clone(&fx.ctx)));

        fx.orchestrator(Arc::clone(&runner)).run(&mut session).await.unwrap();

        assert!(runner.lead_calls().is_empty());
        assert_eq!(session.specs[0].status, SpecStatus::Completed);
        assert!(session.specs[0].cycles.is_empty());
        assert!(session.specs[0].preflight.as_ref().unwrap().consensus_reached);
    }

    #[tokio::test]
    async fn test_high_preflight_completeness_reduces_allotment() {
        let fx = Fixture::new(&[("x.md", "# X")]);
        let mut cfg = config(5, 3);
        cfg.preflight.enabled = true;
        cfg.preflight.threshold = 80;
        cfg.preflight.reduced_iterations = 1;
        let mut session = fx.session(cfg, vec![ToolId::Codex]);
        let almost = "COMPLETENESS: 90\nSTATUS: FAIL\nGAPS:\n- one edge case";
        let runner = Arc::new(
            MockRunner::new(Arc::clone(&fx.ctx)).verdicts(ToolId::Codex, &[almost, almost, almost]),
        );

        fx.orchestrator(Arc::clone(&runner)).run(&mut session).await.unwrap();

        assert_eq!(runner.lead_calls().len(), 1);
        assert_eq!(session.specs[0].cycles.len(), 1);
        assert_eq!(session.specs[0].status, SpecStatus::Failed);
        assert_eq!(session.specs[0].pending_feedback, vec!["one edge case".to_string()]);
    }

    #[tokio::test]
    async fn test_stop_on_failure_aborts_remaining_specs() {
        let fx = Fixture::new(&[("a.md", "# A"), ("b.md", "# B")]);
        let mut cfg = config(5, 1);
        cfg.stop_on_failure = true;
        let mut session = fx.session(cfg, vec![ToolId::Codex]);
        let runner = Arc::new(MockRunner::new(Arc::clone(&fx.ctx)).verdicts(ToolId::Codex, &[FAIL]));

        let outcome = fx.orchestrator(Arc::clone(&runner)).run(&mut session).await.unwrap();

        assert_eq!(outcome, RunOutcome::Aborted);
        assert_eq!(session.specs[0].status, SpecStatus::Failed);
        assert_eq!(session.specs[1].status, SpecStatus::Pending);
        assert_eq!(session.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_reopened_spec_continues_numbering_on_next_run() {
        let fx = Fixture::new(&[("x.md", "# X")]);
        let mut session = fx.session(config(5, 1), vec![ToolId::Codex]);
        let runner = Arc::new(MockRunner::new(Arc::clone(&fx.ctx)).verdicts(ToolId::Codex, &[FAIL]));
        fx.orchestrator(runner).run(&mut session).await.unwrap();
        assert_eq!(session.specs[0].status, SpecStatus::Failed);

        let mut resumed = fx.store().load().unwrap();
        assert_eq!(resumed.reopen_failed(), 1);
        let runner = Arc::new(MockRunner::new(Arc::clone(&fx.ctx)));
        let outcome = fx.orchestrator(runner).run(&mut resumed).await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        let numbers: Vec<u32> = resumed.specs[0].cycles.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::Completed.exit_code(), 0);
        assert_eq!(RunOutcome::Partial.exit_code(), 1);
        assert_eq!(RunOutcome::Interrupted.exit_code(), 130);
    }
}
