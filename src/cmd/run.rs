//! Session execution: `quorum run` and `quorum resume`.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use quorum::config::{QuorumToml, automation_mode, state_dir};
use quorum::context::RunContext;
use quorum::errors::OrchestratorError;
use quorum::orchestrator::CycleOrchestrator;
use quorum::session::{Session, SessionStore};
use quorum::spec::{load_specs, order_specs};
use quorum::tools::{RoleAssignment, ToolExecutor, ToolId, ToolRegistry};

use super::super::RunArgs;

/// Apply `quorum run` flags on top of file and environment settings.
fn apply_overrides(toml: &mut QuorumToml, args: &RunArgs) {
    if let Some(dir) = &args.specs {
        toml.run.specs_dir = dir.clone();
    }
    if let Some(n) = args.max_iterations {
        toml.run.max_iterations = n;
    }
    if let Some(n) = args.max_per_run {
        toml.run.max_iterations_per_run = n;
    }
    if let Some(secs) = args.timeout {
        toml.run.cycle_timeout_secs = secs;
    }
    if args.sandbox {
        toml.sandbox.enabled = true;
    }
    if args.stop_on_failure {
        toml.run.stop_on_failure = true;
    }
    if args.no_preflight {
        toml.preflight.enabled = false;
    }
}

/// Probe agents and enforce the two-tool minimum.
async fn discover_tools(toml: &QuorumToml) -> Result<ToolRegistry, OrchestratorError> {
    let registry = ToolRegistry::discover(&toml.tools).await;
    match registry.len() {
        0 => Err(OrchestratorError::NoToolsDetected),
        1 => Err(OrchestratorError::InsufficientTools { found: 1 }),
        _ => Ok(registry),
    }
}

pub async fn cmd_run(project_dir: &Path, args: &RunArgs) -> Result<ExitCode> {
    let mut toml = QuorumToml::load_or_default(project_dir)?;
    apply_overrides(&mut toml, args);
    for warning in toml.validate() {
        tracing::warn!("config: {}", warning);
    }

    let registry = discover_tools(&toml).await?;
    let available = registry.available();
    let store = SessionStore::new(&state_dir(project_dir), project_dir);

    let existing = store.load().filter(|s| s.status.is_resumable());
    let session = match existing {
        Some(mut session) if args.fresh => {
            tracing::info!(session = %session.id, "abandoning previous session");
            store.abandon(&mut session)?;
            None
        }
        Some(mut session) => {
            println!("Resuming session {}", console::style(&session.id).bold());
            prepare_resume(&store, &mut session, &available)?;
            Some(session)
        }
        None => None,
    };

    let session = match session {
        Some(session) => session,
        None => {
            let specs_dir = project_dir.join(&toml.run.specs_dir);
            let specs = load_specs(&specs_dir)?;
            if specs.is_empty() {
                anyhow::bail!("No spec files found in {}", specs_dir.display());
            }
            let specs = order_specs(specs)?;
            let roles = RoleAssignment::select(&available, args.lead, &args.validators)?;
            let session = store.create(&specs, roles, toml.session_config())?;
            println!(
                "Started session {} with {} spec(s)",
                console::style(&session.id).bold(),
                session.specs.len()
            );
            session
        }
    };

    execute(&toml, store, registry, session).await
}

pub async fn cmd_resume(project_dir: &Path) -> Result<ExitCode> {
    let toml = QuorumToml::load_or_default(project_dir)?;
    let store = SessionStore::new(&state_dir(project_dir), project_dir);
    let Some(mut session) = store.load().filter(|s| s.status.is_resumable()) else {
        return Err(OrchestratorError::NothingToResume {
            dir: project_dir.to_path_buf(),
        }
        .into());
    };

    let registry = discover_tools(&toml).await?;
    println!("Resuming session {}", console::style(&session.id).bold());
    prepare_resume(&store, &mut session, &registry.available())?;
    execute(&toml, store, registry, session).await
}

/// Reopen failed specs and fit the persisted roles to the tools found now.
fn prepare_resume(store: &SessionStore, session: &mut Session, available: &[ToolId]) -> Result<()> {
    if available.len() < 2 {
        return Err(OrchestratorError::InsufficientTools {
            found: available.len(),
        }
        .into());
    }
    let reopened = session.reopen_failed();
    if reopened > 0 {
        tracing::info!(reopened, "reopened failed specs with budget remaining");
    }

    let current = session.roles()?;
    let roles = current
        .restrict_to(available)
        .context("Persisted roles cannot be rebuilt from the available tools")?;
    if roles != current {
        tracing::warn!(
            lead = %roles.lead,
            validators = ?roles.validators,
            previous_lead = %current.lead,
            previous_validators = ?current.validators,
            "persisted roles referenced unavailable tools"
        );
        session.apply_roles(roles);
    }
    store.persist(session)
}

async fn execute(
    toml: &QuorumToml,
    store: SessionStore,
    registry: ToolRegistry,
    mut session: Session,
) -> Result<ExitCode> {
    let ctx = Arc::new(RunContext::new(&toml.throttle, automation_mode()));
    let _signals = ctx.install_interrupt_handler();

    let executor = ToolExecutor::new(
        Arc::clone(&ctx),
        session.config.permission_overrides.clone(),
        session.config.sandbox.clone(),
    );
    let orchestrator =
        CycleOrchestrator::new(Arc::new(executor), store, ctx, registry.available())
            .with_prompt_settings(toml.prompt.clone())
            .with_rate_limit_cooldown(Duration::from_secs(toml.throttle.rate_limit_cooldown_secs));

    println!(
        "Lead: {}  Validators: {}",
        console::style(session.lead).cyan(),
        session
            .validators
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let outcome = orchestrator.run(&mut session).await?;
    quorum::ui::print_run_result(&session, outcome);
    Ok(ExitCode::from(outcome.exit_code()))
}
