//! Terminal rendering for session status, run results and tool discovery.

pub mod icons;

use console::{StyledObject, style};

use crate::orchestrator::RunOutcome;
use crate::session::{Session, SessionStatus, SpecEntry, SpecStatus};
use crate::tools::ToolRegistry;
use icons::{CHECK, CROSS, PENDING, RUNNING, SKIP, SPARKLE, STOP, TOOL, WARN};

/// Glyph and colored label for a spec status.
pub fn spec_status_label(status: SpecStatus) -> (console::Emoji<'static, 'static>, StyledObject<String>) {
    let text = status.to_string();
    match status {
        SpecStatus::Completed => (CHECK, style(text).green()),
        SpecStatus::Failed => (CROSS, style(text).red()),
        SpecStatus::Skipped => (SKIP, style(text).yellow()),
        SpecStatus::InProgress => (RUNNING, style(text).cyan()),
        SpecStatus::Pending => (PENDING, style(text).dim()),
    }
}

fn session_status_label(status: SessionStatus) -> StyledObject<String> {
    let text = status.to_string();
    match status {
        SessionStatus::Completed => style(text).green().bold(),
        SessionStatus::Partial => style(text).yellow().bold(),
        SessionStatus::Failed | SessionStatus::Abandoned => style(text).red().bold(),
        SessionStatus::Pending | SessionStatus::InProgress => style(text).cyan().bold(),
    }
}

fn spec_line(index: usize, current: usize, spec: &SpecEntry) -> String {
    let (icon, label) = spec_status_label(spec.status);
    let marker = if index == current { ">" } else { " " };
    let mut line = format!(
        "{marker} {icon}{:<24} {:<12} cycles: {}",
        spec.meta.id,
        label,
        spec.cycles.len()
    );
    if spec.context_only {
        line.push_str(&format!(" {}", style("(context)").dim()));
    }
    if let Some(completeness) = spec
        .last_cycle()
        .and_then(|c| c.validations.iter().map(|v| v.result.completeness).min())
    {
        line.push_str(&format!("  completeness: {completeness}%"));
    }
    line
}

/// Full session view for `quorum status`.
pub fn print_session(session: &Session) {
    println!();
    println!("Session {}", style(&session.id).bold());
    println!("  Status:     {}", session_status_label(session.status));
    println!("  Directory:  {}", session.working_dir.display());
    println!("  Lead:       {}", style(session.lead).cyan());
    let validators: Vec<String> = session.validators.iter().map(ToString::to_string).collect();
    println!("  Validators: {}", validators.join(", "));
    println!(
        "  Progress:   {}/{} specs, {} cycle(s)",
        session.current_spec_index.min(session.specs.len()),
        session.specs.len(),
        session.total_cycles()
    );
    println!("  Updated:    {}", session.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();

    for (i, spec) in session.specs.iter().enumerate() {
        println!("{}", spec_line(i, session.current_spec_index, spec));
        if let Some(err) = &spec.last_error {
            println!("      {}", style(err).dim());
        }
    }
    println!();
}

/// Closing summary after a run.
pub fn print_run_result(session: &Session, outcome: RunOutcome) {
    println!();
    match outcome {
        RunOutcome::Completed => {
            println!("{}{}", SPARKLE, style("All specs reached consensus or were skipped").green().bold())
        }
        RunOutcome::Partial => {
            println!("{}{}", WARN, style("Run finished with failed specs").yellow().bold())
        }
        RunOutcome::Aborted => {
            println!("{}{}", STOP, style("Run aborted after a spec failed").red().bold())
        }
        RunOutcome::Interrupted => {
            println!("{}{}", STOP, style("Interrupted. Run `quorum resume` to continue.").yellow().bold())
        }
    }
    println!(
        "  {} completed, {} failed, {} skipped, {} cycle(s) total",
        style(session.count_by_status(SpecStatus::Completed)).green(),
        style(session.count_by_status(SpecStatus::Failed)).red(),
        style(session.count_by_status(SpecStatus::Skipped)).yellow(),
        session.total_cycles()
    );
    for spec in session.specs.iter().filter(|s| s.status == SpecStatus::Failed) {
        if let Some(err) = &spec.last_error {
            println!("  {}{}: {}", CROSS, spec.meta.id, style(err).dim());
        }
    }
    println!();
}

/// Discovered tools for `quorum tools`.
pub fn print_tools(registry: &ToolRegistry) {
    println!();
    if registry.is_empty() {
        println!("{}No agent tools found on PATH (looked for claude, codex, gemini)", WARN);
        println!();
        return;
    }
    println!("Available agent tools (fallback order):");
    for tool in registry.tools() {
        println!(
            "  {}{:<8} {:<10} {}",
            TOOL,
            style(tool.id).cyan(),
            tool.command,
            style(&tool.version).dim()
        );
    }
    if registry.len() < 2 {
        println!();
        println!(
            "{}At least two tools are needed: one lead and one validator",
            WARN
        );
    }
    println!();
}
