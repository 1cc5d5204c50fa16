//! Lead prompt assembly.

use std::path::Path;

use crate::config::PromptSettings;
use crate::report::Excerpt;
use crate::session::SpecEntry;
use crate::util::excerpt;
use crate::validation::prompt::workspace_files;

/// Background material from a context-only spec.
#[derive(Debug, Clone)]
pub struct ContextSpec {
    pub name: String,
    pub content: String,
}

/// Everything the lead sees besides the workspace itself.
pub struct LeadPromptInput<'a> {
    pub spec: &'a SpecEntry,
    pub content: &'a str,
    pub cycle: u32,
    pub max_cycles: u32,
    pub context: &'a [ContextSpec],
    pub excerpts: &'a [Excerpt],
}

pub fn build_lead_prompt(input: &LeadPromptInput<'_>, dir: &Path, settings: &PromptSettings) -> String {
    let spec = input.spec;

    let context_section = if input.context.is_empty() {
        String::new()
    } else {
        let blocks: Vec<String> = input
            .context
            .iter()
            .map(|c| format!("### {}\n\n{}\n", c.name, excerpt(&c.content, settings.max_file_chars)))
            .collect();
        format!("## Project Context\n\n{}\n", blocks.join("\n"))
    };

    let feedback_section = if spec.pending_feedback.is_empty() {
        String::new()
    } else {
        let items: Vec<String> = spec
            .pending_feedback
            .iter()
            .map(|gap| format!("- {gap}"))
            .collect();
        format!(
            "## Validator Feedback\n\nThe previous validation found these gaps. Address every one:\n\n{}\n\n",
            items.join("\n")
        )
    };

    let excerpt_section = if input.excerpts.is_empty() {
        String::new()
    } else {
        let blocks: Vec<String> = input
            .excerpts
            .iter()
            .map(|e| format!("### {}\n\n```\n{}\n```\n", e.source, e.text))
            .collect();
        format!("## Recent Validator Reports\n\n{}\n", blocks.join("\n"))
    };

    let depends = if spec.meta.depends_on.is_empty() {
        "none".to_string()
    } else {
        spec.meta.depends_on.join(", ")
    };

    format!(
        r#"# Implement: {name}

You are the lead implementer. Implement the specification below in the
current working directory. Edit files directly.

- Spec id: {id}
- Complexity: {complexity}
- Maturity: {maturity}/5
- Depends on: {depends}
- Cycle: {cycle} of {max_cycles}

{context_section}## Specification

{content}

{feedback_section}{excerpt_section}## Working Directory

{listing}
## Instructions

1. Read the existing code before changing it.
2. Implement every requirement in the specification.
3. Keep changes focused on this spec; other specs are handled separately.
4. Finish with a short summary of what you changed.
"#,
        name = spec.meta.name,
        id = spec.meta.id,
        complexity = spec.meta.complexity,
        maturity = spec.meta.maturity,
        depends = depends,
        cycle = input.cycle,
        max_cycles = input.max_cycles,
        context_section = context_section,
        content = input.content.trim(),
        feedback_section = feedback_section,
        excerpt_section = excerpt_section,
        listing = directory_listing(dir, settings.max_listing_entries),
    )
}

/// Bulleted list of workspace files, capped at `max_entries`.
pub fn directory_listing(dir: &Path, max_entries: usize) -> String {
    let files = workspace_files(dir);
    if files.is_empty() {
        return "(empty)\n".to_string();
    }

    let mut out: String = files
        .iter()
        .take(max_entries)
        .map(|f| format!("- {}\n", f.display()))
        .collect();
    if files.len() > max_entries {
        out.push_str(&format!("- ... and {} more\n", files.len() - max_entries));
    }
    out
}
