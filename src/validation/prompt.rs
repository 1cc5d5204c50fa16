//! Validator prompts and workspace file collection.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{PromptSettings, QUORUM_DIR};
use crate::errors::ParseError;
use crate::spec::SpecRecord;
use crate::util::excerpt;

/// Directories never shown to agents.
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", QUORUM_DIR, ".venv", "dist"];

/// Characters of the malformed output quoted back in a recovery prompt.
const RECOVERY_EXCERPT_CHARS: usize = 1500;

const WIRE_CONTRACT: &str = r#"```json
{
  "completeness": 0-100,
  "status": "PASS" | "FAIL",
  "findings": [
    {
      "requirement": "The requirement text from the spec",
      "gap": "What is missing or wrong",
      "original": "The relevant snippet as it stands (may be empty)",
      "proposed": "The concrete change that would close the gap"
    }
  ],
  "recommendations": ["Short actionable recommendation"]
}
```"#;

/// Workspace files relative to `dir`, sorted, skipping build and state directories.
pub fn workspace_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !SKIPPED_DIRS.iter().any(|s| entry.file_name() == *s)
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.path().strip_prefix(dir).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}

/// Concatenated file contents, each file and the total capped by `settings`.
///
/// Unreadable or non-UTF-8 files are listed but not inlined.
pub fn file_contents_section(dir: &Path, settings: &PromptSettings) -> String {
    let mut out = String::new();
    let mut budget = settings.max_validation_chars;
    let mut omitted = 0usize;

    for rel in workspace_files(dir) {
        let Ok(content) = std::fs::read_to_string(dir.join(&rel)) else {
            continue;
        };
        if budget == 0 {
            omitted += 1;
            continue;
        }
        let cap = settings.max_file_chars.min(budget);
        let shown: String = content.chars().take(cap).collect();
        let truncated = shown.len() < content.len();
        budget = budget.saturating_sub(shown.chars().count());

        out.push_str(&format!("### {}\n```\n{}", rel.display(), shown));
        if !shown.ends_with('\n') {
            out.push('\n');
        }
        if truncated {
            out.push_str("... [truncated]\n");
        }
        out.push_str("```\n\n");
    }

    if omitted > 0 {
        out.push_str(&format!(
            "[{omitted} more file(s) omitted: size limit reached. Read them directly if needed.]\n"
        ));
    }
    if out.is_empty() {
        out.push_str("The working directory contains no readable files yet.\n");
    }
    out
}

/// Prompt asking a validator to judge the workspace against `spec`.
pub fn build_validation_prompt(spec: &SpecRecord, dir: &Path, settings: &PromptSettings) -> String {
    let files_section = file_contents_section(dir, settings);
    format!(
        r#"# Validation: {name}

You are a validator. Judge whether the code in the working directory fully
implements the specification below. Do not modify any files.

## Specification ({id})

{content}

## Current Files

{files_section}
## Instructions

1. Check every requirement in the specification against the files.
2. For each unmet requirement, record a finding with the requirement, the gap,
   the original snippet and the proposed change.
3. Score completeness from 0 to 100.
4. Use status PASS only if the implementation is complete and correct.

## Output Format

Respond with exactly one JSON object and nothing else:

{contract}
"#,
        name = spec.meta.name,
        id = spec.meta.id,
        content = spec.content.trim(),
        files_section = files_section,
        contract = WIRE_CONTRACT,
    )
}

/// Stricter retry prompt after a validator's output could not be parsed.
pub fn build_format_recovery_prompt(original: &str, error: &ParseError, previous_output: &str) -> String {
    format!(
        r#"{original}

## FORMAT CORRECTION REQUIRED

Your previous response could not be parsed ({error}).
It began with:

```
{previous}
```

Reply again with ONLY the JSON object described above. No prose, no markdown
headings, no explanation. `completeness` must be a number, `status` must be
exactly "PASS" or "FAIL", and `findings` and `recommendations` must be lists
(empty lists are allowed).
"#,
        original = original.trim_end(),
        error = error,
        previous = excerpt(previous_output, RECOVERY_EXCERPT_CHARS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Complexity, SpecMeta};

    fn spec() -> SpecRecord {
        SpecRecord {
            file: "cache.md".into(),
            path: PathBuf::from("specs/cache.md"),
            meta: SpecMeta {
                id: "cache".into(),
                name: "LRU Cache".into(),
                complexity: Complexity::Low,
                maturity: 2,
                depends_on: vec![],
            },
            context_only: false,
            content: "Implement an LRU cache with capacity N.".into(),
        }
    }

    #[test]
    fn test_workspace_files_skip_state_and_build_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        std::fs::create_dir_all(dir.path().join(".quorum/logs")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn x() {}").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        std::fs::write(dir.path().join("target/debug/out"), "bin").unwrap();
        std::fs::write(dir.path().join(".quorum/logs/q.log"), "log").unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();

        let files = workspace_files(dir.path());
        assert_eq!(
            files,
            vec![PathBuf::from("Cargo.toml"), PathBuf::from("src/lib.rs")]
        );
    }

    #[test]
    fn test_file_contents_respect_caps() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a".repeat(50)).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b".repeat(50)).unwrap();
        std::fs::write(dir.path().join("c.txt"), "c".repeat(50)).unwrap();

        let settings = PromptSettings {
            max_validation_chars: 60,
            max_file_chars: 40,
            max_listing_entries: 10,
        };
        let section = file_contents_section(dir.path(), &settings);
        assert!(section.contains(&"a".repeat(40)));
        assert!(!section.contains(&"a".repeat(41)));
        assert!(section.contains(&"b".repeat(20)));
        assert!(!section.contains(&"b".repeat(21)));
        assert!(section.contains("1 more file(s) omitted"));
    }

    #[test]
    fn test_validation_prompt_carries_spec_and_contract() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cache.rs"), "struct Lru;").unwrap();
        let prompt = build_validation_prompt(&spec(), dir.path(), &PromptSettings::default());
        assert!(prompt.contains("LRU Cache"));
        assert!(prompt.contains("Implement an LRU cache"));
        assert!(prompt.contains("struct Lru;"));
        assert!(prompt.contains("\"completeness\""));
        assert!(prompt.contains("Do not modify any files"));
    }

    #[test]
    fn test_recovery_prompt_quotes_error_and_output() {
        let prompt = build_format_recovery_prompt(
            "original prompt",
            &ParseError::missing("status"),
            "I think it's fine",
        );
        assert!(prompt.starts_with("original prompt"));
        assert!(prompt.contains("`status`"));
        assert!(prompt.contains("I think it's fine"));
        assert!(prompt.contains("ONLY the JSON object"));
    }
}
