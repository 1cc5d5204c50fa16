//! Spec records and the markdown loader that produces them.
//!
//! A spec is a markdown file with optional YAML front matter:
//!
//! ```markdown
//! ---
//! id: auth
//! name: Authentication
//! complexity: high
//! maturity: 3
//! depends_on: [storage]
//! ---
//! # Authentication
//! ...
//! ```
//!
//! Without front matter the file stem becomes the id and name.

pub mod order;

pub use order::order_specs;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Rough size of a spec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Complexity::Low => write!(f, "low"),
            Complexity::Medium => write!(f, "medium"),
            Complexity::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub complexity: Complexity,
    /// Maturity level, 1 (sketch) to 5 (frozen)
    #[serde(default = "default_maturity")]
    pub maturity: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

fn default_maturity() -> u8 {
    3
}

/// One spec as handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecRecord {
    /// File name, used for ordering tie-breaks and report paths
    pub file: String,
    pub path: PathBuf,
    pub meta: SpecMeta,
    /// Background material: ordered first, never implemented
    pub context_only: bool,
    /// Markdown body without front matter
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    id: Option<String>,
    name: Option<String>,
    complexity: Option<Complexity>,
    maturity: Option<u8>,
    #[serde(default, alias = "dependsOn")]
    depends_on: Vec<String>,
    #[serde(default, alias = "contextOnly")]
    context_only: bool,
}

/// Load every `*.md` file in `dir`, sorted by file name.
pub fn load_specs(dir: &Path) -> Result<Vec<SpecRecord>> {
    if !dir.is_dir() {
        anyhow::bail!("Specs directory not found: {}", dir.display());
    }

    let pattern = dir.join("*.md");
    let pattern = pattern.to_string_lossy();
    let mut paths: Vec<PathBuf> = glob::glob(&pattern)
        .context("Invalid specs directory pattern")?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    paths.iter().map(|path| load_spec(path)).collect()
}

/// Load a single spec file.
pub fn load_spec(path: &Path) -> Result<SpecRecord> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read spec file: {}", path.display()))?;
    parse_spec(path, &raw)
}

/// Parse spec text, splitting off and interpreting front matter.
pub fn parse_spec(path: &Path, raw: &str) -> Result<SpecRecord> {
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file.clone());

    let (front, body) = split_front_matter(raw);
    let front: FrontMatter = match front {
        Some(yaml) if !yaml.trim().is_empty() => serde_yaml::from_str(yaml)
            .with_context(|| format!("Invalid front matter in {}", path.display()))?,
        _ => FrontMatter::default(),
    };

    let maturity = front.maturity.unwrap_or_else(default_maturity);
    if !(1..=5).contains(&maturity) {
        anyhow::bail!(
            "Spec {} has maturity {}, expected 1-5",
            path.display(),
            maturity
        );
    }

    let id = front.id.unwrap_or_else(|| stem.clone());
    Ok(SpecRecord {
        file,
        path: path.to_path_buf(),
        meta: SpecMeta {
            name: front.name.unwrap_or_else(|| id.clone()),
            id,
            complexity: front.complexity.unwrap_or_default(),
            maturity,
            depends_on: front.depends_on,
        },
        context_only: front.context_only,
        content: body.to_string(),
    })
}

/// Split `---` delimited front matter from the body.
fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let text = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return (None, text);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let front = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(front), body.trim_start_matches(['\r', '\n']));
        }
        offset += line.len();
    }
    (None, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_front_matter() {
        let raw = "---\nid: auth\nname: Authentication\ncomplexity: high\nmaturity: 4\ndepends_on: [storage, config]\n---\n# Auth\n\nLogin flow.\n";
        let spec = parse_spec(Path::new("specs/02-auth.md"), raw).unwrap();
        assert_eq!(spec.file, "02-auth.md");
        assert_eq!(spec.meta.id, "auth");
        assert_eq!(spec.meta.name, "Authentication");
        assert_eq!(spec.meta.complexity, Complexity::High);
        assert_eq!(spec.meta.maturity, 4);
        assert_eq!(spec.meta.depends_on, vec!["storage", "config"]);
        assert!(!spec.context_only);
        assert!(spec.content.starts_with("# Auth"));
    }

    #[test]
    fn test_falls_back_to_file_stem() {
        let spec = parse_spec(Path::new("specs/storage.md"), "# Storage\n").unwrap();
        assert_eq!(spec.meta.id, "storage");
        assert_eq!(spec.meta.name, "storage");
        assert_eq!(spec.meta.complexity, Complexity::Medium);
        assert_eq!(spec.content, "# Storage\n");
    }

    #[test]
    fn test_accepts_camel_case_context_flag() {
        let raw = "---\ncontextOnly: true\n---\nArchitecture notes\n";
        let spec = parse_spec(Path::new("00-architecture.md"), raw).unwrap();
        assert!(spec.context_only);
        assert_eq!(spec.meta.id, "00-architecture");
    }

    #[test]
    fn test_rejects_out_of_range_maturity() {
        let raw = "---\nmaturity: 9\n---\nbody\n";
        assert!(parse_spec(Path::new("x.md"), raw).is_err());
    }

    #[test]
    fn test_unterminated_front_matter_is_body() {
        let raw = "---\nid: x\nno closing fence\n";
        let spec = parse_spec(Path::new("loose.md"), raw).unwrap();
        assert_eq!(spec.meta.id, "loose");
        assert_eq!(spec.content, raw);
    }

    #[test]
    fn test_load_specs_reads_markdown_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.md"), "# B\n").unwrap();
        std::fs::write(dir.path().join("a.md"), "# A\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let specs = load_specs(dir.path()).unwrap();
        let files: Vec<&str> = specs.iter().map(|s| s.file.as_str()).collect();
        assert_eq!(files, vec!["a.md", "b.md"]);
    }

    #[test]
    fn test_load_specs_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_specs(&dir.path().join("missing")).is_err());
    }
}
