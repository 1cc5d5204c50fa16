//! Configuration for quorum.
//!
//! Settings are read from `.quorum/quorum.toml` and layered as
//! file → environment → CLI. Every section has defaults, so an empty or
//! missing file is a valid configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [run]
//! max_iterations = 5
//! max_iterations_per_run = 3
//! cycle_timeout_secs = 1800
//! stop_on_failure = false
//! specs_dir = "specs"
//!
//! [preflight]
//! enabled = true
//! threshold = 80
//! reduced_iterations = 1
//!
//! [sandbox]
//! enabled = false
//! runtime = "docker"
//! image = "ghcr.io/example/agents:latest"
//!
//! [throttle]
//! min_interval_ms = 2000
//! rate_limit_cooldown_secs = 60
//!
//! [tools.codex]
//! validator_args = ["exec", "--sandbox", "read-only", "-"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::tools::ToolOverrides;

/// Name of the per-project state directory.
pub const QUORUM_DIR: &str = ".quorum";

/// Environment variable that relocates the session store.
pub const STATE_DIR_ENV: &str = "QUORUM_STATE_DIR";

/// Environment variable that enables automation mode (no throttling or cooldowns).
pub const TEST_MODE_ENV: &str = "QUORUM_TEST_MODE";

/// Environment variable that overrides the sandbox image.
pub const SANDBOX_IMAGE_ENV: &str = "QUORUM_SANDBOX_IMAGE";

/// Iteration budgets and failure policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSection {
    /// Lifetime cycle budget per spec, across all invocations
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Cycle budget per spec for a single invocation
    #[serde(default = "default_max_iterations_per_run")]
    pub max_iterations_per_run: u32,
    /// Wall-clock limit for one agent invocation
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,
    /// Abort the whole session when a spec fails
    #[serde(default)]
    pub stop_on_failure: bool,
    /// Directory holding spec markdown files, relative to the project
    #[serde(default = "default_specs_dir")]
    pub specs_dir: PathBuf,
}

fn default_max_iterations() -> u32 {
    5
}

fn default_max_iterations_per_run() -> u32 {
    3
}

fn default_cycle_timeout_secs() -> u64 {
    1800
}

fn default_specs_dir() -> PathBuf {
    PathBuf::from("specs")
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_iterations_per_run: default_max_iterations_per_run(),
            cycle_timeout_secs: default_cycle_timeout_secs(),
            stop_on_failure: false,
            specs_dir: default_specs_dir(),
        }
    }
}

/// Validation-only pass before the first lead invocation of a spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Completeness at or above which the cycle allotment is reduced
    #[serde(default = "default_preflight_threshold")]
    pub threshold: u8,
    /// Cycle allotment when the preflight threshold is met
    #[serde(default = "default_reduced_iterations")]
    pub reduced_iterations: u32,
}

fn default_true() -> bool {
    true
}

fn default_preflight_threshold() -> u8 {
    80
}

fn default_reduced_iterations() -> u32 {
    1
}

impl Default for PreflightSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_preflight_threshold(),
            reduced_iterations: default_reduced_iterations(),
        }
    }
}

/// Container isolation for agent processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Container runtime binary (docker or podman)
    #[serde(default = "default_runtime")]
    pub runtime: String,
    /// Image providing the agent CLIs
    #[serde(default = "default_image")]
    pub image: String,
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "quorum-agents:latest".to_string()
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            runtime: default_runtime(),
            image: default_image(),
        }
    }
}

/// Pacing of external invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleSettings {
    /// Minimum spacing between two agent spawns
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Wait after switching leads on a rate limit
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,
    /// Time between SIGTERM and SIGKILL on interrupt
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
    /// Interval of "still running" log lines
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_min_interval_ms() -> u64 {
    2000
}

fn default_rate_limit_cooldown_secs() -> u64 {
    60
}

fn default_kill_grace_secs() -> u64 {
    5
}

fn default_heartbeat_secs() -> u64 {
    30
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown_secs(),
            kill_grace_secs: default_kill_grace_secs(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

/// Size caps for prompt assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSettings {
    /// Total characters of file contents in a validation prompt
    #[serde(default = "default_max_validation_chars")]
    pub max_validation_chars: usize,
    /// Characters taken from any single file
    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,
    /// Entries in the lead prompt's directory listing
    #[serde(default = "default_max_listing_entries")]
    pub max_listing_entries: usize,
}

fn default_max_validation_chars() -> usize {
    200_000
}

fn default_max_file_chars() -> usize {
    20_000
}

fn default_max_listing_entries() -> usize {
    200
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            max_validation_chars: default_max_validation_chars(),
            max_file_chars: default_max_file_chars(),
            max_listing_entries: default_max_listing_entries(),
        }
    }
}

/// The complete quorum.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuorumToml {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub preflight: PreflightSettings,
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub throttle: ThrottleSettings,
    #[serde(default)]
    pub prompt: PromptSettings,
    /// Per-tool command and argument overrides
    #[serde(default)]
    pub tools: ToolOverrides,
}

impl QuorumToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse quorum.toml")
    }

    /// Load `.quorum/quorum.toml` from the project, or defaults if absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(QUORUM_DIR).join("quorum.toml");
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply environment overrides on top of file settings.
    pub fn apply_env(&mut self) {
        if let Ok(image) = std::env::var(SANDBOX_IMAGE_ENV)
            && !image.trim().is_empty()
        {
            self.sandbox.image = image;
        }
    }

    /// Snapshot of the settings a session carries for its whole lifetime.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_iterations: self.run.max_iterations,
            max_iterations_per_run: self.run.max_iterations_per_run,
            cycle_timeout_secs: self.run.cycle_timeout_secs,
            permission_overrides: self.tools.clone(),
            sandbox: self.sandbox.clone(),
            stop_on_failure: self.run.stop_on_failure,
            preflight: self.preflight.clone(),
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.run.max_iterations == 0 {
            warnings.push("run.max_iterations is 0: every spec will be skipped".to_string());
        }
        if self.run.max_iterations_per_run == 0 {
            warnings.push("run.max_iterations_per_run is 0: no cycles will run".to_string());
        }
        if self.run.max_iterations_per_run > self.run.max_iterations {
            warnings.push(format!(
                "run.max_iterations_per_run ({}) exceeds run.max_iterations ({})",
                self.run.max_iterations_per_run, self.run.max_iterations
            ));
        }
        if self.preflight.threshold > 100 {
            warnings.push(format!(
                "preflight.threshold {} is above 100 and can never be met",
                self.preflight.threshold
            ));
        }
        if self.sandbox.enabled && self.sandbox.image.trim().is_empty() {
            warnings.push("sandbox is enabled but sandbox.image is empty".to_string());
        }

        warnings
    }
}

/// Settings persisted with a session so a resumed run behaves like the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_iterations: u32,
    pub max_iterations_per_run: u32,
    pub cycle_timeout_secs: u64,
    #[serde(default)]
    pub permission_overrides: ToolOverrides,
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub stop_on_failure: bool,
    #[serde(default)]
    pub preflight: PreflightSettings,
}

impl SessionConfig {
    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        QuorumToml::default().session_config()
    }
}

/// Directory holding session snapshots.
///
/// `QUORUM_STATE_DIR` wins; otherwise the user's local data directory, falling
/// back to the project's `.quorum/sessions`.
pub fn state_dir(project_dir: &Path) -> PathBuf {
    if let Ok(dir) = std::env::var(STATE_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .map(|d| d.join("quorum").join("sessions"))
        .unwrap_or_else(|| project_dir.join(QUORUM_DIR).join("sessions"))
}

/// Whether the run is automated (tests, CI): disables throttling and cooldowns.
pub fn automation_mode() -> bool {
    std::env::var(TEST_MODE_ENV)
        .map(|v| !v.is_empty() && v != "0" && v != "false")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolId;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = QuorumToml::parse("").unwrap();
        assert_eq!(config, QuorumToml::default());
        assert_eq!(config.run.max_iterations, 5);
        assert_eq!(config.run.max_iterations_per_run, 3);
        assert!(config.preflight.enabled);
        assert!(!config.sandbox.enabled);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parses_sections_and_tool_overrides() {
        let config = QuorumToml::parse(
            r#"
[run]
max_iterations = 2
stop_on_failure = true

[preflight]
enabled = false

[sandbox]
enabled = true
runtime = "podman"

[tools.codex]
command = "/usr/local/bin/codex"
validator_args = ["exec", "-"]
"#,
        )
        .unwrap();

        assert_eq!(config.run.max_iterations, 2);
        assert_eq!(config.run.max_iterations_per_run, 3);
        assert!(config.run.stop_on_failure);
        assert!(!config.preflight.enabled);
        assert_eq!(config.sandbox.runtime, "podman");
        let codex = config.tools.get(&ToolId::Codex).unwrap();
        assert_eq!(codex.command.as_deref(), Some("/usr/local/bin/codex"));
        assert!(codex.lead_args.is_none());
    }

    #[test]
    fn test_rejects_unknown_tool_section() {
        let result = QuorumToml::parse("[tools.cursor]\ncommand = \"cursor\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_flags_inconsistent_budgets() {
        let mut config = QuorumToml::default();
        config.run.max_iterations = 2;
        config.run.max_iterations_per_run = 4;
        config.preflight.threshold = 120;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("exceeds"));
        assert!(warnings[1].contains("preflight.threshold"));
    }

    #[test]
    fn test_session_config_carries_run_settings() {
        let mut config = QuorumToml::default();
        config.run.cycle_timeout_secs = 90;
        config.run.stop_on_failure = true;
        let session = config.session_config();
        assert_eq!(session.cycle_timeout(), Duration::from_secs(90));
        assert!(session.stop_on_failure);
        assert_eq!(session.max_iterations, 5);
    }

    #[test]
    fn test_serialized_defaults_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let quorum_dir = dir.path().join(QUORUM_DIR);
        std::fs::create_dir_all(&quorum_dir).unwrap();
        let mut config = QuorumToml::default();
        config.run.max_iterations = 9;
        let content = toml::to_string_pretty(&config).unwrap();
        std::fs::write(quorum_dir.join("quorum.toml"), content).unwrap();

        let loaded = QuorumToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.run.max_iterations, 9);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = QuorumToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.run, RunSection::default());
    }
}
