//! Discovery of installed agent tools.

use super::{ToolId, ToolOverrides};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// How long a `--version` probe may take before the tool counts as missing.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A discovered agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInfo {
    pub id: ToolId,
    pub command: String,
    pub version: String,
}

/// The set of agents available for this run, in fallback priority order.
///
/// Built once at startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolInfo>,
}

impl ToolRegistry {
    /// Build a registry from already-known tools (sorted into priority order).
    pub fn from_tools(mut tools: Vec<ToolInfo>) -> Self {
        tools.sort_by_key(|t| t.id);
        tools.dedup_by_key(|t| t.id);
        Self { tools }
    }

    /// Probe every known tool with its version flag.
    pub async fn discover(overrides: &ToolOverrides) -> Self {
        let probes = ToolId::ALL.into_iter().map(|id| {
            let command = overrides
                .get(&id)
                .and_then(|o| o.command.clone())
                .unwrap_or_else(|| id.profile().command.to_string());
            async move {
                let version = probe_version(&command, id.profile().version_args).await;
                version.map(|version| ToolInfo {
                    id,
                    command,
                    version,
                })
            }
        });

        let tools: Vec<ToolInfo> = futures::future::join_all(probes)
            .await
            .into_iter()
            .flatten()
            .collect();

        for tool in &tools {
            tracing::debug!(tool = %tool.id, version = %tool.version, "detected agent");
        }

        Self::from_tools(tools)
    }

    pub fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    pub fn available(&self) -> Vec<ToolId> {
        self.tools.iter().map(|t| t.id).collect()
    }

    pub fn get(&self, id: ToolId) -> Option<&ToolInfo> {
        self.tools.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: ToolId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

async fn probe_version(command: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(PROBE_TIMEOUT, output).await.ok()?.ok()?;
    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let version = stdout.lines().next().unwrap_or("").trim().to_string();
    Some(if version.is_empty() {
        "unknown".to_string()
    } else {
        version
    })
}
