//! Agent discovery: `quorum tools`.

use anyhow::Result;
use std::path::Path;

use quorum::config::QuorumToml;
use quorum::tools::ToolRegistry;

pub async fn cmd_tools(project_dir: &Path) -> Result<()> {
    let toml = QuorumToml::load_or_default(project_dir)?;
    let registry = ToolRegistry::discover(&toml.tools).await;
    quorum::ui::print_tools(&registry);
    Ok(())
}
