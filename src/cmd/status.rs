//! Linked session overview: `quorum status`.

use anyhow::Result;
use std::path::Path;

use quorum::config::state_dir;
use quorum::session::SessionStore;

pub fn cmd_status(project_dir: &Path) -> Result<()> {
    let store = SessionStore::new(&state_dir(project_dir), project_dir);
    match store.load() {
        Some(session) => quorum::ui::print_session(&session),
        None => {
            println!();
            println!("No active session in {}", project_dir.display());
            println!();
            println!("Run 'quorum run' to start one.");
            println!();
        }
    }
    Ok(())
}
