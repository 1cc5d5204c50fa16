//! Session snapshots on disk.
//!
//! Each session is one JSON file, `<sessions_dir>/<id>.json`, rewritten in
//! full on every persist (temp file + rename). The working directory links to
//! its active session through `.quorum/current-session`, which holds the id.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Session, SessionStatus};
use crate::config::{QUORUM_DIR, SessionConfig};
use crate::spec::SpecRecord;
use crate::tools::RoleAssignment;

const POINTER_FILE: &str = "current-session";

pub struct SessionStore {
    sessions_dir: PathBuf,
    working_dir: PathBuf,
}

impl SessionStore {
    pub fn new(sessions_dir: &Path, working_dir: &Path) -> Self {
        Self {
            sessions_dir: sessions_dir.to_path_buf(),
            working_dir: working_dir.to_path_buf(),
        }
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn pointer_path(&self) -> PathBuf {
        self.working_dir.join(QUORUM_DIR).join(POINTER_FILE)
    }

    pub fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{id}.json"))
    }

    /// Create a session, persist it and link it from the working directory.
    pub fn create(
        &self,
        specs: &[SpecRecord],
        roles: RoleAssignment,
        config: SessionConfig,
    ) -> Result<Session> {
        let mut session = Session::new(&self.working_dir, specs, roles, config);
        session.status = SessionStatus::InProgress;
        self.persist(&mut session)?;

        let pointer = self.pointer_path();
        if let Some(parent) = pointer.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        write_atomic(&pointer, session.id.as_bytes())?;

        tracing::info!(session = %session.id, specs = session.specs.len(), "created session");
        Ok(session)
    }

    /// The linked session, or `None` if there is none or it cannot be read.
    pub fn load(&self) -> Option<Session> {
        let pointer = self.pointer_path();
        let id = fs::read_to_string(&pointer).ok()?;
        let id = id.trim();
        if id.is_empty() {
            return None;
        }

        let path = self.session_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "linked session file is unreadable");
                return None;
            }
        };
        let session: Session = match serde_json::from_str(&content) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "linked session file is corrupt");
                return None;
            }
        };
        if let Err(e) = session.check_invariants() {
            tracing::warn!(session = %session.id, error = %e, "linked session is inconsistent");
            return None;
        }
        Some(session)
    }

    /// Write the full session snapshot, bumping `updated_at`.
    pub fn persist(&self, session: &mut Session) -> Result<()> {
        session.updated_at = Utc::now();
        fs::create_dir_all(&self.sessions_dir).with_context(|| {
            format!("Failed to create sessions directory: {}", self.sessions_dir.display())
        })?;
        let json = serde_json::to_string_pretty(session).context("Failed to serialize session")?;
        write_atomic(&self.session_path(&session.id), json.as_bytes())
    }

    /// Mark completed, persist, and remove the working-directory link.
    pub fn complete(&self, session: &mut Session) -> Result<()> {
        session.status = SessionStatus::Completed;
        self.persist(session)?;
        self.unlink()
    }

    /// Mark abandoned, persist, and remove the working-directory link.
    pub fn abandon(&self, session: &mut Session) -> Result<()> {
        session.status = SessionStatus::Abandoned;
        self.persist(session)?;
        self.unlink()
    }

    fn unlink(&self) -> Result<()> {
        let pointer = self.pointer_path();
        match fs::remove_file(&pointer) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove session link: {}", pointer.display())),
        }
    }
}

/// Write `bytes` to a sibling temp file, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
    fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
