//! Path resolution helpers shared by the CLI and artifact store.

use std::path::PathBuf;

/// `~/.wayforge` — per-user data root (global trust store, cross-project
/// defaults).
pub fn user_data_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wayforge")
}

/// `<workspace>/.wayforge` — per-project data root (artifact store root,
/// project-scoped trust store).
pub fn project_data_root(workspace: &std::path::Path) -> PathBuf {
    workspace.join(".wayforge")
}
