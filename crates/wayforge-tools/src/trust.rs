//! Trust persistence for the confirmation gate: a flat
//! `{tool_name: bool}` map, written atomically (write-temp-then-rename),
//! mirroring `wayforge-core::paths`' global/project data-root split.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use wayforge_core::paths;

#[derive(Debug, Default)]
pub struct TrustStore {
    path: PathBuf,
    trusted: HashMap<String, bool>,
}

impl TrustStore {
    pub fn load(path: PathBuf) -> Self {
        let trusted = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self { path, trusted }
    }

    pub fn project(workspace: &Path) -> Self {
        Self::load(workspace.join(".wayforge").join("trust.json"))
    }

    pub fn global() -> Self {
        Self::load(paths::user_data_root().join("trust.json"))
    }

    pub fn is_trusted(&self, tool_name: &str) -> bool {
        self.trusted.get(tool_name).copied().unwrap_or(false)
    }

    pub fn trust(&mut self, tool_name: &str) -> std::io::Result<()> {
        self.trusted.insert(tool_name.to_string(), true);
        self.persist()
    }

    fn persist(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.trusted)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_trust_decisions_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.json");

        let mut store = TrustStore::load(path.clone());
        assert!(!store.is_trusted("bash_exec"));
        store.trust("bash_exec").unwrap();

        let reloaded = TrustStore::load(path);
        assert!(reloaded.is_trusted("bash_exec"));
        assert!(!reloaded.is_trusted("write_file"));
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::load(dir.path().join("does-not-exist.json"));
        assert!(!store.is_trusted("anything"));
    }
}
