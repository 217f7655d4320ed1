//! Artifact store (C10): a single rooted directory layout with stable
//! relative paths, atomic writes, and missing-file tolerance, covering
//! the full `planning/`, `results/`, `checkpoints/`, `architecture/`,
//! `spec/` layout a run produces.
//!
//! Kept generic over the caller's serde types rather than depending on
//! `wayforge-agent`'s concrete data model, so the dependency edge runs
//! one way: `wayforge-agent` depends on this crate, not the reverse.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ArtifactError;

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backlog_path(&self) -> PathBuf {
        self.root.join("planning").join("backlog.json")
    }

    pub fn sprint_path(&self, sprint_id: &str) -> PathBuf {
        self.root.join("planning").join("sprints").join(format!("{sprint_id}.json"))
    }

    pub fn results_json_path(&self, sprint_id: &str) -> PathBuf {
        self.root.join("results").join(format!("{sprint_id}-results.json"))
    }

    pub fn results_md_path(&self, sprint_id: &str) -> PathBuf {
        self.root.join("results").join(format!("{sprint_id}-results.md"))
    }

    pub fn checkpoint_path(&self, sprint_id: &str) -> PathBuf {
        self.root.join("checkpoints").join(format!("complete-{sprint_id}.json"))
    }

    pub fn architecture_dir(&self) -> PathBuf {
        self.root.join("architecture")
    }

    pub fn spec_dir(&self) -> PathBuf {
        self.root.join("spec")
    }

    /// Serialize `value` as pretty-printed (two-space indent) JSON and
    /// write it atomically (write-temp-then-rename) to `path`, creating
    /// parent directories as needed.
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), ArtifactError> {
        let json = to_pretty_json(value, path)?;
        self.write_atomic(path, json.as_bytes())
    }

    /// Read and deserialize JSON from `path`. A missing file yields
    /// `T::default()` rather than an error: reads tolerate missing
    /// files, returning empty defaults.
    pub fn read_json<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T, ArtifactError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|source| ArtifactError::Json { path: path.display().to_string(), source }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(source) => Err(ArtifactError::Io { path: path.display().to_string(), source }),
        }
    }

    /// Write raw text (e.g. a results Markdown summary) atomically.
    pub fn write_text(&self, path: &Path, contents: &str) -> Result<(), ArtifactError> {
        self.write_atomic(path, contents.as_bytes())
    }

    /// Read raw text, returning `None` if the file is missing.
    pub fn read_text(&self, path: &Path) -> Result<Option<String>, ArtifactError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ArtifactError::Io { path: path.display().to_string(), source }),
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ArtifactError::Io { path: parent.display().to_string(), source })?;
        }
        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        std::fs::write(&tmp, bytes).map_err(|source| ArtifactError::Io { path: tmp.display().to_string(), source })?;
        std::fs::rename(&tmp, path).map_err(|source| ArtifactError::Io { path: path.display().to_string(), source })?;
        Ok(())
    }
}

fn to_pretty_json<T: Serialize>(value: &T, path: &Path) -> Result<String, ArtifactError> {
    let buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
    let mut ser = serde_json::Serializer::with_formatter(buf, formatter);
    value.serialize(&mut ser).map_err(|source| ArtifactError::Json { path: path.display().to_string(), source })?;
    String::from_utf8(ser.into_inner()).map_err(|e| ArtifactError::Io {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn round_trips_json_through_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.backlog_path();

        let value = Sample { name: "demo".into(), count: 3 };
        store.write_json(&path, &value).unwrap();

        let reloaded: Sample = store.read_json(&path).unwrap();
        assert_eq!(reloaded, value);
    }

    #[test]
    fn missing_file_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let reloaded: Sample = store.read_json(&store.backlog_path()).unwrap();
        assert_eq!(reloaded, Sample::default());
    }

    #[test]
    fn json_uses_two_space_indentation() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.sprint_path("sprint-1");
        store.write_json(&path, &Sample { name: "x".into(), count: 1 }).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  \"name\""));
    }

    #[test]
    fn text_round_trips_and_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.results_md_path("sprint-1");

        assert_eq!(store.read_text(&path).unwrap(), None);
        store.write_text(&path, "# Results\n").unwrap();
        assert_eq!(store.read_text(&path).unwrap(), Some("# Results\n".to_string()));
    }

    #[test]
    fn path_layout_matches_the_spec() {
        let store = ArtifactStore::new("/tmp/workspace");
        assert_eq!(store.backlog_path(), PathBuf::from("/tmp/workspace/planning/backlog.json"));
        assert_eq!(store.sprint_path("s1"), PathBuf::from("/tmp/workspace/planning/sprints/s1.json"));
        assert_eq!(store.results_json_path("s1"), PathBuf::from("/tmp/workspace/results/s1-results.json"));
        assert_eq!(store.checkpoint_path("s1"), PathBuf::from("/tmp/workspace/checkpoints/complete-s1.json"));
    }
}
