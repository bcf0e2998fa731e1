//! File-backed harness state: one JSON document per harness identifier.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use imagetest_core::HarnessState;

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the state file for `id`.
    ///
    /// Path separators and `%` are percent-encoded, so distinct ids never
    /// share a file and every file stays inside the store directory.
    pub fn path_for(&self, id: &str) -> PathBuf {
        let mut file = String::with_capacity(id.len());
        for c in id.chars() {
            match c {
                '/' | '\\' | '%' => file.push_str(&format!("%{:02X}", c as u32)),
                c => file.push(c),
            }
        }
        self.dir.join(format!("{file}.json"))
    }

    pub fn load(&self, id: &str) -> Result<Option<HarnessState>> {
        let path = self.path_for(id);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let state = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse state file {}", path.display()))?;
        Ok(Some(state))
    }

    pub fn save(&self, state: &HarnessState) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create state directory {}", self.dir.display()))?;
        let path = self.path_for(state.id());
        let contents = serde_json::to_string_pretty(state).context("failed to serialize state")?;
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Remove the state for `id`. Missing state is not an error.
    pub fn remove(&self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
        }
    }

    /// All stored states, sorted by id.
    pub fn list(&self) -> Result<Vec<HarnessState>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", self.dir.display()));
            }
        };

        let mut states = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            match serde_json::from_str::<HarnessState>(&contents) {
                Ok(state) => states.push(state),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable state file");
                }
            }
        }
        states.sort_by(|a, b| a.spec.id.cmp(&b.spec.id));
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imagetest_core::spec::HarnessSpec;

    fn state(id: &str, skipped: bool) -> HarnessState {
        HarnessState {
            spec: HarnessSpec::new(id, "test"),
            skipped,
        }
    }

    #[test]
    fn save_load_remove() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().join("harnesses"));

        assert!(store.load("h1").unwrap().is_none());

        let original = state("h1", true);
        store.save(&original).unwrap();
        assert_eq!(store.load("h1").unwrap(), Some(original));

        store.remove("h1").unwrap();
        store.remove("h1").unwrap();
        assert!(store.load("h1").unwrap().is_none());
    }

    #[test]
    fn list_is_sorted_and_ignores_junk() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        assert!(store.list().unwrap().is_empty());

        store.save(&state("b", false)).unwrap();
        store.save(&state("a", false)).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "hi").unwrap();
        std::fs::write(tmp.path().join("broken.json"), "{").unwrap();

        let ids: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|s| s.spec.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn list_of_missing_dir_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().join("never-created"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn ids_with_separators_stay_inside_dir() {
        let store = StateStore::new("/state");
        assert_eq!(store.path_for("team/h1"), PathBuf::from("/state/team%2Fh1.json"));
        assert_eq!(store.path_for("a\\b"), PathBuf::from("/state/a%5Cb.json"));
    }

    #[test]
    fn similar_ids_do_not_share_a_file() {
        let store = StateStore::new("/state");
        let ids = ["a/b", "a_b", "a%2Fb", "a\\b"];
        let paths: std::collections::BTreeSet<PathBuf> =
            ids.iter().map(|id| store.path_for(id)).collect();
        assert_eq!(paths.len(), ids.len());
    }

    #[test]
    fn similar_ids_keep_separate_state() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());

        store.save(&state("a/b", false)).unwrap();
        store.save(&state("a_b", true)).unwrap();

        assert!(!store.load("a/b").unwrap().unwrap().skipped);
        assert!(store.load("a_b").unwrap().unwrap().skipped);
        assert_eq!(store.list().unwrap().len(), 2);
    }
}
