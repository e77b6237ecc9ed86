//! Host-wide project registry.
//!
//! One JSON document records every registered project, its index
//! stats, and whether the daemon watches it. Each mutation is a
//! read-modify-write under a process-level mutex, written through a
//! temp file and rename; no fsync-level durability is claimed.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{CodetectError, CodetectResult};
use crate::types::now_secs;

/// Registry document version.
const REGISTRY_VERSION: u32 = 1;

/// Index statistics recorded per project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStats {
    /// Symbol rows in the project's index.
    #[serde(default)]
    pub symbols: usize,
    /// Embedding rows in the project's index.
    #[serde(default)]
    pub embeddings: usize,
    /// On-disk size of the project's database.
    #[serde(default)]
    pub db_size_bytes: u64,
}

/// One registered project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredProject {
    /// Absolute project path.
    pub path: String,
    /// Display name, the last path component.
    pub name: String,
    /// When the project was registered (epoch seconds).
    pub added_at: i64,
    /// When the project was last indexed (epoch seconds).
    pub last_indexed: Option<i64>,
    /// Latest recorded index statistics.
    #[serde(default)]
    pub index_stats: ProjectStats,
    /// Whether the daemon watches this project.
    pub watch_enabled: bool,
}

/// Host-wide registry settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Whether newly added projects are watched by default.
    #[serde(default = "RegistrySettings::default_auto_watch")]
    pub auto_watch: bool,
    /// Watcher debounce interval in milliseconds.
    #[serde(default = "RegistrySettings::default_debounce_ms")]
    pub debounce_ms: u64,
    /// Upper bound on registered projects.
    #[serde(default = "RegistrySettings::default_max_projects")]
    pub max_projects: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            auto_watch: Self::default_auto_watch(),
            debounce_ms: Self::default_debounce_ms(),
            max_projects: Self::default_max_projects(),
        }
    }
}

impl RegistrySettings {
    fn default_auto_watch() -> bool {
        true
    }
    fn default_debounce_ms() -> u64 {
        500
    }
    fn default_max_projects() -> usize {
        50
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryDoc {
    version: u32,
    #[serde(default)]
    projects: Vec<RegisteredProject>,
    #[serde(default)]
    settings: RegistrySettings,
}

impl Default for RegistryDoc {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            projects: Vec::new(),
            settings: RegistrySettings::default(),
        }
    }
}

/// The registry file plus its process-level mutex.
pub struct Registry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Registry {
    /// Registry backed by an explicit file path.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Registry at the host's default config path.
    pub fn at_default_path() -> Self {
        Self::new(crate::config::registry_path())
    }

    fn load(&self) -> CodetectResult<RegistryDoc> {
        if !self.path.exists() {
            return Ok(RegistryDoc::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, doc: &RegistryDoc) -> CodetectResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(doc)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn with_doc<T>(
        &self,
        f: impl FnOnce(&mut RegistryDoc) -> CodetectResult<(T, bool)>,
    ) -> CodetectResult<T> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| CodetectError::Internal("registry mutex poisoned".into()))?;
        let mut doc = self.load()?;
        let (value, dirty) = f(&mut doc)?;
        if dirty {
            self.save(&doc)?;
        }
        Ok(value)
    }

    /// Register a project. Registering an already-present path is a
    /// no-op returning the existing entry.
    pub fn add(&self, path: &Path) -> CodetectResult<RegisteredProject> {
        let key = path.to_string_lossy().to_string();
        self.with_doc(|doc| {
            if let Some(existing) = doc.projects.iter().find(|p| p.path == key) {
                return Ok((existing.clone(), false));
            }
            if doc.projects.len() >= doc.settings.max_projects {
                return Err(CodetectError::RegistryFull {
                    max: doc.settings.max_projects,
                });
            }
            let project = RegisteredProject {
                path: key.clone(),
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| key.clone()),
                added_at: now_secs(),
                last_indexed: None,
                index_stats: ProjectStats::default(),
                watch_enabled: doc.settings.auto_watch,
            };
            doc.projects.push(project.clone());
            Ok((project, true))
        })
    }

    /// Remove a project; returns whether it was present.
    pub fn remove(&self, path: &Path) -> CodetectResult<bool> {
        let key = path.to_string_lossy().to_string();
        self.with_doc(|doc| {
            let before = doc.projects.len();
            doc.projects.retain(|p| p.path != key);
            let removed = doc.projects.len() != before;
            Ok((removed, removed))
        })
    }

    /// All registered projects.
    pub fn list(&self) -> CodetectResult<Vec<RegisteredProject>> {
        self.with_doc(|doc| Ok((doc.projects.clone(), false)))
    }

    /// Current settings.
    pub fn settings(&self) -> CodetectResult<RegistrySettings> {
        self.with_doc(|doc| Ok((doc.settings, false)))
    }

    /// Record fresh index statistics for a project.
    pub fn update_stats(&self, path: &Path, stats: ProjectStats) -> CodetectResult<()> {
        let key = path.to_string_lossy().to_string();
        self.with_doc(|doc| {
            let project = doc
                .projects
                .iter_mut()
                .find(|p| p.path == key)
                .ok_or_else(|| CodetectError::NotFound {
                    entity: format!("registered project {key}"),
                })?;
            project.index_stats = stats;
            Ok(((), true))
        })
    }

    /// Stamp a project's last-indexed time with the current time.
    pub fn set_last_indexed(&self, path: &Path) -> CodetectResult<()> {
        let key = path.to_string_lossy().to_string();
        self.with_doc(|doc| {
            let project = doc
                .projects
                .iter_mut()
                .find(|p| p.path == key)
                .ok_or_else(|| CodetectError::NotFound {
                    entity: format!("registered project {key}"),
                })?;
            project.last_indexed = Some(now_secs());
            Ok(((), true))
        })
    }

    /// Toggle watching for a project.
    pub fn set_watch_enabled(&self, path: &Path, enabled: bool) -> CodetectResult<()> {
        let key = path.to_string_lossy().to_string();
        self.with_doc(|doc| {
            let project = doc
                .projects
                .iter_mut()
                .find(|p| p.path == key)
                .ok_or_else(|| CodetectError::NotFound {
                    entity: format!("registered project {key}"),
                })?;
            project.watch_enabled = enabled;
            Ok(((), true))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(dir: &tempfile::TempDir) -> Registry {
        Registry::new(dir.path().join("registry.json"))
    }

    #[test]
    fn test_add_and_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reg = registry(&dir);

        let project = reg.add(Path::new("/tmp/my-project")).expect("add");
        assert_eq!(project.name, "my-project");
        assert!(project.watch_enabled, "auto_watch defaults on");

        let projects = reg.list().expect("list");
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].path, "/tmp/my-project");
    }

    #[test]
    fn test_add_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reg = registry(&dir);

        reg.add(Path::new("/tmp/p")).expect("first");
        reg.add(Path::new("/tmp/p")).expect("second");
        assert_eq!(reg.list().expect("list").len(), 1);
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reg = registry(&dir);

        reg.add(Path::new("/tmp/p")).expect("add");
        assert!(reg.remove(Path::new("/tmp/p")).expect("remove"));
        assert!(!reg.remove(Path::new("/tmp/p")).expect("second remove"));
        assert!(reg.list().expect("list").is_empty());
    }

    #[test]
    fn test_max_projects_bound() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reg = registry(&dir);

        for i in 0..50 {
            reg.add(Path::new(&format!("/tmp/p{i}"))).expect("add");
        }
        let result = reg.add(Path::new("/tmp/one-too-many"));
        assert!(matches!(result, Err(CodetectError::RegistryFull { max: 50 })));
    }

    #[test]
    fn test_update_stats_and_last_indexed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reg = registry(&dir);
        let path = Path::new("/tmp/p");

        reg.add(path).expect("add");
        reg.update_stats(
            path,
            ProjectStats {
                symbols: 42,
                embeddings: 7,
                db_size_bytes: 4096,
            },
        )
        .expect("stats");
        reg.set_last_indexed(path).expect("stamp");

        let project = &reg.list().expect("list")[0];
        assert_eq!(project.index_stats.symbols, 42);
        assert_eq!(project.index_stats.embeddings, 7);
        assert!(project.last_indexed.is_some());
    }

    #[test]
    fn test_update_stats_unknown_project() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reg = registry(&dir);
        let result = reg.update_stats(Path::new("/nope"), ProjectStats::default());
        assert!(matches!(result, Err(CodetectError::NotFound { .. })));
    }

    #[test]
    fn test_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let reg = registry(&dir);
            reg.add(Path::new("/tmp/p")).expect("add");
            reg.set_watch_enabled(Path::new("/tmp/p"), false).expect("toggle");
        }
        let reg = registry(&dir);
        let projects = reg.list().expect("list");
        assert_eq!(projects.len(), 1);
        assert!(!projects[0].watch_enabled);
    }
}
