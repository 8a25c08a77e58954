//! File-based task store — lightweight persistence for scheduled-task
//! definitions. Tasks saved as JSON — human-readable, survives restarts.
//! Only reads/writes on task changes, not on every tick.

use std::path::{Path, PathBuf};

use pageshot_core::error::{PageshotError, Result};

use crate::tasks::ScheduledTask;

/// File-based task store.
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    /// Create a new task store at the given directory.
    pub fn new(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).ok();
        Self {
            path: dir.to_path_buf(),
        }
    }

    /// Default store path (~/.pageshot/scheduler).
    pub fn default_path() -> PathBuf {
        pageshot_core::config::PageshotConfig::home_dir().join("scheduler")
    }

    fn file(&self) -> PathBuf {
        self.path.join("tasks.json")
    }

    /// Save all tasks to disk. Writes to a sibling temp file and renames
    /// it over tasks.json, so a crash mid-write never leaves a truncated
    /// store behind.
    pub fn save(&self, tasks: &[ScheduledTask]) -> Result<()> {
        let json = serde_json::to_string_pretty(tasks)
            .map_err(|e| PageshotError::Store(format!("serialize tasks: {e}")))?;
        let tmp = self.path.join("tasks.json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, self.file())?;
        tracing::debug!("💾 Saved {} task(s) to {}", tasks.len(), self.file().display());
        Ok(())
    }

    /// Load tasks from disk. A missing or unreadable file yields an empty
    /// registry rather than blocking startup.
    pub fn load(&self) -> Vec<ScheduledTask> {
        let file = self.file();
        if !file.exists() {
            return Vec::new();
        }
        match std::fs::read_to_string(&file) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("⚠️ Failed to parse tasks.json: {e}");
                Vec::new()
            }),
            Err(e) => {
                tracing::warn!("⚠️ Failed to read tasks.json: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::NotificationSettings;
    use pageshot_core::types::CaptureRequest;

    fn temp_store() -> (TaskStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("pageshot-store-{}", uuid::Uuid::new_v4()));
        (TaskStore::new(&dir), dir)
    }

    fn sample_task() -> ScheduledTask {
        ScheduledTask::new(
            CaptureRequest::for_url("https://example.com"),
            "0 8 * * *",
            NotificationSettings::default(),
        )
    }

    #[test]
    fn test_save_and_load() {
        let (store, dir) = temp_store();
        let task = sample_task();
        store.save(&[task.clone()]).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, task.id);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let (store, dir) = temp_store();
        store.save(&[sample_task()]).unwrap();
        store.save(&[]).unwrap();

        assert!(!dir.join("tasks.json.tmp").exists());
        assert!(store.load().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let (store, dir) = temp_store();
        assert!(store.load().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let (store, dir) = temp_store();
        std::fs::write(dir.join("tasks.json"), "{not json").unwrap();
        assert!(store.load().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
