use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use uuid::Uuid;

use super::types::{NewTask, Task, TaskStatus, TransitionError};
use crate::error::FailureReason;
use crate::result::TaskResult;

/// Authoritative record of every task created by this process.
pub struct TaskStore {
    persist: bool,
    path: Option<PathBuf>,
    tasks: RwLock<HashMap<String, Task>>,
    /// Held from snapshot to rename so the file never goes back in time.
    save_lock: Mutex<()>,
}

impl TaskStore {
    pub fn new(persist: bool, path: Option<PathBuf>) -> Self {
        Self {
            persist,
            path,
            tasks: RwLock::new(HashMap::new()),
            save_lock: Mutex::new(()),
        }
    }

    /// Opens a persisted store, restoring terminal records from `path`.
    /// Records left pending/processing by a previous process are dropped.
    pub fn open(path: PathBuf) -> Self {
        let store = Self::new(true, Some(path.clone()));
        if let Some(tasks) = Self::load_from_disk(path) {
            let mut map = store.tasks.write().unwrap_or_else(|e| e.into_inner());
            for task in tasks {
                if task.status.is_terminal() {
                    map.insert(task.id.clone(), task);
                } else {
                    tracing::warn!("dropping interrupted task {} ({})", task.id, task.status.as_str());
                }
            }
            tracing::info!("restored {} task records", map.len());
        }
        store
    }

    pub fn create(&self, new: NewTask) -> Task {
        let task = Task {
            id: Uuid::new_v4().to_string(),
            status: TaskStatus::Pending,
            input_fingerprint: new.input_fingerprint,
            package_identifier: new.package_identifier,
            filename: new.filename,
            replacement_requests: new.replacement_requests,
            declared_architecture: new.declared_architecture,
            result: None,
            failure_reason: None,
            reason: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        if let Ok(mut map) = self.tasks.write() {
            map.insert(task.id.clone(), task.clone());
        }
        self.save_if_needed();
        task
    }

    pub fn mark_processing(&self, id: &str) -> Result<Task, TransitionError> {
        self.transition(id, TaskStatus::Processing, |task| {
            task.started_at = Some(Utc::now());
        })
    }

    pub fn complete(&self, id: &str, result: TaskResult) -> Result<Task, TransitionError> {
        self.transition(id, TaskStatus::Complete, |task| {
            task.finished_at = Some(result.finished_at);
            task.result = Some(result);
        })
    }

    pub fn fail(&self, id: &str, reason: FailureReason) -> Result<Task, TransitionError> {
        self.transition(id, TaskStatus::Failed, |task| {
            task.finished_at = Some(Utc::now());
            task.reason = Some(reason.to_string());
            task.failure_reason = Some(reason);
        })
    }

    fn transition(
        &self,
        id: &str,
        next: TaskStatus,
        apply: impl FnOnce(&mut Task),
    ) -> Result<Task, TransitionError> {
        let updated = {
            let mut map = self.tasks.write().unwrap_or_else(|e| e.into_inner());
            let task = map
                .get_mut(id)
                .ok_or_else(|| TransitionError::NotFound(id.to_string()))?;
            if !task.status.can_transition_to(next) {
                return Err(TransitionError::Illegal {
                    id: id.to_string(),
                    from: task.status,
                    to: next,
                });
            }
            task.status = next;
            apply(task);
            task.clone()
        };
        self.save_if_needed();
        Ok(updated)
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        let map = self.tasks.read().ok()?;
        map.get(id).cloned()
    }

    pub fn list(&self, limit: usize) -> Vec<Task> {
        let map = match self.tasks.read() {
            Ok(lock) => lock,
            Err(_) => return vec![],
        };
        let mut items: Vec<Task> = map.values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        items
    }

    fn save_if_needed(&self) {
        if !self.persist {
            return;
        }
        let Some(path) = &self.path else {
            return;
        };
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        let serialized = {
            let map = self.tasks.read().unwrap_or_else(|e| e.into_inner());
            let list: Vec<&Task> = map.values().collect();
            match serde_json::to_vec_pretty(&list) {
                Ok(serialized) => serialized,
                Err(err) => {
                    tracing::warn!("failed to serialize tasks: {}", err);
                    return;
                }
            }
        };
        if let Err(err) = write_replacing(path, &serialized) {
            tracing::warn!("failed to persist tasks to {}: {}", path.display(), err);
        }
    }

    pub fn load_from_disk(path: PathBuf) -> Option<Vec<Task>> {
        let data = fs::read_to_string(path).ok()?;
        serde_json::from_str::<Vec<Task>>(&data).ok()
    }
}

fn write_replacing(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(body)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
