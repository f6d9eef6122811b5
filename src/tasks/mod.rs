//! Registry of asynchronous backend jobs the user is waiting on.
//!
//! Each tracked job is a [`TaskItem`]. The registry owns the list, keeps the
//! newest task first, and merges every change into the list held in local
//! storage, so it survives a restart and coexists with other processes
//! editing the same list. Status only moves forward:
//! `queued → running → completed | failed`.

pub mod poller;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::storage::{SharedLocalStore, Slot, StorageError};

/// Storage key holding the serialized task list.
pub const TASKS_STORAGE_KEY: &str = "docubot_tasks";

/// What kind of backend job a task tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Repository analysis (parsing + embedding)
    Analysis,
    /// Documentation generation
    Docs,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Analysis => write!(f, "analysis"),
            Self::Docs => write!(f, "docs"),
        }
    }
}

/// Client-side status of a tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Submitted, not started yet
    Queued,
    /// A worker picked it up
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error, or its status could not be read
    Failed,
}

impl TaskStatus {
    /// Still worth polling.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` goes forward.
    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        self.is_active() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A tracked backend job.
///
/// Field names on the wire match what earlier clients stored, so an existing
/// `docubot_tasks` value loads unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    /// Backend job id
    pub id: String,

    #[serde(rename = "type")]
    pub kind: TaskKind,

    /// Repository the job runs against
    #[serde(rename = "repoId")]
    pub subject_id: i64,

    /// Human-readable description
    pub label: String,

    pub status: TaskStatus,

    /// Millisecond precision, so a stored task reloads equal to itself
    #[serde(rename = "createdAt", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl TaskItem {
    pub fn new(id: impl Into<String>, kind: TaskKind, subject_id: i64, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            subject_id,
            label: label.into(),
            status: TaskStatus::Queued,
            created_at: Utc::now().trunc_subsecs(3),
        }
    }

    /// A freshly queued repository analysis.
    pub fn analysis(id: impl Into<String>, repo_id: i64) -> Self {
        Self::new(id, TaskKind::Analysis, repo_id, "Repository analysis")
    }

    /// A freshly queued docs generation job.
    pub fn docs(id: impl Into<String>, repo_id: i64, doc_type: &str) -> Self {
        let label = if doc_type == "readme" {
            "Generate README"
        } else {
            "Generate API Docs"
        };
        Self::new(id, TaskKind::Docs, repo_id, label)
    }
}

/// Owned, persisted list of tracked tasks, newest first.
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: Vec<TaskItem>,
    store: SharedLocalStore,
}

impl TaskRegistry {
    /// Load the registry from storage.
    ///
    /// A missing, corrupt or non-array value yields an empty registry.
    pub async fn load(store: SharedLocalStore) -> Self {
        let raw = store.get(Slot::Persistent, TASKS_STORAGE_KEY).await;
        let tasks = parse_tasks(raw.as_deref());
        tracing::debug!(count = tasks.len(), "Loaded tracked tasks");
        Self { tasks, store }
    }

    pub fn tasks(&self) -> &[TaskItem] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&TaskItem> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Snapshot of tasks still queued or running.
    pub fn active(&self) -> Vec<TaskItem> {
        self.tasks
            .iter()
            .filter(|t| t.status.is_active())
            .cloned()
            .collect()
    }

    /// Start tracking `task`, newest first. A task with the same id replaces
    /// the old entry.
    pub async fn add(&mut self, task: TaskItem) -> Result<(), StorageError> {
        tracing::info!(task_id = %task.id, kind = %task.kind, repo_id = task.subject_id, "Tracking task");
        self.commit(TaskChange::Add(task)).await?;
        Ok(())
    }

    /// Move a task forward to `status`.
    ///
    /// Returns `Ok(false)` without writing when the task is unknown or the
    /// move would not go forward.
    pub async fn update_status(&mut self, id: &str, status: TaskStatus) -> Result<bool, StorageError> {
        self.commit(TaskChange::Status(id.to_string(), status)).await
    }

    /// Stop tracking a task. Unknown ids are a no-op.
    pub async fn remove(&mut self, id: &str) -> Result<bool, StorageError> {
        self.commit(TaskChange::Remove(id.to_string())).await
    }

    /// The serialized form written to storage.
    pub fn to_json(&self) -> Result<String, StorageError> {
        Ok(serde_json::to_string(&self.tasks)?)
    }

    /// Apply `change` to the stored list as it is on disk now, then adopt the
    /// merged list. Tasks written by other processes survive.
    async fn commit(&mut self, change: TaskChange) -> Result<bool, StorageError> {
        let mut merged = None;
        let mut applied = false;
        self.store
            .update(Slot::Persistent, TASKS_STORAGE_KEY, |raw| {
                let mut tasks = parse_tasks(raw);
                applied = change.apply(&mut tasks);
                let next = if applied {
                    Some(serde_json::to_string(&tasks)?)
                } else {
                    raw.map(str::to_string)
                };
                merged = Some(tasks);
                Ok(next)
            })
            .await?;
        if let Some(tasks) = merged {
            self.tasks = tasks;
        }
        Ok(applied)
    }
}

/// One edit to the task list.
#[derive(Debug)]
enum TaskChange {
    Add(TaskItem),
    Status(String, TaskStatus),
    Remove(String),
}

impl TaskChange {
    /// Returns whether `tasks` changed.
    fn apply(self, tasks: &mut Vec<TaskItem>) -> bool {
        match self {
            Self::Add(task) => {
                tasks.retain(|t| t.id != task.id);
                tasks.insert(0, task);
                true
            }
            Self::Status(id, status) => {
                // A task dismissed elsewhere stays dismissed.
                let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
                    return false;
                };
                if !task.status.can_advance_to(status) {
                    if task.status != status {
                        tracing::debug!(task_id = %id, from = %task.status, to = %status, "Ignoring backward status change");
                    }
                    return false;
                }
                tracing::debug!(task_id = %id, from = %task.status, to = %status, "Task status changed");
                task.status = status;
                true
            }
            Self::Remove(id) => {
                let before = tasks.len();
                tasks.retain(|t| t.id != id);
                tasks.len() != before
            }
        }
    }
}

fn parse_tasks(raw: Option<&str>) -> Vec<TaskItem> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable task list in storage: {}", e);
        Vec::new()
    })
}

/// Registry shared between the poller and user actions.
pub type SharedTaskRegistry = Arc<RwLock<TaskRegistry>>;
