//! Background execution of long-running commands
//!
//! A spawned task reports only through the event bus and its handle. The
//! runner tracks which tasks are still running; entries disappear when the
//! task finishes or is abandoned.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task {0} was abandoned")]
    Abandoned(Uuid),

    #[error("Task {id} panicked: {message}")]
    Panicked { id: Uuid, message: String },
}

/// Snapshot of a running task
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: Uuid,
    pub label: String,
    pub started_at: DateTime<Utc>,
}

type Registry = Arc<Mutex<HashMap<Uuid, TaskInfo>>>;

/// Removes the registry entry however the task ends
struct Registration {
    id: Uuid,
    registry: Registry,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.registry.lock() {
            tasks.remove(&self.id);
        }
    }
}

pub struct TaskHandle<T> {
    id: Uuid,
    label: String,
    join: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the task at its next await point; partial writes stay as they are
    pub fn abandon(self) {
        debug!(task_id = %self.id, label = %self.label, "Abandoning task");
        self.join.abort();
    }

    pub async fn await_result(self) -> Result<T, TaskError> {
        self.join.await.map_err(|e| {
            if e.is_cancelled() {
                TaskError::Abandoned(self.id)
            } else {
                warn!(task_id = %self.id, "Task panicked: {}", e);
                TaskError::Panicked {
                    id: self.id,
                    message: e.to_string(),
                }
            }
        })
    }
}

#[derive(Clone, Default)]
pub struct TaskRunner {
    active: Registry,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `future` on the tokio runtime
    ///
    /// Dropping the returned handle detaches the task; it keeps running.
    pub fn spawn<F>(&self, label: impl Into<String>, future: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let id = Uuid::new_v4();
        let label = label.into();
        let info = TaskInfo {
            id,
            label: label.clone(),
            started_at: Utc::now(),
        };
        if let Ok(mut tasks) = self.active.lock() {
            tasks.insert(id, info);
        }

        let registration = Registration {
            id,
            registry: self.active.clone(),
        };
        debug!(task_id = %id, label = %label, "Spawning task");
        let join = tokio::spawn(async move {
            let _registration = registration;
            future.await
        });

        TaskHandle { id, label, join }
    }

    /// Running tasks, oldest first
    pub fn active(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = match self.active.lock() {
            Ok(tasks) => tasks.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        tasks.sort_by_key(|task| task.started_at);
        tasks
    }

    pub fn is_active(&self, id: Uuid) -> bool {
        self.active
            .lock()
            .map(|tasks| tasks.contains_key(&id))
            .unwrap_or(false)
    }
}
