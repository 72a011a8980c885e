//! Task sources consumed by the dispatcher.
//!
//! The production source is the HTTP task store (`/pending_tasks`); the
//! in-memory source backs that store and stands in for it in tests.

use crate::error::SourceError;
use async_trait::async_trait;
use medfleet_core::Task;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Store of pending delivery tasks
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// All pending tasks, oldest first
    async fn pending_tasks(&self) -> Result<Vec<Task>, SourceError>;

    /// Remove a delivered task
    async fn remove(&self, id: &str) -> Result<(), SourceError>;
}

/// Wire shape of `GET /pending_tasks`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingTasks {
    /// Pending tasks, oldest first
    pub pending_tasks: Vec<Task>,
}

/// Client for the HTTP task store
#[derive(Debug, Clone)]
pub struct HttpTaskSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTaskSource {
    /// Client for the store at `base_url` (e.g. `http://localhost:5001`)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `{base}/pending_tasks/{id}` with `id` percent-encoded as one segment
    fn task_url(&self, id: &str) -> Result<reqwest::Url, SourceError> {
        let invalid = |reason: String| SourceError::InvalidUrl {
            url: self.base_url.clone(),
            reason,
        };
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["pending_tasks", id]);
        Ok(url)
    }
}

#[async_trait]
impl TaskSource for HttpTaskSource {
    async fn pending_tasks(&self) -> Result<Vec<Task>, SourceError> {
        let response = self
            .client
            .get(format!("{}/pending_tasks", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SourceError::Status {
                status: response.status().as_u16(),
                operation: "list pending tasks".to_string(),
            });
        }
        let body: PendingTasks = response.json().await?;
        Ok(body.pending_tasks)
    }

    async fn remove(&self, id: &str) -> Result<(), SourceError> {
        let response = self
            .client
            .delete(self.task_url(id)?)
            .send()
            .await?;
        match response.status().as_u16() {
            200..=299 => Ok(()),
            404 => Err(SourceError::NotFound(id.to_string())),
            status => Err(SourceError::Status {
                status,
                operation: format!("delete task {}", id),
            }),
        }
    }
}

/// Shared in-memory task list
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskSource {
    tasks: Arc<RwLock<Vec<Task>>>,
}

impl InMemoryTaskSource {
    /// Empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Source pre-filled with `tasks`, skipping duplicate ids
    pub async fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let source = Self::new();
        for task in tasks {
            let _ = source.insert(task).await;
        }
        source
    }

    /// Append a task; ids must be unique
    pub async fn insert(&self, task: Task) -> Result<(), SourceError> {
        let mut tasks = self.tasks.write().await;
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(SourceError::Duplicate(task.id));
        }
        debug!(task_id = %task.id, "Task stored");
        tasks.push(task);
        Ok(())
    }

    /// Drop every task
    pub async fn clear(&self) {
        self.tasks.write().await.clear();
    }

    /// Number of stored tasks
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// True when nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Whether `id` is stored
    pub async fn contains(&self, id: &str) -> bool {
        self.tasks.read().await.iter().any(|t| t.id == id)
    }
}

#[async_trait]
impl TaskSource for InMemoryTaskSource {
    async fn pending_tasks(&self) -> Result<Vec<Task>, SourceError> {
        Ok(self.tasks.read().await.clone())
    }

    async fn remove(&self, id: &str) -> Result<(), SourceError> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            return Err(SourceError::NotFound(id.to_string()));
        }
        debug!(task_id = %id, "Task removed");
        Ok(())
    }
}
