use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TaskId;

/// A persisted to-do item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    /// Free-form text. `None` when the task was created without any content.
    pub content: Option<String>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a task. Content is accepted as-is, including empty or missing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub content: Option<String>,
}

impl NewTask {
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
        }
    }
}

/// Partial update. Fields left as `None` are not touched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub content: Option<String>,
    pub completed: Option<bool>,
}

impl TaskPatch {
    pub fn completed(completed: bool) -> Self {
        Self {
            content: None,
            completed: Some(completed),
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            completed: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.completed.is_none()
    }

    /// Apply the supplied fields to `task` in place.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(content) = &self.content {
            task.content = Some(content.clone());
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
    }
}
