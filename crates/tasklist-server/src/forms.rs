//! Typed form bodies for the create and update actions.

use serde::Deserialize;
use tasklist_core::{NewTask, TaskPatch};

use crate::error::ServerError;

/// Body of `POST /tasks`: a single `content` field.
#[derive(Debug, Default, Deserialize)]
pub struct CreateTaskForm {
    pub content: Option<String>,
}

impl CreateTaskForm {
    /// Content passes through untouched; empty or missing content is accepted.
    pub fn into_new_task(self) -> NewTask {
        NewTask {
            content: self.content,
        }
    }
}

/// Body of `PUT /tasks/{id}`. Field names are grouped under `task[...]`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskForm {
    #[serde(rename = "task[content]")]
    pub content: Option<String>,
    #[serde(rename = "task[completed]")]
    pub completed: Option<String>,
}

impl UpdateTaskForm {
    pub fn into_patch(self) -> Result<TaskPatch, ServerError> {
        let completed = match self.completed.as_deref() {
            Some(raw) => Some(parse_flag(raw).ok_or_else(|| {
                ServerError::BadRequest(format!("invalid value for completed: {raw:?}"))
            })?),
            None => None,
        };
        Ok(TaskPatch {
            content: self.content,
            completed,
        })
    }
}

/// Checkbox and select values a browser may send for a boolean field.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "1" => Some(true),
        "false" | "off" | "0" => Some(false),
        _ => None,
    }
}
