//! Route handlers. Each action maps onto exactly one task store call, then
//! renders a view or redirects.

use axum::extract::{Path, State};
use axum::response::{Html, Redirect};
use axum::Form;
use tasklist_core::TaskId;
use tracing::{info, instrument};

use crate::error::ServerError;
use crate::forms::{CreateTaskForm, UpdateTaskForm};
use crate::server::AppState;

type PageResult = Result<Html<String>, ServerError>;

fn task_path(id: &TaskId) -> String {
    format!("/tasks/{id}")
}

// ── Pages ──

pub async fn landing(State(state): State<AppState>) -> PageResult {
    Ok(Html(state.views.landing()?))
}

/// `GET /tasks`
pub async fn index(State(state): State<AppState>) -> PageResult {
    let tasks = state.tasks.list_all()?;
    Ok(Html(state.views.task_list(&tasks)?))
}

/// `GET /tasks/new`
pub async fn new_form(State(state): State<AppState>) -> PageResult {
    Ok(Html(state.views.new_task()?))
}

/// `GET /tasks/{id}`
pub async fn show(State(state): State<AppState>, Path(id): Path<TaskId>) -> PageResult {
    let task = state.tasks.find_by_id(&id)?;
    Ok(Html(state.views.task_detail(&task)?))
}

/// `GET /tasks/{id}/edit`
pub async fn edit_form(State(state): State<AppState>, Path(id): Path<TaskId>) -> PageResult {
    let task = state.tasks.find_by_id(&id)?;
    Ok(Html(state.views.edit_task(&task)?))
}

// ── Mutations ──

/// `POST /tasks`
#[instrument(skip_all)]
pub async fn create(
    State(state): State<AppState>,
    Form(form): Form<CreateTaskForm>,
) -> Result<Redirect, ServerError> {
    let task = state.tasks.create(&form.into_new_task())?;
    info!(task_id = %task.id, "task created");
    Ok(Redirect::to(&task_path(&task.id)))
}

/// `PUT /tasks/{id}`
#[instrument(skip_all, fields(task_id = %id))]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    Form(form): Form<UpdateTaskForm>,
) -> Result<Redirect, ServerError> {
    let patch = form.into_patch()?;
    let task = state.tasks.update_by_id(&id, &patch)?;
    info!(completed = task.completed, "task updated");
    Ok(Redirect::to(&task_path(&task.id)))
}

/// `DELETE /tasks/{id}`
#[instrument(skip_all, fields(task_id = %id))]
pub async fn destroy(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> Result<Redirect, ServerError> {
    state.tasks.delete_by_id(&id)?;
    info!("task deleted");
    Ok(Redirect::to("/tasks"))
}
