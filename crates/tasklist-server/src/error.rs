//! Request error type.
//!
//! Every handler returns `Result<T, ServerError>`. The response carries an
//! [`ErrorPage`] extension that [`render_error_pages`] turns into the HTML
//! error view; the plain-text body is what clients see if rendering fails.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Response};
use tasklist_store::StoreError;
use thiserror::Error;
use tracing::{error, warn};

use crate::server::AppState;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the task store. `NotFound` keeps its own status.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The submitted form could not be turned into a valid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("template error: {0}")]
    Render(#[from] minijinja::Error),
}

/// Status and user-facing message of a failed request.
#[derive(Clone, Debug)]
pub struct ErrorPage {
    pub status: StatusCode,
    pub message: String,
}

impl ServerError {
    pub fn page(&self) -> ErrorPage {
        let (status, message) = match self {
            ServerError::Store(StoreError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "Task not found.".to_owned())
            }
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),

            // Internal errors: log the detail, show a generic message.
            ServerError::Store(e) => {
                error!(error = %e, "task store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "The task store is unavailable. Please try again later.".to_owned(),
                )
            }
            ServerError::Render(e) => {
                error!(error = %e, "template rendering failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        ErrorPage { status, message }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let page = self.page();
        let mut response = (page.status, page.message.clone()).into_response();
        response.extensions_mut().insert(page);
        response
    }
}

/// Replace error responses produced by handlers with the rendered error view.
pub async fn render_error_pages(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    let Some(page) = response.extensions().get::<ErrorPage>().cloned() else {
        return response;
    };

    match state.views.error(&page) {
        Ok(html) => (page.status, Html(html)).into_response(),
        Err(e) => {
            warn!(error = %e, "error view failed to render; sending plain text");
            response
        }
    }
}
