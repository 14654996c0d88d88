use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::Request;
use axum::routing::get;
use axum::{middleware, Router, ServiceExt};
use tasklist_store::TaskRepo;
use tokio::sync::oneshot;
use tower::util::{MapRequest, MapRequestLayer};
use tower::Layer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::error::render_error_pages;
use crate::handlers;
use crate::method_override;
use crate::views::Views;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Directory served for paths no route matches.
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7070,
            static_dir: PathBuf::from("public"),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub tasks: TaskRepo,
    pub views: Arc<Views>,
}

impl AppState {
    pub fn new(tasks: TaskRepo) -> Result<Self, minijinja::Error> {
        Ok(Self {
            tasks,
            views: Arc::new(Views::new()?),
        })
    }
}

/// The router wrapped in the method-override rewrite, which has to run before routing.
pub type App = MapRequest<Router, fn(Request) -> Request>;

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(handlers::landing))
        .route("/tasks", get(handlers::index).post(handlers::create))
        .route("/tasks/new", get(handlers::new_form))
        .route(
            "/tasks/{id}",
            get(handlers::show)
                .put(handlers::update)
                .patch(handlers::update)
                .delete(handlers::destroy),
        )
        .route("/tasks/{id}/edit", get(handlers::edit_form))
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            render_error_pages,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn build_app(state: AppState, config: &ServerConfig) -> App {
    let rewrite: fn(Request) -> Request = method_override::rewrite;
    MapRequestLayer::new(rewrite).layer(build_router(state, config))
}

/// Bind and start serving. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    state: AppState,
) -> Result<ServerHandle, std::io::Error> {
    let app = build_app(state, &config);
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        port = local_addr.port(),
        static_dir = %config.static_dir.display(),
        "tasklist server started"
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server terminated with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown_tx,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    shutdown_tx: oneshot::Sender<()>,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task did not finish cleanly");
        }
        tracing::info!("tasklist server stopped");
    }
}
