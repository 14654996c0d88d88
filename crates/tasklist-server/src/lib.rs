pub mod error;
pub mod forms;
pub mod handlers;
pub mod method_override;
pub mod server;
pub mod views;

pub use error::{ErrorPage, ServerError};
pub use server::{build_app, build_router, start, App, AppState, ServerConfig, ServerHandle};
pub use views::Views;
