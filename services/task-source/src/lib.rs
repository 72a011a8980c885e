//! Pending-task store served over HTTP
//!
//! The dispatcher polls `GET /pending_tasks` and deletes tasks once they are
//! delivered. Operators add work with `POST /pending_tasks`.

use axum::{
    routing::{delete, get},
    Router,
};

pub mod config;
pub mod handlers;
pub mod state;

pub use config::Config;
pub use state::{demo_tasks, AppState};

/// Routes of the task store
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/pending_tasks",
            get(handlers::list_tasks).post(handlers::create_task),
        )
        .route("/pending_tasks/", delete(handlers::clear_tasks))
        .route("/pending_tasks/:id", delete(handlers::delete_task))
        .with_state(state)
}
