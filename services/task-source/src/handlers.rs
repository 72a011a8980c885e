use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use medfleet_core::Task;
use medfleet_dispatch::{PendingTasks, SourceError, TaskSource};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::state::AppState;

type Reply = (StatusCode, Json<Value>);

fn message(status: StatusCode, text: impl Into<String>) -> Reply {
    (status, Json(json!({ "message": text.into() })))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "task-source",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

pub async fn list_tasks(State(state): State<AppState>) -> Result<Json<PendingTasks>, StatusCode> {
    let pending_tasks = state
        .store
        .pending_tasks()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(PendingTasks { pending_tasks }))
}

pub async fn create_task(State(state): State<AppState>, Json(payload): Json<Value>) -> Reply {
    let missing: Vec<&str> = ["ID", "medications", "location"]
        .into_iter()
        .filter(|field| payload.get(field).is_none())
        .collect();
    if !missing.is_empty() {
        return message(
            StatusCode::BAD_REQUEST,
            format!("Missing fields: {}", missing.join(", ")),
        );
    }

    let task: Task = match serde_json::from_value(payload) {
        Ok(task) => task,
        Err(e) => return message(StatusCode::BAD_REQUEST, format!("Invalid task: {}", e)),
    };

    match state.store.insert(task.clone()).await {
        Ok(()) => {
            info!(task_id = %task.id, room = %task.target, "Task created");
            (StatusCode::CREATED, Json(json!(task)))
        }
        Err(SourceError::Duplicate(id)) => {
            warn!(task_id = %id, "Duplicate task rejected");
            message(StatusCode::CONFLICT, format!("Task {} already exists", id))
        }
        Err(e) => message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn delete_task(State(state): State<AppState>, Path(id): Path<String>) -> Reply {
    match state.store.remove(&id).await {
        Ok(()) => {
            info!(task_id = %id, "Task deleted");
            message(StatusCode::OK, format!("Task {} deleted", id))
        }
        Err(SourceError::NotFound(_)) => message(StatusCode::NOT_FOUND, format!("Task {} not found", id)),
        Err(e) => message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn clear_tasks(State(state): State<AppState>) -> Reply {
    state.store.clear().await;
    info!("All tasks cleared");
    message(StatusCode::OK, "All tasks cleared")
}
