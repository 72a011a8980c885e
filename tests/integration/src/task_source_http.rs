//! Dispatcher's HTTP client against the real task store

use crate::test_utils::req;
use medfleet_core::Task;
use medfleet_dispatch::{HttpTaskSource, SourceError, TaskSource};
use std::net::SocketAddr;
use task_source::{demo_tasks, router, AppState};
use tokio::net::TcpListener;

async fn serve(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_client_lists_and_removes_tasks() {
    let state = AppState::seeded().await;
    let addr = serve(state.clone()).await;
    let source = HttpTaskSource::new(format!("http://{}/", addr));

    let tasks = source.pending_tasks().await.unwrap();
    assert_eq!(tasks, demo_tasks());

    source.remove("task_002").await.unwrap();
    assert!(!state.store.contains("task_002").await);
    assert!(matches!(
        source.remove("task_002").await,
        Err(SourceError::NotFound(id)) if id == "task_002"
    ));

    let remaining: Vec<String> = source
        .pending_tasks()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(remaining, vec!["task_001", "task_003"]);
}

#[tokio::test]
async fn test_remove_targets_only_the_exact_id() {
    let state = AppState::seeded().await;
    let awkward = Task::new("ward 3/bed?7", req(&[("Type1", 1)]), "Room A-101");
    state.store.insert(awkward).await.unwrap();
    let addr = serve(state.clone()).await;
    let source = HttpTaskSource::new(format!("http://{}", addr));

    source.remove("ward 3/bed?7").await.unwrap();
    assert!(!state.store.contains("ward 3/bed?7").await);
    assert_eq!(state.store.len().await, demo_tasks().len());
    assert!(matches!(
        source.remove("ward 3").await,
        Err(SourceError::NotFound(id)) if id == "ward 3"
    ));
}

#[tokio::test]
async fn test_unreachable_store_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let source = HttpTaskSource::new(format!("http://{}", addr));
    assert!(matches!(source.pending_tasks().await, Err(SourceError::Http(_))));
}
