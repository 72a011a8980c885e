use medfleet_core::{Requirement, Task};
use medfleet_dispatch::InMemoryTaskSource;

/// Shared handler state
#[derive(Debug, Clone, Default)]
pub struct AppState {
    /// Stored pending tasks
    pub store: InMemoryTaskSource,
}

impl AppState {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with [`demo_tasks`]
    pub async fn seeded() -> Self {
        Self {
            store: InMemoryTaskSource::with_tasks(demo_tasks()).await,
        }
    }
}

fn requirement(items: &[(&str, u32)]) -> Requirement {
    let mut req = Requirement::new();
    for (kind, qty) in items {
        req.set(*kind, *qty);
    }
    req
}

/// The three demo deliveries
pub fn demo_tasks() -> Vec<Task> {
    vec![
        Task::new(
            "task_001",
            requirement(&[("Type1", 1), ("Type2", 1), ("Type3", 1), ("Type4", 1)]),
            "Room A-101",
        ),
        Task::new("task_002", requirement(&[("Type1", 5), ("Type2", 3)]), "Room B-202"),
        Task::new("task_003", requirement(&[("Type3", 1), ("Type4", 1)]), "Room C-303"),
    ]
}
