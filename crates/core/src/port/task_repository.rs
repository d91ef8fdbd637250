// Task Repository Port (durable mirror of non-terminal tasks)

use crate::domain::{Task, TaskId};
use crate::error::Result;
use async_trait::async_trait;

/// Durable mirror so pending/running tasks survive a process restart.
///
/// Upserted on every update while non-terminal; the row is deleted when the
/// task reaches a terminal state, so the store only ever holds work that
/// was in flight.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert or replace the row for a non-terminal task
    async fn upsert(&self, task: &Task) -> Result<()>;

    /// Delete the row (no-op when absent)
    async fn delete(&self, id: &TaskId) -> Result<()>;

    /// Read back everything, to repopulate the in-memory store at startup
    async fn load_all(&self) -> Result<Vec<Task>>;
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory task mirror for round-trip tests
    #[derive(Default)]
    pub struct InMemoryTaskRepository {
        rows: Mutex<HashMap<TaskId, Task>>,
    }

    impl InMemoryTaskRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn contains(&self, id: &str) -> bool {
            self.rows.lock().unwrap().contains_key(id)
        }

        pub fn len(&self) -> usize {
            self.rows.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.rows.lock().unwrap().is_empty()
        }
    }

    #[async_trait]
    impl TaskRepository for InMemoryTaskRepository {
        async fn upsert(&self, task: &Task) -> Result<()> {
            self.rows
                .lock()
                .unwrap()
                .insert(task.id.clone(), task.clone());
            Ok(())
        }

        async fn delete(&self, id: &TaskId) -> Result<()> {
            self.rows.lock().unwrap().remove(id);
            Ok(())
        }

        async fn load_all(&self) -> Result<Vec<Task>> {
            let mut all: Vec<Task> = self.rows.lock().unwrap().values().cloned().collect();
            all.sort_by_key(|t| t.created_at);
            Ok(all)
        }
    }
}
