// Broadcast Hub - fans task-update events out to live subscribers

use crate::domain::{TaskEvent, TaskId};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Process-unique listener handle
pub type ListenerId = u64;

/// A live observer of task-update events
///
/// `deliver` returning Err means the listener is dead (e.g. its connection
/// closed); the hub drops it and carries on with the rest.
#[async_trait]
pub trait TaskListener: Send + Sync {
    fn id(&self) -> ListenerId;

    async fn deliver(&self, event: &TaskEvent) -> Result<()>;
}

/// Subscription registry: task ID -> ordered set of listeners
///
/// Subscribe/unsubscribe are idempotent. Listener failures never reach the
/// publisher, and a task ID with no subscribers left is removed from the
/// map so it cannot grow without bound.
pub struct BroadcastHub {
    subscriptions: Mutex<HashMap<TaskId, Vec<Arc<dyn TaskListener>>>>,
    next_listener_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Hand out a fresh listener id (convenience for listener constructors)
    pub fn next_listener_id(&self) -> ListenerId {
        self.next_listener_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Subscribe a listener to one task's updates (idempotent)
    pub async fn subscribe(&self, listener: Arc<dyn TaskListener>, task_id: &str) {
        let mut subscriptions = self.subscriptions.lock().await;
        let listeners = subscriptions.entry(task_id.to_string()).or_default();
        if listeners.iter().any(|l| l.id() == listener.id()) {
            return;
        }
        listeners.push(listener);
        debug!(task_id = %task_id, "Listener subscribed");
    }

    /// Unsubscribe a listener from one task (idempotent)
    pub async fn unsubscribe(&self, listener_id: ListenerId, task_id: &str) {
        let mut subscriptions = self.subscriptions.lock().await;
        if let Some(listeners) = subscriptions.get_mut(task_id) {
            listeners.retain(|l| l.id() != listener_id);
            if listeners.is_empty() {
                subscriptions.remove(task_id);
            }
        }
        debug!(task_id = %task_id, listener_id, "Listener unsubscribed");
    }

    /// Remove a listener from every task it subscribed to
    pub async fn disconnect(&self, listener_id: ListenerId) {
        let mut subscriptions = self.subscriptions.lock().await;
        Self::disconnect_locked(&mut subscriptions, listener_id);
        info!(listener_id, "Listener disconnected");
    }

    fn disconnect_locked(
        subscriptions: &mut HashMap<TaskId, Vec<Arc<dyn TaskListener>>>,
        listener_id: ListenerId,
    ) {
        subscriptions.retain(|_, listeners| {
            listeners.retain(|l| l.id() != listener_id);
            !listeners.is_empty()
        });
    }

    /// Drop all subscriptions for a task (called when the task is cleaned up)
    pub async fn remove_task(&self, task_id: &str) {
        self.subscriptions.lock().await.remove(task_id);
    }

    /// Deliver an event to every current subscriber of the task, in
    /// registration order. A failing listener is logged, dropped from every
    /// task, and never affects the remaining deliveries or the caller.
    pub async fn publish(&self, task_id: &str, event: &TaskEvent) {
        let mut subscriptions = self.subscriptions.lock().await;
        let Some(listeners) = subscriptions.get(task_id) else {
            return;
        };

        let listeners = listeners.clone();
        let mut dead: Vec<ListenerId> = Vec::new();
        for listener in &listeners {
            if let Err(e) = listener.deliver(event).await {
                error!(
                    task_id = %task_id,
                    listener_id = listener.id(),
                    error = %e,
                    "Listener delivery failed, dropping listener"
                );
                dead.push(listener.id());
            }
        }

        for listener_id in dead {
            Self::disconnect_locked(&mut subscriptions, listener_id);
        }
    }

    /// Current subscriber count for a task (primarily for tests)
    pub async fn subscriber_count(&self, task_id: &str) -> usize {
        self.subscriptions
            .lock()
            .await
            .get(task_id)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::Mutex as StdMutex;

    /// Listener that records every delivered event, optionally failing
    pub struct RecordingListener {
        id: ListenerId,
        events: StdMutex<Vec<TaskEvent>>,
        fail: bool,
    }

    impl RecordingListener {
        pub fn new(id: ListenerId) -> Self {
            Self {
                id,
                events: StdMutex::new(Vec::new()),
                fail: false,
            }
        }

        pub fn failing(id: ListenerId) -> Self {
            Self {
                id,
                events: StdMutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn events(&self) -> Vec<TaskEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskListener for RecordingListener {
        fn id(&self) -> ListenerId {
            self.id
        }

        async fn deliver(&self, event: &TaskEvent) -> Result<()> {
            if self.fail {
                return Err(AppError::Internal("connection closed".to_string()));
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::RecordingListener;
    use super::*;
    use crate::domain::TaskState;

    fn event(task_id: &str, status: TaskState) -> TaskEvent {
        TaskEvent {
            task_id: task_id.to_string(),
            status,
            progress: 0,
            message: String::new(),
            logs: Vec::new(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let hub = BroadcastHub::new();
        let a = Arc::new(RecordingListener::new(1));
        let b = Arc::new(RecordingListener::new(2));

        hub.subscribe(a.clone(), "t1").await;
        hub.subscribe(b.clone(), "t1").await;

        hub.publish("t1", &event("t1", TaskState::Running)).await;

        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_twice_does_not_duplicate_delivery() {
        let hub = BroadcastHub::new();
        let a = Arc::new(RecordingListener::new(1));

        hub.subscribe(a.clone(), "t1").await;
        hub.subscribe(a.clone(), "t1").await;

        hub.publish("t1", &event("t1", TaskState::Running)).await;

        assert_eq!(a.events().len(), 1);
        assert_eq!(hub.subscriber_count("t1").await, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let hub = BroadcastHub::new();
        let a = Arc::new(RecordingListener::new(1));

        hub.subscribe(a.clone(), "t1").await;
        hub.unsubscribe(1, "t1").await;
        hub.unsubscribe(1, "t1").await;

        hub.publish("t1", &event("t1", TaskState::Running)).await;
        assert!(a.events().is_empty());
        assert_eq!(hub.subscriber_count("t1").await, 0);
    }

    #[tokio::test]
    async fn test_failing_listener_is_dropped_others_still_delivered() {
        let hub = BroadcastHub::new();
        let bad = Arc::new(RecordingListener::failing(1));
        let good = Arc::new(RecordingListener::new(2));

        hub.subscribe(bad.clone(), "t1").await;
        hub.subscribe(good.clone(), "t1").await;

        hub.publish("t1", &event("t1", TaskState::Running)).await;

        assert_eq!(good.events().len(), 1);
        assert_eq!(hub.subscriber_count("t1").await, 1);

        // The dropped listener receives nothing further
        hub.publish("t1", &event("t1", TaskState::Completed)).await;
        assert_eq!(good.events().len(), 2);
        assert!(bad.events().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_clears_all_subscriptions() {
        let hub = BroadcastHub::new();
        let a = Arc::new(RecordingListener::new(1));

        hub.subscribe(a.clone(), "t1").await;
        hub.subscribe(a.clone(), "t2").await;

        hub.disconnect(1).await;

        assert_eq!(hub.subscriber_count("t1").await, 0);
        assert_eq!(hub.subscriber_count("t2").await, 0);
    }

    #[tokio::test]
    async fn test_events_delivered_in_publish_order() {
        let hub = BroadcastHub::new();
        let a = Arc::new(RecordingListener::new(1));
        hub.subscribe(a.clone(), "t1").await;

        hub.publish("t1", &event("t1", TaskState::Pending)).await;
        hub.publish("t1", &event("t1", TaskState::Running)).await;
        hub.publish("t1", &event("t1", TaskState::Completed)).await;

        let statuses: Vec<TaskState> = a.events().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![TaskState::Pending, TaskState::Running, TaskState::Completed]
        );
    }
}
