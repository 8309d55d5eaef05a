use crate::status::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted while a run progresses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: String,
        total_tasks: usize,
        slots: usize,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    TaskStarted {
        run_id: String,
        task_id: String,
        slot: String,
        timestamp: DateTime<Utc>,
    },
    TaskRetrying {
        run_id: String,
        task_id: String,
        attempt: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        run_id: String,
        task_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    TaskFailed {
        run_id: String,
        task_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    TaskBlocked {
        run_id: String,
        task_id: String,
        blocked_by: String,
        timestamp: DateTime<Utc>,
    },
    ModuleFinished {
        run_id: String,
        module: String,
        state: State,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus; sending with no subscribers is not an error.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
