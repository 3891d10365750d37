//! Event types for the importd event system
//!
//! Events are broadcast via `EventBus` and serialized for SSE transmission
//! to dashboards polling or streaming import progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::SourceKind;

/// Coordination events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ImportEvent {
    /// A run acquired the lock and entered validation
    RunStarted {
        session_id: Uuid,
        source_kind: SourceKind,
        /// Who triggered the run ("api:web-ui", "scheduler:daily", "cli", ...)
        trigger: String,
        timestamp: DateTime<Utc>,
    },

    /// Batch committed
    Progress {
        session_id: Uuid,
        processed: u64,
        total: Option<u64>,
        percent: f64,
        failed_rows: u64,
        timestamp: DateTime<Utc>,
    },

    /// Source exhausted, lock released
    RunCompleted {
        session_id: Uuid,
        imported: u64,
        failed_rows: u64,
        duration_seconds: u64,
        timestamp: DateTime<Utc>,
    },

    /// Run failed (validation, source, sink or row threshold), lock released
    RunFailed {
        session_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Run observed a cancellation request at a batch boundary, lock released
    RunCancelled {
        session_id: Uuid,
        processed: u64,
        timestamp: DateTime<Utc>,
    },

    /// Lock and progress cleared unconditionally
    LockReset {
        /// Holder at the time of the reset, if any
        previous_session: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// Scheduler tick skipped because a run was active
    TickSkipped {
        cadence_id: String,
        next_run_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
}

impl ImportEvent {
    /// Get event type as string for SSE event names
    pub fn event_type(&self) -> &str {
        match self {
            ImportEvent::RunStarted { .. } => "RunStarted",
            ImportEvent::Progress { .. } => "Progress",
            ImportEvent::RunCompleted { .. } => "RunCompleted",
            ImportEvent::RunFailed { .. } => "RunFailed",
            ImportEvent::RunCancelled { .. } => "RunCancelled",
            ImportEvent::LockReset { .. } => "LockReset",
            ImportEvent::TickSkipped { .. } => "TickSkipped",
        }
    }

    /// Session the event belongs to, if any
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            ImportEvent::RunStarted { session_id, .. }
            | ImportEvent::Progress { session_id, .. }
            | ImportEvent::RunCompleted { session_id, .. }
            | ImportEvent::RunFailed { session_id, .. }
            | ImportEvent::RunCancelled { session_id, .. } => Some(*session_id),
            ImportEvent::LockReset { previous_session, .. } => *previous_session,
            ImportEvent::TickSkipped { .. } => None,
        }
    }
}

/// Broadcast bus for `ImportEvent`s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ImportEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before slow subscribers lag
    ///
    /// # Examples
    ///
    /// ```
    /// use importd_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ImportEvent,
    ) -> Result<usize, broadcast::error::SendError<ImportEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ImportEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
