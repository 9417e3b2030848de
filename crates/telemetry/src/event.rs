//! Event bus for execution lifecycle events.
//!
//! Uses [`tokio::sync::broadcast`] for fan-out delivery to multiple subscribers.
//! Events are fire-and-forget projections -- dropping them is acceptable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arbor_core::{PlanNodeId, ReportNodeId, RunId};
use arbor_execution::{ReportNodeStatus, RunStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Execution lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A run entered `Running`.
    RunStarted {
        /// The run.
        run_id: RunId,
        /// Root plan node.
        plan_id: PlanNodeId,
    },
    /// A run reached `Ended`.
    RunEnded {
        /// The run.
        run_id: RunId,
        /// Final run phase.
        run_status: RunStatus,
        /// Root report status.
        status: ReportNodeStatus,
        /// Total run duration.
        duration: Duration,
    },
    /// A report node started.
    NodeStarted {
        /// The run.
        run_id: RunId,
        /// The report node.
        report_id: ReportNodeId,
        /// Plan node being executed.
        plan_node_id: PlanNodeId,
        /// Node kind tag.
        kind: String,
        /// Display name.
        name: String,
    },
    /// A report node was finalized.
    NodeFinished {
        /// The run.
        run_id: RunId,
        /// The report node.
        report_id: ReportNodeId,
        /// Node kind tag.
        kind: String,
        /// Final status.
        status: ReportNodeStatus,
        /// How long the node took.
        duration: Duration,
    },
    /// A thread group started a virtual user.
    ThreadStarted {
        /// The run.
        run_id: RunId,
        /// Report node of the thread group.
        group_id: ReportNodeId,
        /// 1-based user id.
        user_id: u64,
    },
    /// A virtual user finished.
    ThreadEnded {
        /// The run.
        run_id: RunId,
        /// Report node of the thread group.
        group_id: ReportNodeId,
        /// 1-based user id.
        user_id: u64,
    },
}

impl ExecutionEvent {
    /// The run the event belongs to.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::RunEnded { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeFinished { run_id, .. }
            | Self::ThreadStarted { run_id, .. }
            | Self::ThreadEnded { run_id, .. } => *run_id,
        }
    }
}

/// Fan-out of [`ExecutionEvent`]s to any number of subscribers.
///
/// With nobody subscribed an event is counted and dropped.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
    emitted: AtomicU64,
}

impl EventBus {
    /// A bus buffering up to `capacity` events per subscriber. A subscriber
    /// that falls further behind loses the oldest ones.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            emitted: AtomicU64::new(0),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: ExecutionEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    /// Total number of events emitted since creation.
    #[must_use]
    pub fn total_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Subscription handle for receiving events from the [`EventBus`].
#[derive(Debug)]
pub struct EventSubscriber {
    receiver: broadcast::Receiver<ExecutionEvent>,
}

impl EventSubscriber {
    /// Receive the next event, waiting asynchronously.
    ///
    /// Returns `None` once the bus is dropped. Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Drain every event currently buffered.
    pub fn drain(&mut self) -> Vec<ExecutionEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
