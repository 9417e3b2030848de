//! Report nodes: the recorded outcome of one plan node visit.

use std::collections::BTreeMap;
use std::time::Duration;

use arbor_core::{PlanNodeId, ReportNodeId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::ReportNodeStatus;

/// Classification of a node error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A business condition did not hold; maps to `Failed`.
    Business,
    /// Something broke; maps to `TechnicalError`.
    Technical,
}

/// Error recorded on a report node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeError {
    /// Business or technical.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Structured cause, e.g. a remote agent's error payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl NodeError {
    /// A business failure.
    pub fn business(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Business,
            message: message.into(),
            details: None,
        }
    }

    /// A technical error.
    pub fn technical(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Technical,
            message: message.into(),
            details: None,
        }
    }

    /// Attach a structured cause.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The node status this error maps to.
    #[must_use]
    pub fn status(&self) -> ReportNodeStatus {
        match self.kind {
            ErrorKind::Business => ReportNodeStatus::Failed,
            ErrorKind::Technical => ReportNodeStatus::TechnicalError,
        }
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// A binary artifact attached to a report node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// Raw content.
    pub content: Vec<u8>,
}

/// A timed measurement reported by a keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    /// Measure name.
    pub name: String,
    /// Start timestamp.
    pub begin: DateTime<Utc>,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Extra data.
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

/// The outcome of one plan node visit.
///
/// Report nodes form a tree through `parent_id`; they never hold references
/// to each other, so any store keyed by id can hold them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportNode {
    /// Unique id.
    pub id: ReportNodeId,
    /// Parent report node, `None` only for a run root.
    pub parent_id: Option<ReportNodeId>,
    /// Plan node this visit executed.
    pub plan_node_id: PlanNodeId,
    /// Run the node belongs to.
    pub run_id: RunId,
    /// Display name.
    pub name: String,
    /// Node kind tag.
    pub kind: String,
    /// Current status.
    pub status: ReportNodeStatus,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// Wall-clock duration.
    #[serde(default, with = "crate::serde_duration_opt")]
    pub duration: Option<Duration>,
    /// Error, when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    /// Custom attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Binary artifacts.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Timed measurements.
    #[serde(default)]
    pub measures: Vec<Measure>,
    /// Input payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Output payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl ReportNode {
    /// A node in `Running` state, stamped with the current time.
    pub fn new(
        run_id: RunId,
        parent_id: Option<ReportNodeId>,
        plan_node_id: PlanNodeId,
        name: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            id: ReportNodeId::v4(),
            parent_id,
            plan_node_id,
            run_id,
            name: name.into(),
            kind: kind.into(),
            status: ReportNodeStatus::Running,
            started_at: Some(Utc::now()),
            duration: None,
            error: None,
            attributes: BTreeMap::new(),
            attachments: Vec::new(),
            measures: Vec::new(),
            input: None,
            output: None,
        }
    }

    /// A `NoRun` node that was never executed.
    pub fn skeleton(
        run_id: RunId,
        parent_id: Option<ReportNodeId>,
        plan_node_id: PlanNodeId,
        name: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        let mut node = Self::new(run_id, parent_id, plan_node_id, name, kind);
        node.status = ReportNodeStatus::NoRun;
        node.started_at = None;
        node
    }

    /// Set the final status and duration.
    pub fn finish(&mut self, status: ReportNodeStatus, duration: Duration) {
        self.status = status;
        self.duration = Some(duration);
    }

    /// Record an error and the status it maps to.
    pub fn fail(&mut self, error: NodeError) {
        self.status = self.status_after(error.status());
        self.error = Some(error);
    }

    fn status_after(&self, status: ReportNodeStatus) -> ReportNodeStatus {
        if self.status == ReportNodeStatus::Running {
            status
        } else {
            self.status.worst(status)
        }
    }

    /// Set a custom attribute.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// A compact JSON summary, bound as `callReport` after keyword calls.
    #[must_use]
    pub fn summary(&self) -> Value {
        serde_json::json!({
            "id": self.id.to_string(),
            "name": self.name,
            "status": self.status,
            "durationMs": self.duration.map(|d| d.as_millis() as u64),
            "error": self.error.as_ref().map(|e| e.message.clone()),
            "attributes": self.attributes,
        })
    }
}
