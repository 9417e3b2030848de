//! In-memory report node store.

use arbor_core::{ReportNodeId, RunId};
use arbor_execution::ReportNode;
use arbor_ports::{PortsError, ReportNodeAccessor};
use async_trait::async_trait;
use dashmap::DashMap;

/// Report node arena keyed by id.
///
/// Children are indexed per parent in first-save order, so concurrent
/// appends from parallel workers never lose a sibling.
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    nodes: DashMap<ReportNodeId, ReportNode>,
    children: DashMap<ReportNodeId, Vec<ReportNodeId>>,
}

impl MemoryReportStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Root nodes of a run.
    #[must_use]
    pub fn roots(&self, run_id: RunId) -> Vec<ReportNode> {
        self.nodes
            .iter()
            .filter(|entry| entry.run_id == run_id && entry.parent_id.is_none())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Snapshot of a node's children without going through the async port.
    #[must_use]
    pub fn children_snapshot(&self, parent: ReportNodeId) -> Vec<ReportNode> {
        let ids = self
            .children
            .get(&parent)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.nodes.get(id).map(|node| node.value().clone()))
            .collect()
    }

    /// Snapshot of a single node.
    #[must_use]
    pub fn node(&self, id: ReportNodeId) -> Option<ReportNode> {
        self.nodes.get(&id).map(|node| node.value().clone())
    }
}

#[async_trait]
impl ReportNodeAccessor for MemoryReportStore {
    async fn save(&self, node: &ReportNode) -> Result<(), PortsError> {
        let is_new = self.nodes.insert(node.id, node.clone()).is_none();
        if is_new && let Some(parent) = node.parent_id {
            self.children.entry(parent).or_default().push(node.id);
        }
        Ok(())
    }

    async fn get(&self, id: ReportNodeId) -> Result<Option<ReportNode>, PortsError> {
        Ok(self.node(id))
    }

    async fn children_of(&self, parent: ReportNodeId) -> Result<Vec<ReportNode>, PortsError> {
        Ok(self.children_snapshot(parent))
    }
}
