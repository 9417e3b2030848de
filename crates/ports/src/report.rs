//! Report node accessor port.

use arbor_core::ReportNodeId;
use arbor_execution::ReportNode;
use async_trait::async_trait;

use crate::error::PortsError;

/// Persistence for report nodes.
///
/// The engine saves every node at least twice: once when it starts running
/// and once when it is finalized. Saves arrive concurrently from parallel
/// loops and thread groups, so implementations must tolerate concurrent
/// upserts and keep children in the order they were first saved.
#[async_trait]
pub trait ReportNodeAccessor: Send + Sync {
    /// Insert or replace a node.
    async fn save(&self, node: &ReportNode) -> Result<(), PortsError>;

    /// Get a node by id.
    async fn get(&self, id: ReportNodeId) -> Result<Option<ReportNode>, PortsError>;

    /// Children of `parent`, in first-save order.
    async fn children_of(&self, parent: ReportNodeId) -> Result<Vec<ReportNode>, PortsError>;
}
