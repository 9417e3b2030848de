//! Plan node accessor port.

use arbor_core::PlanNodeId;
use arbor_plan::PlanNode;
use async_trait::async_trait;

use crate::error::PortsError;

/// Read access to stored plans.
#[async_trait]
pub trait PlanNodeAccessor: Send + Sync {
    /// Get a plan (sub)tree by the id of its root.
    async fn get(&self, id: PlanNodeId) -> Result<Option<PlanNode>, PortsError>;

    /// Resolve a named reusable sub-plan.
    async fn find_by_name(&self, name: &str) -> Result<Option<PlanNode>, PortsError>;
}
