//! In-memory plan store.

use arbor_core::PlanNodeId;
use arbor_plan::PlanNode;
use arbor_ports::{PlanNodeAccessor, PortsError};
use async_trait::async_trait;
use dashmap::DashMap;

/// Plans indexed by root id and by name.
#[derive(Debug, Default)]
pub struct MemoryPlanStore {
    plans: DashMap<PlanNodeId, PlanNode>,
    names: DashMap<String, PlanNodeId>,
}

impl MemoryPlanStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a plan. A named root is also reachable through
    /// [`find_by_name`](PlanNodeAccessor::find_by_name).
    pub fn insert(&self, plan: PlanNode) {
        if let Some(name) = plan.name() {
            self.names.insert(name.to_owned(), plan.id);
        }
        tracing::debug!(plan_id = %plan.id, name = plan.display_name(), "stored plan");
        self.plans.insert(plan.id, plan);
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with_plan(self, plan: PlanNode) -> Self {
        self.insert(plan);
        self
    }
}

#[async_trait]
impl PlanNodeAccessor for MemoryPlanStore {
    async fn get(&self, id: PlanNodeId) -> Result<Option<PlanNode>, PortsError> {
        if let Some(plan) = self.plans.get(&id) {
            return Ok(Some(plan.value().clone()));
        }
        // Fall back to subtrees of stored plans.
        Ok(self
            .plans
            .iter()
            .find_map(|entry| entry.value().find(id).cloned()))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<PlanNode>, PortsError> {
        let Some(id) = self.names.get(name).map(|id| *id) else {
            return Ok(None);
        };
        self.get(id).await
    }
}
