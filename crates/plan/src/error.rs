//! Plan definition and validation errors.

use arbor_core::PlanNodeId;
use thiserror::Error;

/// Errors found while reading or validating a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Two nodes share the same id.
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(PlanNodeId),

    /// A node appears under a parent kind that cannot own it.
    #[error("{kind} node {node_id} must be a child of a {expected_parent} node")]
    MisplacedNode {
        /// The misplaced node.
        node_id: PlanNodeId,
        /// Its kind tag.
        kind: String,
        /// Kind tag of the required parent.
        expected_parent: &'static str,
    },

    /// A node has more children than its kind allows.
    #[error("{kind} node {node_id} has {actual} children, at most {max} allowed")]
    TooManyChildren {
        /// The offending node.
        node_id: PlanNodeId,
        /// Its kind tag.
        kind: String,
        /// Maximum allowed.
        max: usize,
        /// Actual child count.
        actual: usize,
    },

    /// A leaf kind was given children.
    #[error("{kind} node {node_id} cannot have children")]
    UnexpectedChildren {
        /// The offending node.
        node_id: PlanNodeId,
        /// Its kind tag.
        kind: String,
    },

    /// A required parameter is empty.
    #[error("node {node_id}: parameter '{name}' must not be empty")]
    EmptyParameter {
        /// The offending node.
        node_id: PlanNodeId,
        /// Parameter name.
        name: &'static str,
    },

    /// A serialization or deserialization error.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn misplaced_node_display() {
        let id = PlanNodeId::nil();
        let err = PlanError::MisplacedNode {
            node_id: id,
            kind: "case".into(),
            expected_parent: "switch",
        };
        assert_eq!(
            err.to_string(),
            format!("case node {id} must be a child of a switch node")
        );
    }

    #[test]
    fn too_many_children_display() {
        let err = PlanError::TooManyChildren {
            node_id: PlanNodeId::nil(),
            kind: "if".into(),
            max: 2,
            actual: 3,
        };
        assert!(err.to_string().ends_with("has 3 children, at most 2 allowed"));
    }
}
