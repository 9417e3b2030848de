//! Structural plan validation that collects all errors.

use std::collections::HashSet;

use crate::error::PlanError;
use crate::kind::NodeKind;
use crate::node::PlanNode;

/// Validate a plan tree comprehensively.
///
/// Every issue found is reported, not just the first one.
#[must_use]
pub fn validate_plan(root: &PlanNode) -> Vec<PlanError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    visit(root, None, &mut seen, &mut errors);
    errors
}

fn visit(
    node: &PlanNode,
    parent: Option<&NodeKind>,
    seen: &mut HashSet<arbor_core::PlanNodeId>,
    errors: &mut Vec<PlanError>,
) {
    if !seen.insert(node.id) {
        errors.push(PlanError::DuplicateNodeId(node.id));
    }

    let misplaced = |expected_parent: &'static str| PlanError::MisplacedNode {
        node_id: node.id,
        kind: node.kind.tag().to_owned(),
        expected_parent,
    };
    match &node.kind {
        NodeKind::Case(_) if !matches!(parent, Some(NodeKind::Switch(_))) => {
            errors.push(misplaced("switch"));
        }
        NodeKind::BeforeThread | NodeKind::AfterThread
            if !matches!(parent, Some(NodeKind::ThreadGroup(_))) =>
        {
            errors.push(misplaced("thread_group"));
        }
        NodeKind::If(_) if node.children.len() > 2 => {
            errors.push(PlanError::TooManyChildren {
                node_id: node.id,
                kind: node.kind.tag().to_owned(),
                max: 2,
                actual: node.children.len(),
            });
        }
        NodeKind::Custom { handler, .. } if handler.is_empty() => {
            errors.push(PlanError::EmptyParameter {
                node_id: node.id,
                name: "handler",
            });
        }
        NodeKind::ForEach(params) if params.source.kind.is_empty() => {
            errors.push(PlanError::EmptyParameter {
                node_id: node.id,
                name: "source.kind",
            });
        }
        _ => {}
    }

    if node.kind.is_leaf() && !node.children.is_empty() {
        errors.push(PlanError::UnexpectedChildren {
            node_id: node.id,
            kind: node.kind.tag().to_owned(),
        });
    }

    for child in &node.children {
        visit(child, Some(&node.kind), seen, errors);
    }
}
