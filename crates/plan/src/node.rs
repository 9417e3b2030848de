//! Plan node definition.

use std::collections::BTreeMap;

use arbor_core::PlanNodeId;
use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::kind::NodeKind;
use crate::value::DynamicValue;

/// Attribute holding a node's display name.
pub const NAME_ATTRIBUTE: &str = "name";

/// Name used for report nodes whose plan node has no name.
pub const UNNAMED: &str = "Unnamed";

/// A single node of an authored plan tree.
///
/// A node owns its children, so a plan is always a tree: every child has
/// exactly one parent and cycles cannot be expressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    /// Stable unique identifier.
    pub id: PlanNodeId,
    /// Name/label mapping; the display name lives under `"name"`.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Free-form fields carried through to plugins.
    #[serde(default)]
    pub custom_fields: serde_json::Map<String, serde_json::Value>,
    /// When this evaluates to `true` the node is reported as skipped.
    #[serde(default)]
    pub skip: Option<DynamicValue>,
    /// Node kind and its parameters.
    pub kind: NodeKind,
    /// Ordered children.
    #[serde(default)]
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    /// Create a childless node of the given kind with a fresh id.
    #[must_use]
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: PlanNodeId::v4(),
            attributes: BTreeMap::new(),
            custom_fields: serde_json::Map::new(),
            skip: None,
            kind,
            children: Vec::new(),
        }
    }

    /// Parse a plan from JSON.
    pub fn from_json(json: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Override the generated id.
    #[must_use]
    pub fn with_id(mut self, id: PlanNodeId) -> Self {
        self.id = id;
        self
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.attributes.insert(NAME_ATTRIBUTE.to_owned(), name.into());
        self
    }

    /// Add an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add a custom field.
    #[must_use]
    pub fn with_custom_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.custom_fields.insert(key.into(), value);
        self
    }

    /// Set the skip condition.
    #[must_use]
    pub fn with_skip(mut self, skip: impl Into<DynamicValue>) -> Self {
        self.skip = Some(skip.into());
        self
    }

    /// Append a child.
    #[must_use]
    pub fn with_child(mut self, child: PlanNode) -> Self {
        self.children.push(child);
        self
    }

    /// Append several children.
    #[must_use]
    pub fn with_children(mut self, children: impl IntoIterator<Item = PlanNode>) -> Self {
        self.children.extend(children);
        self
    }

    /// The `"name"` attribute, if set.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.attributes.get(NAME_ATTRIBUTE).map(String::as_str)
    }

    /// The name used for report nodes of this plan node.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name().unwrap_or(UNNAMED)
    }

    /// See [`NodeKind::is_blocking`].
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.kind.is_blocking()
    }

    /// Depth-first search for a node by id, including `self`.
    #[must_use]
    pub fn find(&self, id: PlanNodeId) -> Option<&PlanNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Number of nodes in this subtree, including `self`.
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(PlanNode::len).sum::<usize>()
    }

    /// Always `false`: a subtree contains at least its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}
