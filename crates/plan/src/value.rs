//! Dynamically evaluated parameter values.

use serde::{Deserialize, Serialize};

/// A node parameter that is either fixed at authoring time or evaluated
/// against the current variable scope when the node executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DynamicValue {
    /// A static JSON value.
    Literal {
        /// The literal value.
        value: serde_json::Value,
    },
    /// An expression evaluated at execution time.
    Expression {
        /// The expression source.
        expr: String,
    },
}

impl DynamicValue {
    /// Construct a literal value.
    #[must_use]
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    /// Construct an expression value.
    #[must_use]
    pub fn expression(expr: impl Into<String>) -> Self {
        Self::Expression { expr: expr.into() }
    }

    /// Returns `true` if this value needs an evaluator to resolve.
    #[must_use]
    pub fn is_expression(&self) -> bool {
        matches!(self, Self::Expression { .. })
    }

    /// The literal payload, if this is a literal.
    #[must_use]
    pub fn as_literal(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Literal { value } => Some(value),
            Self::Expression { .. } => None,
        }
    }
}

impl Default for DynamicValue {
    fn default() -> Self {
        Self::literal(serde_json::Value::Null)
    }
}

impl From<serde_json::Value> for DynamicValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Literal { value }
    }
}

impl From<bool> for DynamicValue {
    fn from(value: bool) -> Self {
        Self::literal(value)
    }
}

impl From<i64> for DynamicValue {
    fn from(value: i64) -> Self {
        Self::literal(value)
    }
}

impl From<&str> for DynamicValue {
    fn from(value: &str) -> Self {
        Self::literal(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn literal_serializes_with_type_tag() {
        let v = DynamicValue::literal(5);
        assert_eq!(
            serde_json::to_value(&v).unwrap(),
            json!({"type": "literal", "value": 5})
        );
    }

    #[test]
    fn expression_deserializes_from_tagged_object() {
        let v: DynamicValue =
            serde_json::from_value(json!({"type": "expression", "expr": "users * 2"})).unwrap();
        assert_eq!(v, DynamicValue::expression("users * 2"));
        assert!(v.is_expression());
        assert!(v.as_literal().is_none());
    }

    #[test]
    fn conversions_produce_literals() {
        assert_eq!(DynamicValue::from(true).as_literal(), Some(&json!(true)));
        assert_eq!(DynamicValue::from(7_i64).as_literal(), Some(&json!(7)));
        assert_eq!(DynamicValue::from("x").as_literal(), Some(&json!("x")));
        assert_eq!(DynamicValue::default().as_literal(), Some(&json!(null)));
    }
}
