//! Expression evaluator port.

use serde_json::{Map, Value};

use crate::error::PortsError;

/// Evaluates dynamic parameter expressions against scope bindings.
///
/// Called from many workers at once; implementations must be `Sync` and
/// free of shared mutable state.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate `expression` with `bindings` as its variables.
    fn evaluate(&self, expression: &str, bindings: &Map<String, Value>) -> Result<Value, PortsError>;
}
