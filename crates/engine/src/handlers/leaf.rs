//! Leaf nodes: Check, Assert, Echo and Sleep.

use std::cmp::Ordering;

use arbor_execution::{NodeError, ReportNode, ReportNodeStatus};
use arbor_plan::{AssertOperator, AssertParams, NodeKind, PlanNode};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::convert;
use crate::error::EngineError;
use crate::handler::NodeHandler;
use crate::handlers::call::{CALL_REPORT, OUTPUT};
use crate::handlers::kind_mismatch;

/// Handler for [`NodeKind::Check`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckHandler;

#[async_trait]
impl NodeHandler for CheckHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::Check(params) = &node.kind else {
            return Err(kind_mismatch("check", node));
        };
        if ctx.eval_bool(&params.expression, "expression")? {
            return Ok(ReportNodeStatus::Passed);
        }
        let text = match &params.expression {
            arbor_plan::DynamicValue::Expression { expr } => expr.clone(),
            arbor_plan::DynamicValue::Literal { value } => value.to_string(),
        };
        report.fail(NodeError::business(format!("check failed: {text}")));
        Ok(ReportNodeStatus::Failed)
    }
}

/// Handler for [`NodeKind::Assert`].
///
/// Verifies the `output` of the enclosing keyword call. When that call did
/// not pass, the assertion is not evaluated and ends as `NoRun`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssertHandler;

#[async_trait]
impl NodeHandler for AssertHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::Assert(params) = &node.kind else {
            return Err(kind_mismatch("assert", node));
        };
        if let Some(call) = ctx.scope().get(CALL_REPORT)
            && call.get("status").and_then(Value::as_str) != Some("passed")
        {
            return Ok(ReportNodeStatus::NoRun);
        }

        let expected = ctx.evaluate(&params.expected)?;
        let output = ctx.scope().get(OUTPUT).unwrap_or(Value::Null);
        let Some(actual) = lookup(&output, &params.actual) else {
            report.fail(NodeError::business(format!(
                "unable to find attribute '{}' in the output",
                params.actual
            )));
            return Ok(ReportNodeStatus::Failed);
        };
        report.input = Some(serde_json::json!({
            "actual": actual,
            "expected": expected,
        }));

        if apply(params.operator, &actual, &expected)? != params.negate {
            return Ok(ReportNodeStatus::Passed);
        }
        let message = match &params.custom_error_message {
            Some(custom) => ctx.eval_string(custom, "customErrorMessage")?,
            None => failure_message(params, &expected, &actual),
        };
        report.fail(NodeError::business(message));
        Ok(ReportNodeStatus::Failed)
    }
}

/// Resolve `actual` in `output`: a top-level key or a `$.a.b[0]` path.
fn lookup(output: &Value, actual: &str) -> Option<Value> {
    let Some(path) = actual.strip_prefix("$.") else {
        return output.get(actual).cloned();
    };
    let mut current = output;
    for segment in path.split('.') {
        let (key, indices) = match segment.find('[') {
            Some(at) => segment.split_at(at),
            None => (segment, ""),
        };
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for index in indices.split('[').filter(|s| !s.is_empty()) {
            let index: usize = index.strip_suffix(']')?.parse().ok()?;
            current = current.get(index)?;
        }
    }
    Some(current.clone())
}

fn apply(operator: AssertOperator, actual: &Value, expected: &Value) -> Result<bool, EngineError> {
    let ordered = |accept: fn(Ordering) -> bool| {
        convert::compare(actual, expected).map(accept).ok_or_else(|| {
            EngineError::invalid_parameter(
                "expected",
                format!("cannot compare {actual} with {expected}"),
            )
        })
    };
    let texts = || match (convert::as_string(actual), convert::as_string(expected)) {
        (Some(a), Some(e)) => Ok((a, e)),
        _ => Err(EngineError::invalid_parameter(
            "expected",
            format!("{operator} needs text values, got {actual} and {expected}"),
        )),
    };

    Ok(match operator {
        AssertOperator::Equals => {
            convert::loosely_equal(actual, expected)
                || convert::as_string(actual).is_some_and(|a| Some(a) == convert::as_string(expected))
        }
        AssertOperator::Contains => match actual {
            Value::Array(items) => items.iter().any(|item| convert::loosely_equal(item, expected)),
            _ => {
                let (a, e) = texts()?;
                a.contains(&e)
            }
        },
        AssertOperator::BeginsWith => {
            let (a, e) = texts()?;
            a.starts_with(&e)
        }
        AssertOperator::EndsWith => {
            let (a, e) = texts()?;
            a.ends_with(&e)
        }
        AssertOperator::Matches => {
            let (a, e) = texts()?;
            let pattern = Regex::new(&format!("^(?:{e})$"))
                .map_err(|err| EngineError::invalid_parameter("expected", err.to_string()))?;
            pattern.is_match(&a)
        }
        AssertOperator::GreaterThan => ordered(Ordering::is_gt)?,
        AssertOperator::GreaterThanOrEquals => ordered(Ordering::is_ge)?,
        AssertOperator::LessThan => ordered(Ordering::is_lt)?,
        AssertOperator::LessThanOrEquals => ordered(Ordering::is_le)?,
        AssertOperator::IsNull => actual.is_null(),
    })
}

fn failure_message(params: &AssertParams, expected: &Value, actual: &Value) -> String {
    let not = if params.negate { "not " } else { "" };
    format!(
        "'{}' expected {not}{} '{}' but was '{}'",
        params.actual,
        params.operator,
        render(expected),
        render(actual),
    )
}

fn render(value: &Value) -> String {
    convert::as_string(value).unwrap_or_else(|| value.to_string())
}

/// Handler for [`NodeKind::Echo`]: log the text and keep it as output.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl NodeHandler for EchoHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::Echo(params) = &node.kind else {
            return Err(kind_mismatch("echo", node));
        };
        let text = ctx.evaluate(&params.text)?;
        tracing::info!(text = %render(&text), "echo");
        report.output = Some(text);
        Ok(ReportNodeStatus::Passed)
    }
}

/// Handler for [`NodeKind::Sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepHandler;

#[async_trait]
impl NodeHandler for SleepHandler {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        node: &PlanNode,
        _report: &mut ReportNode,
    ) -> Result<ReportNodeStatus, EngineError> {
        let NodeKind::Sleep(params) = &node.kind else {
            return Err(kind_mismatch("sleep", node));
        };
        let duration = ctx.eval_millis(&params.duration, "duration")?;
        if ctx.sleep(duration).await {
            Ok(ReportNodeStatus::Passed)
        } else {
            Ok(ReportNodeStatus::Interrupted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("total", Some(json!(12)))]
    #[case("$.total", Some(json!(12)))]
    #[case("$.customer.name", Some(json!("Ada")))]
    #[case("$.lines[1].sku", Some(json!("B-2")))]
    #[case("$.lines[7].sku", None)]
    #[case("missing", None)]
    fn lookup_paths(#[case] actual: &str, #[case] expected: Option<Value>) {
        let output = json!({
            "total": 12,
            "customer": {"name": "Ada"},
            "lines": [{"sku": "A-1"}, {"sku": "B-2"}],
        });
        assert_eq!(lookup(&output, actual), expected);
    }

    #[rstest]
    #[case(AssertOperator::Equals, json!("12"), json!(12), true)]
    #[case(AssertOperator::Contains, json!("order placed"), json!("placed"), true)]
    #[case(AssertOperator::Contains, json!([1, 2, 3]), json!(2), true)]
    #[case(AssertOperator::BeginsWith, json!("order placed"), json!("placed"), false)]
    #[case(AssertOperator::EndsWith, json!("order placed"), json!("placed"), true)]
    #[case(AssertOperator::Matches, json!("AB-123"), json!("[A-Z]+-\\d+"), true)]
    #[case(AssertOperator::Matches, json!("AB-123x"), json!("[A-Z]+-\\d+"), false)]
    #[case(AssertOperator::GreaterThan, json!(10), json!(9.5), true)]
    #[case(AssertOperator::LessThanOrEquals, json!("3"), json!(3), true)]
    #[case(AssertOperator::IsNull, json!(null), json!(null), true)]
    fn operators(
        #[case] operator: AssertOperator,
        #[case] actual: Value,
        #[case] expected: Value,
        #[case] holds: bool,
    ) {
        assert_eq!(apply(operator, &actual, &expected).unwrap(), holds);
    }

    #[test]
    fn incomparable_values_are_rejected() {
        let err = apply(AssertOperator::GreaterThan, &json!({"a": 1}), &json!(1)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter { .. }));
    }
}
