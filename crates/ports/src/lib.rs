#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Arbor Ports
//!
//! Collaborator interface traits (ports) for the Arbor plan engine.
//!
//! The engine owns control flow only. Everything it delegates goes through
//! one of these traits:
//!
//! - [`ReportNodeAccessor`] -- persistence for report nodes
//! - [`PlanNodeAccessor`] -- lookup of plans and named sub-plans
//! - [`ExpressionEvaluator`] -- evaluation of dynamic parameters
//! - [`FunctionExecutionService`] -- token reservation and keyword invocation
//! - [`DataPool`] / [`DataPoolFactory`] -- row providers for `ForEach`
//!
//! All traits are object-safe, suitable for use as `Arc<dyn Trait>` behind
//! dependency injection.

pub mod datapool;
pub mod error;
pub mod expression;
pub mod function;
pub mod plan;
pub mod report;

pub use datapool::{DataPool, DataPoolFactory, DataRow};
pub use error::PortsError;
pub use expression::ExpressionEvaluator;
pub use function::{
    FunctionError, FunctionExecutionService, FunctionInput, FunctionOutput, FunctionRef, Token,
};
pub use plan::PlanNodeAccessor;
pub use report::ReportNodeAccessor;
