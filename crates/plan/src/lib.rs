#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Arbor Plan
//!
//! Plan tree definitions for the Arbor execution engine.
//!
//! A plan is a tree of typed nodes authored by users. This crate provides:
//!
//! - [`PlanNode`]: one node of the tree, owning its ordered children
//! - [`NodeKind`]: the closed set of node kinds with their typed parameters
//! - [`DynamicValue`]: a parameter that is either a literal or an expression
//! - [`validate_plan`]: structural validation that collects every issue
//! - [`PlanError`]: definition and validation errors

pub mod builder;
pub mod error;
pub mod kind;
pub mod node;
pub mod validate;
pub mod value;

pub use error::PlanError;
pub use kind::{
    AssertOperator, AssertParams, CallFunctionParams, CallPlanParams, CaseParams, CheckParams,
    DataSourceSpec, EchoParams, ForEachParams, ForParams, IfParams, LoopParams, NodeKind,
    RetryParams, ReturnParams, SelectParams, SequenceParams, SetParams, SleepParams,
    SwitchParams, SynchronizedParams, TestSetParams, ThreadGroupParams, WaitAndPollParams,
};
pub use node::PlanNode;
pub use validate::validate_plan;
pub use value::DynamicValue;
