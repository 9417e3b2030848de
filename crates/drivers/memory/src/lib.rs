#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Arbor Memory Drivers
//!
//! In-memory implementations of every [`arbor_ports`] trait.
//!
//! - [`MemoryReportStore`] -- concurrent report node arena
//! - [`MemoryPlanStore`] -- plans by id and by name
//! - [`MemoryDataPoolFactory`] / [`VecDataPool`] -- inline and registered datasets
//! - [`SimpleEvaluator`] -- a small expression language over JSON values
//! - [`LocalFunctionService`] -- keywords backed by local closures
//!
//! Suitable for tests and single-process embedding where durability and
//! remote agents are not required.

pub mod expression;
pub mod function;
pub mod plan;
pub mod pool;
pub mod report;

pub use expression::SimpleEvaluator;
pub use function::LocalFunctionService;
pub use plan::MemoryPlanStore;
pub use pool::{MemoryDataPoolFactory, VecDataPool};
pub use report::MemoryReportStore;
