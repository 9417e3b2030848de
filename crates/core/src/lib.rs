#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Arbor Core
//!
//! Core identifier types shared by every Arbor crate.
//!
//! - [`PlanNodeId`]: identity of an authored plan node
//! - [`ReportNodeId`]: identity of one recorded visit of a plan node
//! - [`RunId`]: identity of a single plan execution
//!
//! ```rust
//! use arbor_core::{PlanNodeId, ReportNodeId, RunId};
//!
//! let run = RunId::v4();
//! let plan_node = PlanNodeId::v4();
//! let report_node = ReportNodeId::v4();
//! assert_ne!(run.to_string(), plan_node.to_string());
//! # let _ = report_node;
//! ```

pub mod id;

pub use id::*;
