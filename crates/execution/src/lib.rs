#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Arbor Execution
//!
//! Execution-time data model for the Arbor plan engine.
//!
//! This crate models what a run produces and the state it carries. It does
//! NOT contain the dispatcher. It defines:
//!
//! - [`ReportNodeStatus`] and [`RunStatus`]: node outcomes and run phases
//! - [`aggregate`] and [`StatusComposer`]: the status aggregation rule
//! - [`ReportNode`] and [`NodeError`]: the recorded outcome of one node visit
//! - [`ScopeStack`]: nested variable frames with cheap child views
//! - [`RunState`]: run phase plus the monotonic abort flag
//! - Run phase transitions validated by the [`transition`] module

pub mod aggregate;
pub mod error;
pub mod report;
pub mod run;
pub mod scope;
pub mod status;
pub mod transition;

pub use aggregate::{StatusComposer, aggregate};
pub use error::ExecutionError;
pub use report::{Attachment, ErrorKind, Measure, NodeError, ReportNode};
pub use run::RunState;
pub use scope::ScopeStack;
pub use status::{ReportNodeStatus, RunStatus};

/// Serde helper for `Option<Duration>` serialized as milliseconds.
pub(crate) mod serde_duration_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serialize an `Option<Duration>` as an optional integer of milliseconds.
    pub fn serialize<S: Serializer>(duration: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => (d.as_millis() as u64).serialize(s),
            None => s.serialize_none(),
        }
    }

    /// Deserialize an optional integer of milliseconds into `Option<Duration>`.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let opt: Option<u64> = Option::deserialize(d)?;
        Ok(opt.map(Duration::from_millis))
    }
}
