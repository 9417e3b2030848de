//! Run phase transition validation.

use crate::error::ExecutionError;
use crate::status::RunStatus;

/// Returns `true` if a run may move from `from` to `to`.
///
/// Any phase before `Ended` may enter `Aborting`; an aborting run drains
/// through `Exporting` or ends directly.
#[must_use]
pub fn can_transition_run(from: RunStatus, to: RunStatus) -> bool {
    use RunStatus::*;
    match (from, to) {
        (Initializing, Importing)
        | (Importing, Running)
        | (Importing, Exporting)
        | (Running, Exporting)
        | (Exporting, Ended)
        | (Aborting, Exporting)
        | (Aborting, Ended) => true,
        (Ended | Aborting, Aborting) => false,
        (_, Aborting) => true,
        _ => false,
    }
}

/// Validate a run phase transition, returning an error if invalid.
pub fn validate_run_transition(from: RunStatus, to: RunStatus) -> Result<(), ExecutionError> {
    if can_transition_run(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::invalid_transition(from, to))
    }
}
