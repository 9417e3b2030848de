//! Report node outcomes and run phases.

use serde::{Deserialize, Serialize};

/// The outcome recorded on a report node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportNodeStatus {
    /// Executed and every check held.
    Passed,
    /// A business condition did not hold.
    Failed,
    /// The engine, an expression, or the remote call layer failed.
    TechnicalError,
    /// Skipped by its own skip condition.
    Skipped,
    /// Currently executing.
    Running,
    /// Cut short by an abort.
    Interrupted,
    /// Never executed.
    NoRun,
}

impl ReportNodeStatus {
    /// Returns `true` for [`Failed`](Self::Failed) and
    /// [`TechnicalError`](Self::TechnicalError).
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TechnicalError)
    }

    /// Returns `true` once the node is no longer running.
    #[must_use]
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Severity rank used when a single status must represent many.
    ///
    /// `TechnicalError > Failed > Interrupted > Passed > Skipped > NoRun > Running`
    #[must_use]
    pub fn severity(&self) -> u8 {
        match self {
            Self::TechnicalError => 6,
            Self::Failed => 5,
            Self::Interrupted => 4,
            Self::Passed => 3,
            Self::Skipped => 2,
            Self::NoRun => 1,
            Self::Running => 0,
        }
    }

    /// The more severe of two statuses.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for ReportNodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::TechnicalError => write!(f, "technical_error"),
            Self::Skipped => write!(f, "skipped"),
            Self::Running => write!(f, "running"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::NoRun => write!(f, "no_run"),
        }
    }
}

/// The phase of a run.
///
/// Runs move `Initializing → Importing → Running → Exporting → Ended`.
/// `Aborting` overlays any phase before `Ended` once an abort is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Context is being built.
    Initializing,
    /// The plan is being resolved and validated.
    Importing,
    /// The plan tree is executing.
    Running,
    /// Results are being handed to run-end hooks.
    Exporting,
    /// The run is over.
    Ended,
    /// An abort was requested; work drains before the run ends.
    Aborting,
}

impl RunStatus {
    /// Returns `true` once the run is over.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }

    /// Returns `true` while the plan tree may still be executing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Aborting)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Importing => write!(f, "importing"),
            Self::Running => write!(f, "running"),
            Self::Exporting => write!(f, "exporting"),
            Self::Ended => write!(f, "ended"),
            Self::Aborting => write!(f, "aborting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn failure_states() {
        assert!(ReportNodeStatus::Failed.is_failure());
        assert!(ReportNodeStatus::TechnicalError.is_failure());
        assert!(!ReportNodeStatus::Passed.is_failure());
        assert!(!ReportNodeStatus::Interrupted.is_failure());
        assert!(!ReportNodeStatus::NoRun.is_failure());
    }

    #[test]
    fn only_running_is_not_final() {
        assert!(!ReportNodeStatus::Running.is_final());
        assert!(ReportNodeStatus::NoRun.is_final());
        assert!(ReportNodeStatus::Skipped.is_final());
    }

    #[rstest]
    #[case(ReportNodeStatus::Passed, ReportNodeStatus::Failed, ReportNodeStatus::Failed)]
    #[case(ReportNodeStatus::TechnicalError, ReportNodeStatus::Failed, ReportNodeStatus::TechnicalError)]
    #[case(ReportNodeStatus::Skipped, ReportNodeStatus::Passed, ReportNodeStatus::Passed)]
    #[case(ReportNodeStatus::Interrupted, ReportNodeStatus::Passed, ReportNodeStatus::Interrupted)]
    #[case(ReportNodeStatus::NoRun, ReportNodeStatus::Running, ReportNodeStatus::NoRun)]
    fn worst_follows_severity(
        #[case] a: ReportNodeStatus,
        #[case] b: ReportNodeStatus,
        #[case] expected: ReportNodeStatus,
    ) {
        assert_eq!(a.worst(b), expected);
        assert_eq!(b.worst(a), expected);
    }

    #[test]
    fn display_matches_serde() {
        for status in [
            ReportNodeStatus::Passed,
            ReportNodeStatus::Failed,
            ReportNodeStatus::TechnicalError,
            ReportNodeStatus::Skipped,
            ReportNodeStatus::Running,
            ReportNodeStatus::Interrupted,
            ReportNodeStatus::NoRun,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }

    #[test]
    fn run_status_helpers() {
        assert!(RunStatus::Ended.is_terminal());
        assert!(!RunStatus::Aborting.is_terminal());
        assert!(RunStatus::Running.is_active());
        assert!(RunStatus::Aborting.is_active());
        assert!(!RunStatus::Importing.is_active());
        assert_eq!(RunStatus::Exporting.to_string(), "exporting");
    }
}
