//! Status aggregation.
//!
//! A composite node's status is a pure function of its own outcome and the
//! final statuses of its children, applied bottom-up.

use crate::status::ReportNodeStatus;

/// Combine a node's own outcome with its children's final statuses.
///
/// - own `TechnicalError` wins outright;
/// - otherwise any `TechnicalError` child gives `TechnicalError`;
/// - otherwise any `Failed` child, or own `Failed`, gives `Failed`;
/// - otherwise `Passed`.
#[must_use]
pub fn aggregate<I>(own: ReportNodeStatus, children: I) -> ReportNodeStatus
where
    I: IntoIterator<Item = ReportNodeStatus>,
{
    if own == ReportNodeStatus::TechnicalError {
        return ReportNodeStatus::TechnicalError;
    }
    let mut failed = own == ReportNodeStatus::Failed;
    for child in children {
        match child {
            ReportNodeStatus::TechnicalError => return ReportNodeStatus::TechnicalError,
            ReportNodeStatus::Failed => failed = true,
            _ => {}
        }
    }
    if failed {
        ReportNodeStatus::Failed
    } else {
        ReportNodeStatus::Passed
    }
}

/// Incremental form of [`aggregate`] used by composite handlers.
///
/// Children are folded in as they finish, so a handler never has to keep
/// their report nodes around.
#[derive(Debug, Clone)]
pub struct StatusComposer {
    own: ReportNodeStatus,
    children: usize,
    failed: usize,
    technical: bool,
    interrupted: bool,
}

impl Default for StatusComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusComposer {
    /// A composer whose own outcome is `Passed`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            own: ReportNodeStatus::Passed,
            children: 0,
            failed: 0,
            technical: false,
            interrupted: false,
        }
    }

    /// Record a finished child.
    pub fn add(&mut self, child: ReportNodeStatus) {
        self.children += 1;
        match child {
            ReportNodeStatus::TechnicalError => {
                self.technical = true;
                self.failed += 1;
            }
            ReportNodeStatus::Failed => self.failed += 1,
            _ => {}
        }
    }

    /// Override the node's own outcome. Only ever worsens it.
    pub fn set_own(&mut self, own: ReportNodeStatus) {
        self.own = self.own.worst(own);
    }

    /// Note that the node stopped early because the run is aborting.
    pub fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    /// Number of children folded in.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children
    }

    /// Number of `Failed` or `TechnicalError` children.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed
    }

    /// Whether the aggregate so far is `Failed` or `TechnicalError`.
    #[must_use]
    pub fn is_failing(&self) -> bool {
        self.current().is_failure()
    }

    fn current(&self) -> ReportNodeStatus {
        if self.own == ReportNodeStatus::TechnicalError || self.technical {
            ReportNodeStatus::TechnicalError
        } else if self.own == ReportNodeStatus::Failed || self.failed > 0 {
            ReportNodeStatus::Failed
        } else {
            ReportNodeStatus::Passed
        }
    }

    /// Final status. An interrupted node that would otherwise pass is
    /// reported as `Interrupted`.
    #[must_use]
    pub fn finish(&self) -> ReportNodeStatus {
        let status = self.current();
        if self.interrupted && status == ReportNodeStatus::Passed {
            ReportNodeStatus::Interrupted
        } else {
            status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    use ReportNodeStatus::*;

    #[rstest]
    #[case(Passed, vec![], Passed)]
    #[case(Failed, vec![], Failed)]
    #[case(TechnicalError, vec![Passed], TechnicalError)]
    #[case(Passed, vec![Passed, Failed], Failed)]
    #[case(Failed, vec![TechnicalError], TechnicalError)]
    #[case(Passed, vec![Skipped, NoRun, Interrupted], Passed)]
    #[case(Passed, vec![Failed, TechnicalError, Passed], TechnicalError)]
    fn aggregation_rule(
        #[case] own: ReportNodeStatus,
        #[case] children: Vec<ReportNodeStatus>,
        #[case] expected: ReportNodeStatus,
    ) {
        assert_eq!(aggregate(own, children.clone()), expected);

        let mut composer = StatusComposer::new();
        composer.set_own(own);
        for child in children {
            composer.add(child);
        }
        assert_eq!(composer.finish(), expected);
    }

    #[test]
    fn composer_counts_failures() {
        let mut composer = StatusComposer::new();
        composer.add(Passed);
        composer.add(Failed);
        composer.add(TechnicalError);
        assert_eq!(composer.child_count(), 3);
        assert_eq!(composer.failed_count(), 2);
        assert!(composer.is_failing());
    }

    #[test]
    fn interruption_only_replaces_pass() {
        let mut composer = StatusComposer::new();
        composer.add(Passed);
        composer.mark_interrupted();
        assert_eq!(composer.finish(), Interrupted);

        composer.add(Failed);
        assert_eq!(composer.finish(), Failed);
    }

    #[test]
    fn set_own_never_improves() {
        let mut composer = StatusComposer::new();
        composer.set_own(Failed);
        composer.set_own(Passed);
        assert_eq!(composer.finish(), Failed);
    }

    fn any_status() -> impl Strategy<Value = ReportNodeStatus> {
        prop_oneof![
            Just(Passed),
            Just(Failed),
            Just(TechnicalError),
            Just(Skipped),
            Just(Interrupted),
            Just(NoRun),
        ]
    }

    #[derive(Debug, Clone)]
    struct Tree {
        own: ReportNodeStatus,
        children: Vec<Tree>,
    }

    impl Tree {
        fn status(&self) -> ReportNodeStatus {
            if self.children.is_empty() {
                // Leaves report their own outcome.
                return self.own;
            }
            aggregate(self.own, self.children.iter().map(Tree::status))
        }
    }

    fn any_tree() -> impl Strategy<Value = Tree> {
        let leaf = any_status().prop_map(|own| Tree {
            own,
            children: Vec::new(),
        });
        leaf.prop_recursive(4, 32, 5, |inner| {
            (any_status(), prop::collection::vec(inner, 0..5))
                .prop_map(|(own, children)| Tree { own, children })
        })
    }

    fn rank(status: ReportNodeStatus) -> u8 {
        match status {
            TechnicalError => 2,
            Failed => 1,
            _ => 0,
        }
    }

    proptest! {
        #[test]
        fn adding_a_child_never_improves_the_parent(
            tree in any_tree(),
            extra in any_tree(),
        ) {
            let own = if tree.own.is_failure() { tree.own } else { Passed };
            let root = Tree { own, children: tree.children.clone() };
            let before = root.status();

            let mut grown = root.clone();
            grown.children.push(extra);
            let after = grown.status();

            prop_assert!(rank(after) >= rank(before));
        }

        #[test]
        fn failing_descendant_propagates_to_the_root(tree in any_tree()) {
            let failing_leaf = Tree { own: Failed, children: Vec::new() };
            let root = Tree { own: Passed, children: vec![tree, failing_leaf] };
            prop_assert!(root.status().is_failure());
        }

        #[test]
        fn composer_matches_aggregate(
            own in any_status(),
            children in prop::collection::vec(any_status(), 0..16),
        ) {
            let mut composer = StatusComposer::new();
            composer.set_own(own);
            for child in &children {
                composer.add(*child);
            }
            let own_outcome = if own.is_failure() { own } else { Passed };
            prop_assert_eq!(composer.finish(), aggregate(own_outcome, children));
        }
    }
}
