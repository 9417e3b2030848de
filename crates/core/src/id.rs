//! Unique identifiers for Arbor entities.
//!
//! Strongly-typed UUID identifiers built on
//! [`domain-key`](https://crates.io/crates/domain-key) `Uuid<D>` wrappers. Each
//! identifier type carries its own domain marker, so a [`PlanNodeId`] can never
//! be passed where a [`ReportNodeId`] is expected.
//!
//! All ID types are `Copy` (16 bytes, stack-allocated) and support:
//! - `v4()` for random UUID generation
//! - `nil()` for zero-valued default
//! - `parse(&str)` for string parsing
//! - Full serde support (serializes as UUID string)
//! - `Display`, `FromStr`, `Eq`, `Ord`, `Hash`

use domain_key::define_uuid;

// Re-export for downstream parse error handling
pub use domain_key::UuidParseError;

define_uuid!(pub PlanNodeIdDomain => PlanNodeId);
define_uuid!(pub ReportNodeIdDomain => ReportNodeId);
define_uuid!(pub RunIdDomain => RunId);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plan_node_id_v4_creates_non_nil_uuid() {
        assert!(!PlanNodeId::v4().is_nil());
    }

    #[test]
    fn report_node_id_v4_creates_non_nil_uuid() {
        assert!(!ReportNodeId::v4().is_nil());
    }

    #[test]
    fn run_id_v4_creates_non_nil_uuid() {
        assert!(!RunId::v4().is_nil());
    }

    #[test]
    fn nil_renders_zero_uuid() {
        let id = RunId::nil();
        assert!(id.is_nil());
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn parse_round_trips_through_display() {
        let id = ReportNodeId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(PlanNodeId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn serializes_as_plain_uuid_string() {
        let id = PlanNodeId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"550e8400-e29b-41d4-a716-446655440000\"");
        let back: PlanNodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn distinct_domains_do_not_mix() {
        fn accepts_plan(_id: PlanNodeId) {}
        fn accepts_report(_id: ReportNodeId) {}

        accepts_plan(PlanNodeId::v4());
        accepts_report(ReportNodeId::v4());
        // accepts_plan(ReportNodeId::v4()); // Would not compile
    }
}
