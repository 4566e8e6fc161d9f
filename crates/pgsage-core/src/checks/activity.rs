//! Activity and replication checks.

use super::{HealthArea, HealthCheck, HealthFinding, Severity};
use crate::facts::{FactSet, keys};
use crate::fmt::format_bytes;

/// The collector samples pg_stat_activity twice half a second apart and
/// keeps the most common wait event. Many backends stuck on the same
/// event usually points at one shared bottleneck.
pub struct WaitEventsCheck;

impl HealthCheck for WaitEventsCheck {
    fn id(&self) -> &'static str {
        "wait_events"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Activity
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(event) = facts.text(keys::WAIT_EVENT_TOP) else {
            return Vec::new();
        };
        let count = facts.integer(keys::WAIT_EVENT_TOP_COUNT).unwrap_or(0);
        let severity = if count >= 10 { Severity::Warning } else { Severity::Info };
        vec![
            HealthFinding::new(
                self.area(),
                severity,
                format!("most common wait event: {event} ({count} samples)"),
            )
            .with_detail("sampled twice over half a second; Lock:* events mean real contention"),
        ]
    }
}

pub struct ReplicationSlotsCheck;

impl HealthCheck for ReplicationSlotsCheck {
    fn id(&self) -> &'static str {
        "replication_slots"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Activity
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(inactive) = facts.integer(keys::REPLICATION_SLOT_INACTIVE_COUNT) else {
            return Vec::new();
        };
        if inactive <= 0 {
            return Vec::new();
        }
        let mut detail = String::from("an inactive slot retains WAL until the disk fills");
        if let Some(retained) = facts.bytes(keys::REPLICATION_SLOT_RETAINED_BYTES_MAX) {
            let name = facts
                .text(keys::REPLICATION_SLOT_RETAINED_MAX_NAME)
                .unwrap_or("unknown");
            detail = format!(
                "slot '{name}' already retains {}; drop unused slots",
                format_bytes(retained.max(0) as u64)
            );
        }
        vec![
            HealthFinding::new(
                self.area(),
                Severity::Warning,
                format!("{inactive} replication slots are inactive"),
            )
            .with_detail(detail),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_busy_wait_event_is_a_warning() {
        let mut facts = FactSet::new();
        facts.insert_text(keys::WAIT_EVENT_TOP, "Lock:transactionid");
        facts.insert_integer(keys::WAIT_EVENT_TOP_COUNT, 24);
        let findings = WaitEventsCheck.evaluate(&facts);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert!(findings[0].title.contains("Lock:transactionid"));
    }

    #[test]
    fn a_quiet_wait_event_is_informational() {
        let mut facts = FactSet::new();
        facts.insert_text(keys::WAIT_EVENT_TOP, "IO:DataFileRead");
        facts.insert_integer(keys::WAIT_EVENT_TOP_COUNT, 2);
        assert_eq!(WaitEventsCheck.evaluate(&facts)[0].severity, Severity::Info);
    }

    #[test]
    fn inactive_slots_name_the_worst_offender() {
        let mut facts = FactSet::new();
        facts.insert_integer(keys::REPLICATION_SLOT_COUNT, 3);
        facts.insert_integer(keys::REPLICATION_SLOT_INACTIVE_COUNT, 1);
        facts.insert_bytes(keys::REPLICATION_SLOT_RETAINED_BYTES_MAX, 7 * 1024 * 1024 * 1024);
        facts.insert_text(keys::REPLICATION_SLOT_RETAINED_MAX_NAME, "old_standby");
        let findings = ReplicationSlotsCheck.evaluate(&facts);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert!(findings[0].detail.as_deref().is_some_and(|d| d.contains("old_standby")));
    }

    #[test]
    fn all_active_slots_are_fine() {
        let mut facts = FactSet::new();
        facts.insert_integer(keys::REPLICATION_SLOT_COUNT, 2);
        facts.insert_integer(keys::REPLICATION_SLOT_INACTIVE_COUNT, 0);
        assert!(ReplicationSlotsCheck.evaluate(&facts).is_empty());
    }
}
