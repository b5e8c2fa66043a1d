//! Statement record types

use crate::error::CaptureError;
use crate::{SequenceId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Snapshots gathered for one observed statement.
///
/// Created at parse stage, filled in at planning entry and planning exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementRecord {
    pub sequence_id: SequenceId,
    /// Statement text exactly as the host received it
    pub source_text: String,
    /// Rendering of the analyzed form
    pub parsed_snapshot: Option<String>,
    /// Rendering of the form handed to the planner
    pub prewrite_snapshot: Option<String>,
    /// Rendering of the finished plan, absent if planning never completed
    pub plan_snapshot: Option<String>,
    pub captured_at: Timestamp,
    pub planned_at: Option<Timestamp>,
}

impl StatementRecord {
    /// Create a record as the parse stage sees it.
    pub fn new(
        sequence_id: SequenceId,
        source_text: impl Into<String>,
        parsed_snapshot: Option<String>,
        captured_at: Timestamp,
    ) -> Self {
        Self {
            sequence_id,
            source_text: source_text.into(),
            parsed_snapshot,
            prewrite_snapshot: None,
            plan_snapshot: None,
            captured_at,
            planned_at: None,
        }
    }

    /// Whether the planning stage finished for this statement.
    pub fn is_planned(&self) -> bool {
        self.plan_snapshot.is_some()
    }

    /// Apply a planning-stage update.
    ///
    /// Snapshots are set-once: the whole update is refused if any field it
    /// carries is already present, leaving the record untouched.
    pub fn apply(&mut self, update: RecordUpdate, at: Timestamp) -> Result<(), CaptureError> {
        if update.prewrite_snapshot.is_some() && self.prewrite_snapshot.is_some() {
            return Err(CaptureError::SnapshotAlreadySet {
                id: self.sequence_id,
                field: SnapshotField::Prewrite,
            });
        }
        if update.plan_snapshot.is_some() && self.plan_snapshot.is_some() {
            return Err(CaptureError::SnapshotAlreadySet {
                id: self.sequence_id,
                field: SnapshotField::Plan,
            });
        }

        if let Some(prewrite) = update.prewrite_snapshot {
            self.prewrite_snapshot = Some(prewrite);
        }
        if let Some(plan) = update.plan_snapshot {
            self.plan_snapshot = Some(plan);
            self.planned_at = Some(at);
        }
        Ok(())
    }
}

/// Update payload for statement records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    /// Snapshot taken on planning entry
    pub prewrite_snapshot: Option<String>,
    /// Snapshot taken after the planner returned
    pub plan_snapshot: Option<String>,
}

impl RecordUpdate {
    pub fn prewrite(snapshot: impl Into<String>) -> Self {
        Self {
            prewrite_snapshot: Some(snapshot.into()),
            plan_snapshot: None,
        }
    }

    pub fn plan(snapshot: impl Into<String>) -> Self {
        Self {
            prewrite_snapshot: None,
            plan_snapshot: Some(snapshot.into()),
        }
    }
}

/// Snapshot slots of a [`StatementRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotField {
    Parsed,
    Prewrite,
    Plan,
}

impl SnapshotField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotField::Parsed => "parsed",
            SnapshotField::Prewrite => "prewrite",
            SnapshotField::Plan => "plan",
        }
    }
}

impl fmt::Display for SnapshotField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of what a capture store currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Live records
    pub captured: usize,
    pub capacity: usize,
    /// Highest id handed out so far, 0 if none
    pub latest_id: SequenceId,
    /// Live records whose plan snapshot is present
    pub completed_plans: usize,
    /// Statements refused because the store was full
    pub refused: u64,
    /// Parse time of the oldest live record
    pub oldest_captured_at: Option<Timestamp>,
    /// Latest plan completion among live records
    pub last_planned_at: Option<Timestamp>,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now;

    fn parsed_record(id: SequenceId) -> StatementRecord {
        StatementRecord::new(id, "SELECT 1", Some("{QUERY}".to_string()), now())
    }

    #[test]
    fn test_new_record_has_no_planning_snapshots() {
        let record = parsed_record(1);
        assert_eq!(record.source_text, "SELECT 1");
        assert!(record.parsed_snapshot.is_some());
        assert!(record.prewrite_snapshot.is_none());
        assert!(!record.is_planned());
        assert!(record.planned_at.is_none());
    }

    #[test]
    fn test_apply_prewrite_then_plan() {
        let mut record = parsed_record(1);
        record
            .apply(RecordUpdate::prewrite("{QUERY rewritten}"), now())
            .unwrap();
        assert_eq!(record.prewrite_snapshot.as_deref(), Some("{QUERY rewritten}"));
        assert!(!record.is_planned());

        record.apply(RecordUpdate::plan("{PLANNEDSTMT}"), now()).unwrap();
        assert_eq!(record.plan_snapshot.as_deref(), Some("{PLANNEDSTMT}"));
        assert!(record.planned_at.is_some());
    }

    #[test]
    fn test_apply_refuses_second_plan_snapshot() {
        let mut record = parsed_record(4);
        record.apply(RecordUpdate::plan("first"), now()).unwrap();

        let err = record.apply(RecordUpdate::plan("second"), now()).unwrap_err();
        assert_eq!(
            err,
            CaptureError::SnapshotAlreadySet {
                id: 4,
                field: SnapshotField::Plan,
            }
        );
        assert_eq!(record.plan_snapshot.as_deref(), Some("first"));
    }

    #[test]
    fn test_refused_update_leaves_record_untouched() {
        let mut record = parsed_record(2);
        record.apply(RecordUpdate::prewrite("pre"), now()).unwrap();

        let update = RecordUpdate {
            prewrite_snapshot: Some("pre again".to_string()),
            plan_snapshot: Some("plan".to_string()),
        };
        assert!(record.apply(update, now()).is_err());
        assert!(record.plan_snapshot.is_none());
        assert_eq!(record.prewrite_snapshot.as_deref(), Some("pre"));
    }

    #[test]
    fn test_record_serializes_with_null_plan() {
        let record = parsed_record(9);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sequence_id"], 9);
        assert!(json["plan_snapshot"].is_null());
    }

    #[test]
    fn test_snapshot_field_display() {
        assert_eq!(SnapshotField::Parsed.to_string(), "parsed");
        assert_eq!(SnapshotField::Prewrite.to_string(), "prewrite");
        assert_eq!(SnapshotField::Plan.to_string(), "plan");
    }
}
