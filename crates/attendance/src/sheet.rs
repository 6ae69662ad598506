use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use koinonia_core::{Aggregate, AggregateRoot, DomainError, ParishId, RecorderId};
use koinonia_events::Event;
use koinonia_registry::{ActivityId, ParticipantId};

/// Recorded attendance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    Excused,
}

/// How the attendance fact entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttendanceSource {
    Manual,
    QrScan,
}

/// The single attendance fact held per (activity, participant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub participant_id: ParticipantId,
    pub status: AttendanceStatus,
    pub source: AttendanceSource,
    pub arrived_at: Option<DateTime<Utc>>,
    pub recorded_by: RecorderId,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate root: AttendanceSheet (one stream per activity).
///
/// The sheet holds at most one record per participant. Re-recording a
/// participant overwrites their record wholesale — the manual correction
/// path and the QR path both land here, and either supersedes the other.
/// Two concurrent writers converge deterministically because appends go
/// through the store's optimistic concurrency check; the loser retries
/// against the updated sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceSheet {
    id: ActivityId,
    parish_id: Option<ParishId>,
    records: HashMap<ParticipantId, AttendanceRecord>,
    version: u64,
}

impl AttendanceSheet {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(id: ActivityId) -> Self {
        Self {
            id,
            parish_id: None,
            records: HashMap::new(),
            version: 0,
        }
    }

    pub fn id_typed(&self) -> ActivityId {
        self.id
    }

    pub fn parish_id(&self) -> Option<ParishId> {
        self.parish_id
    }

    /// The current fact for a participant, if any has been recorded.
    pub fn record(&self, participant_id: &ParticipantId) -> Option<&AttendanceRecord> {
        self.records.get(participant_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &AttendanceRecord> {
        self.records.values()
    }

    pub fn recorded_count(&self) -> usize {
        self.records.len()
    }
}

impl AggregateRoot for AttendanceSheet {
    type Id = ActivityId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordAttendance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAttendance {
    pub parish_id: ParishId,
    pub activity_id: ActivityId,
    pub participant_id: ParticipantId,
    pub status: AttendanceStatus,
    pub source: AttendanceSource,
    pub arrived_at: Option<DateTime<Utc>>,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceCommand {
    RecordAttendance(RecordAttendance),
}

/// Event: AttendanceRecorded.
///
/// Emitted for first records and corrections alike; `apply` upserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecorded {
    pub parish_id: ParishId,
    pub activity_id: ActivityId,
    pub participant_id: ParticipantId,
    pub status: AttendanceStatus,
    pub source: AttendanceSource,
    pub arrived_at: Option<DateTime<Utc>>,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceEvent {
    AttendanceRecorded(AttendanceRecorded),
}

impl Event for AttendanceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AttendanceEvent::AttendanceRecorded(_) => "attendance.sheet.recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AttendanceEvent::AttendanceRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for AttendanceSheet {
    type Command = AttendanceCommand;
    type Event = AttendanceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AttendanceEvent::AttendanceRecorded(e) => {
                self.id = e.activity_id;
                if self.parish_id.is_none() {
                    self.parish_id = Some(e.parish_id);
                }
                // Upsert: the map key is what keeps the sheet at zero-or-one
                // record per participant across any event sequence.
                self.records.insert(
                    e.participant_id,
                    AttendanceRecord {
                        participant_id: e.participant_id,
                        status: e.status,
                        source: e.source,
                        arrived_at: e.arrived_at,
                        recorded_by: e.recorded_by,
                        recorded_at: e.occurred_at,
                    },
                );
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AttendanceCommand::RecordAttendance(cmd) => self.handle_record(cmd),
        }
    }
}

impl AttendanceSheet {
    fn ensure_parish(&self, parish_id: ParishId) -> Result<(), DomainError> {
        match self.parish_id {
            Some(existing) if existing != parish_id => {
                Err(DomainError::invariant("parish mismatch"))
            }
            _ => Ok(()),
        }
    }

    fn handle_record(&self, cmd: &RecordAttendance) -> Result<Vec<AttendanceEvent>, DomainError> {
        self.ensure_parish(cmd.parish_id)?;

        if cmd.activity_id != self.id {
            return Err(DomainError::invariant("activity_id mismatch"));
        }

        Ok(vec![AttendanceEvent::AttendanceRecorded(
            AttendanceRecorded {
                parish_id: cmd.parish_id,
                activity_id: cmd.activity_id,
                participant_id: cmd.participant_id,
                status: cmd.status,
                source: cmd.source,
                arrived_at: cmd.arrived_at,
                recorded_by: cmd.recorded_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koinonia_core::AggregateId;
    use proptest::prelude::*;

    fn test_parish_id() -> ParishId {
        ParishId::new()
    }

    fn test_activity_id() -> ActivityId {
        ActivityId::new(AggregateId::new())
    }

    fn test_participant_id() -> ParticipantId {
        ParticipantId::new(AggregateId::new())
    }

    fn record_cmd(
        parish_id: ParishId,
        activity_id: ActivityId,
        participant_id: ParticipantId,
        status: AttendanceStatus,
        source: AttendanceSource,
    ) -> RecordAttendance {
        let now = Utc::now();
        RecordAttendance {
            parish_id,
            activity_id,
            participant_id,
            status,
            source,
            arrived_at: Some(now),
            recorded_by: RecorderId::new(),
            occurred_at: now,
        }
    }

    fn drive(sheet: &mut AttendanceSheet, cmd: RecordAttendance) {
        let events = sheet
            .handle(&AttendanceCommand::RecordAttendance(cmd))
            .unwrap();
        for e in &events {
            sheet.apply(e);
        }
    }

    #[test]
    fn first_record_creates_a_single_entry() {
        let parish_id = test_parish_id();
        let activity_id = test_activity_id();
        let participant_id = test_participant_id();
        let mut sheet = AttendanceSheet::empty(activity_id);

        drive(
            &mut sheet,
            record_cmd(
                parish_id,
                activity_id,
                participant_id,
                AttendanceStatus::Present,
                AttendanceSource::Manual,
            ),
        );

        assert_eq!(sheet.recorded_count(), 1);
        let rec = sheet.record(&participant_id).unwrap();
        assert_eq!(rec.status, AttendanceStatus::Present);
        assert_eq!(rec.source, AttendanceSource::Manual);
    }

    #[test]
    fn manual_correction_supersedes_qr_scan_and_vice_versa() {
        let parish_id = test_parish_id();
        let activity_id = test_activity_id();
        let participant_id = test_participant_id();
        let mut sheet = AttendanceSheet::empty(activity_id);

        drive(
            &mut sheet,
            record_cmd(
                parish_id,
                activity_id,
                participant_id,
                AttendanceStatus::Present,
                AttendanceSource::QrScan,
            ),
        );
        drive(
            &mut sheet,
            record_cmd(
                parish_id,
                activity_id,
                participant_id,
                AttendanceStatus::Excused,
                AttendanceSource::Manual,
            ),
        );

        // Still one record; the manual correction won.
        assert_eq!(sheet.recorded_count(), 1);
        let rec = sheet.record(&participant_id).unwrap();
        assert_eq!(rec.status, AttendanceStatus::Excused);
        assert_eq!(rec.source, AttendanceSource::Manual);

        drive(
            &mut sheet,
            record_cmd(
                parish_id,
                activity_id,
                participant_id,
                AttendanceStatus::Late,
                AttendanceSource::QrScan,
            ),
        );
        assert_eq!(sheet.recorded_count(), 1);
        assert_eq!(
            sheet.record(&participant_id).unwrap().source,
            AttendanceSource::QrScan
        );
    }

    #[test]
    fn mismatched_activity_id_is_rejected() {
        let parish_id = test_parish_id();
        let sheet = AttendanceSheet::empty(test_activity_id());
        let cmd = record_cmd(
            parish_id,
            test_activity_id(),
            test_participant_id(),
            AttendanceStatus::Present,
            AttendanceSource::Manual,
        );

        let err = sheet
            .handle(&AttendanceCommand::RecordAttendance(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    fn arb_status() -> impl Strategy<Value = AttendanceStatus> {
        prop_oneof![
            Just(AttendanceStatus::Present),
            Just(AttendanceStatus::Late),
            Just(AttendanceStatus::Absent),
            Just(AttendanceStatus::Excused),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of writes over a small participant
        /// pool, the sheet holds at most one record per participant, and
        /// each record equals the last write for that participant.
        #[test]
        fn last_write_wins_convergence(
            writes in prop::collection::vec((0usize..4, arb_status()), 1..40)
        ) {
            let parish_id = test_parish_id();
            let activity_id = test_activity_id();
            let pool: Vec<ParticipantId> = (0..4).map(|_| test_participant_id()).collect();
            let mut sheet = AttendanceSheet::empty(activity_id);

            let mut expected: std::collections::HashMap<ParticipantId, AttendanceStatus> =
                std::collections::HashMap::new();

            for (idx, status) in writes {
                let participant_id = pool[idx];
                drive(
                    &mut sheet,
                    record_cmd(
                        parish_id,
                        activity_id,
                        participant_id,
                        status,
                        AttendanceSource::Manual,
                    ),
                );
                expected.insert(participant_id, status);
            }

            prop_assert_eq!(sheet.recorded_count(), expected.len());
            for (participant_id, status) in &expected {
                prop_assert_eq!(sheet.record(participant_id).unwrap().status, *status);
            }
        }
    }
}
