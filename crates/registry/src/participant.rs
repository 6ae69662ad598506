use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use koinonia_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ParishId, RecorderId};
use koinonia_events::Event;

/// Participant identifier (parish-scoped via `parish_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub AggregateId);

impl ParticipantId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Participant kind: child or monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    Child,
    Monitor,
}

/// Participant status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Active,
    Inactive,
}

/// Aggregate root: Participant (a child or monitor eligible to attend).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    id: ParticipantId,
    parish_id: Option<ParishId>,
    kind: ParticipantKind,
    display_name: String,
    status: ParticipantStatus,
    version: u64,
    created: bool,
}

impl Participant {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ParticipantId) -> Self {
        Self {
            id,
            parish_id: None,
            kind: ParticipantKind::Child,
            display_name: String::new(),
            status: ParticipantStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ParticipantId {
        self.id
    }

    pub fn parish_id(&self) -> Option<ParishId> {
        self.parish_id
    }

    pub fn kind(&self) -> ParticipantKind {
        self.kind
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn status(&self) -> ParticipantStatus {
        self.status
    }
}

impl AggregateRoot for Participant {
    type Id = ParticipantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: EnrollParticipant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollParticipant {
    pub parish_id: ParishId,
    pub participant_id: ParticipantId,
    pub kind: ParticipantKind,
    pub display_name: String,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RenameParticipant.
///
/// Past attendance and payment facts keep referring to the participant by
/// id; a rename never rewrites history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameParticipant {
    pub parish_id: ParishId,
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantCommand {
    EnrollParticipant(EnrollParticipant),
    RenameParticipant(RenameParticipant),
}

/// Event: ParticipantEnrolled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantEnrolled {
    pub parish_id: ParishId,
    pub participant_id: ParticipantId,
    pub kind: ParticipantKind,
    pub display_name: String,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ParticipantRenamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRenamed {
    pub parish_id: ParishId,
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantEvent {
    ParticipantEnrolled(ParticipantEnrolled),
    ParticipantRenamed(ParticipantRenamed),
}

impl Event for ParticipantEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ParticipantEvent::ParticipantEnrolled(_) => "registry.participant.enrolled",
            ParticipantEvent::ParticipantRenamed(_) => "registry.participant.renamed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ParticipantEvent::ParticipantEnrolled(e) => e.occurred_at,
            ParticipantEvent::ParticipantRenamed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Participant {
    type Command = ParticipantCommand;
    type Event = ParticipantEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ParticipantEvent::ParticipantEnrolled(e) => {
                self.id = e.participant_id;
                self.parish_id = Some(e.parish_id);
                self.kind = e.kind;
                self.display_name = e.display_name.clone();
                self.status = ParticipantStatus::Active;
                self.created = true;
            }
            ParticipantEvent::ParticipantRenamed(e) => {
                self.display_name = e.display_name.clone();
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ParticipantCommand::EnrollParticipant(cmd) => self.handle_enroll(cmd),
            ParticipantCommand::RenameParticipant(cmd) => self.handle_rename(cmd),
        }
    }
}

impl Participant {
    fn ensure_parish(&self, parish_id: ParishId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.parish_id != Some(parish_id) {
            return Err(DomainError::invariant("parish mismatch"));
        }
        Ok(())
    }

    fn handle_enroll(&self, cmd: &EnrollParticipant) -> Result<Vec<ParticipantEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("participant already enrolled"));
        }

        if cmd.display_name.trim().is_empty() {
            return Err(DomainError::validation("display name must not be empty"));
        }

        Ok(vec![ParticipantEvent::ParticipantEnrolled(
            ParticipantEnrolled {
                parish_id: cmd.parish_id,
                participant_id: cmd.participant_id,
                kind: cmd.kind,
                display_name: cmd.display_name.clone(),
                recorded_by: cmd.recorded_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_rename(&self, cmd: &RenameParticipant) -> Result<Vec<ParticipantEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_parish(cmd.parish_id)?;

        if cmd.display_name.trim().is_empty() {
            return Err(DomainError::validation("display name must not be empty"));
        }

        Ok(vec![ParticipantEvent::ParticipantRenamed(
            ParticipantRenamed {
                parish_id: cmd.parish_id,
                participant_id: cmd.participant_id,
                display_name: cmd.display_name.clone(),
                recorded_by: cmd.recorded_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_participant_id() -> ParticipantId {
        ParticipantId::new(AggregateId::new())
    }

    fn enroll_cmd(parish_id: ParishId, participant_id: ParticipantId) -> EnrollParticipant {
        EnrollParticipant {
            parish_id,
            participant_id,
            kind: ParticipantKind::Child,
            display_name: "Grace K.".to_string(),
            recorded_by: RecorderId::new(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn enroll_then_rename_updates_display_name_only() {
        let mut participant = Participant::empty(test_participant_id());
        let parish_id = ParishId::new();
        let participant_id = test_participant_id();

        let events = participant
            .handle(&ParticipantCommand::EnrollParticipant(enroll_cmd(
                parish_id,
                participant_id,
            )))
            .unwrap();
        participant.apply(&events[0]);
        assert_eq!(participant.display_name(), "Grace K.");
        assert_eq!(participant.kind(), ParticipantKind::Child);

        let rename = RenameParticipant {
            parish_id,
            participant_id,
            display_name: "Grace Kanza".to_string(),
            recorded_by: RecorderId::new(),
            occurred_at: Utc::now(),
        };
        let events = participant
            .handle(&ParticipantCommand::RenameParticipant(rename))
            .unwrap();
        participant.apply(&events[0]);

        assert_eq!(participant.display_name(), "Grace Kanza");
        assert_eq!(participant.kind(), ParticipantKind::Child);
    }

    #[test]
    fn rename_before_enrollment_is_not_found() {
        let participant = Participant::empty(test_participant_id());
        let rename = RenameParticipant {
            parish_id: ParishId::new(),
            participant_id: test_participant_id(),
            display_name: "Anyone".to_string(),
            recorded_by: RecorderId::new(),
            occurred_at: Utc::now(),
        };
        let err = participant
            .handle(&ParticipantCommand::RenameParticipant(rename))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn blank_display_name_is_rejected() {
        let participant = Participant::empty(test_participant_id());
        let mut cmd = enroll_cmd(ParishId::new(), test_participant_id());
        cmd.display_name = "   ".to_string();
        let err = participant
            .handle(&ParticipantCommand::EnrollParticipant(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
