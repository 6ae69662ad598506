//! Activity & participant registry.
//!
//! The ledgers never hold participant or activity details themselves; they
//! reference entries in this registry by id and resolve them through read
//! models at the service boundary.

pub mod activity;
pub mod participant;

pub use activity::{
    Activity, ActivityCancelled, ActivityCommand, ActivityEvent, ActivityId, ActivityScheduled,
    ActivityStatus, CancelActivity, ScheduleActivity,
};
pub use participant::{
    EnrollParticipant, Participant, ParticipantCommand, ParticipantEnrolled, ParticipantEvent,
    ParticipantId, ParticipantKind, ParticipantRenamed, ParticipantStatus, RenameParticipant,
};
