use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use koinonia_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money, ParishId, RecorderId};
use koinonia_events::Event;

/// Activity identifier (parish-scoped via `parish_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(pub AggregateId);

impl ActivityId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ActivityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Activity status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Scheduled,
    Cancelled,
}

/// Aggregate root: Activity (a scheduled event participants attend and may
/// be required to contribute for).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    id: ActivityId,
    parish_id: Option<ParishId>,
    name: String,
    /// Contribution expected from each participant; `None` means the
    /// activity is free.
    required_contribution: Option<Money>,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    status: ActivityStatus,
    version: u64,
    created: bool,
}

impl Activity {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ActivityId) -> Self {
        Self {
            id,
            parish_id: None,
            name: String::new(),
            required_contribution: None,
            starts_at: None,
            ends_at: None,
            status: ActivityStatus::Scheduled,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ActivityId {
        self.id
    }

    pub fn parish_id(&self) -> Option<ParishId> {
        self.parish_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required_contribution(&self) -> Option<Money> {
        self.required_contribution
    }

    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        self.starts_at
    }

    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.ends_at
    }

    pub fn status(&self) -> ActivityStatus {
        self.status
    }
}

impl AggregateRoot for Activity {
    type Id = ActivityId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ScheduleActivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleActivity {
    pub parish_id: ParishId,
    pub activity_id: ActivityId,
    pub name: String,
    pub required_contribution: Option<Money>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelActivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelActivity {
    pub parish_id: ParishId,
    pub activity_id: ActivityId,
    pub reason: Option<String>,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityCommand {
    ScheduleActivity(ScheduleActivity),
    CancelActivity(CancelActivity),
}

/// Event: ActivityScheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityScheduled {
    pub parish_id: ParishId,
    pub activity_id: ActivityId,
    pub name: String,
    pub required_contribution: Option<Money>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ActivityCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCancelled {
    pub parish_id: ParishId,
    pub activity_id: ActivityId,
    pub reason: Option<String>,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityEvent {
    ActivityScheduled(ActivityScheduled),
    ActivityCancelled(ActivityCancelled),
}

impl Event for ActivityEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ActivityEvent::ActivityScheduled(_) => "registry.activity.scheduled",
            ActivityEvent::ActivityCancelled(_) => "registry.activity.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ActivityEvent::ActivityScheduled(e) => e.occurred_at,
            ActivityEvent::ActivityCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Activity {
    type Command = ActivityCommand;
    type Event = ActivityEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ActivityEvent::ActivityScheduled(e) => {
                self.id = e.activity_id;
                self.parish_id = Some(e.parish_id);
                self.name = e.name.clone();
                self.required_contribution = e.required_contribution;
                self.starts_at = Some(e.starts_at);
                self.ends_at = Some(e.ends_at);
                self.status = ActivityStatus::Scheduled;
                self.created = true;
            }
            ActivityEvent::ActivityCancelled(_) => {
                self.status = ActivityStatus::Cancelled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ActivityCommand::ScheduleActivity(cmd) => self.handle_schedule(cmd),
            ActivityCommand::CancelActivity(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Activity {
    fn ensure_parish(&self, parish_id: ParishId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.parish_id != Some(parish_id) {
            return Err(DomainError::invariant("parish mismatch"));
        }
        Ok(())
    }

    fn handle_schedule(&self, cmd: &ScheduleActivity) -> Result<Vec<ActivityEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("activity already exists"));
        }

        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("activity name must not be empty"));
        }

        if cmd.ends_at <= cmd.starts_at {
            return Err(DomainError::validation("activity must end after it starts"));
        }

        if let Some(required) = &cmd.required_contribution {
            if required.is_negative() {
                return Err(DomainError::validation(
                    "required contribution must not be negative",
                ));
            }
        }

        Ok(vec![ActivityEvent::ActivityScheduled(ActivityScheduled {
            parish_id: cmd.parish_id,
            activity_id: cmd.activity_id,
            name: cmd.name.clone(),
            required_contribution: cmd.required_contribution,
            starts_at: cmd.starts_at,
            ends_at: cmd.ends_at,
            recorded_by: cmd.recorded_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelActivity) -> Result<Vec<ActivityEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_parish(cmd.parish_id)?;

        if self.status == ActivityStatus::Cancelled {
            return Err(DomainError::conflict("activity is already cancelled"));
        }

        Ok(vec![ActivityEvent::ActivityCancelled(ActivityCancelled {
            parish_id: cmd.parish_id,
            activity_id: cmd.activity_id,
            reason: cmd.reason.clone(),
            recorded_by: cmd.recorded_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}
