use koinonia_core::{ParishId, RecorderId};

/// Parish context for a request.
///
/// This is immutable and must be present for all domain routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ParishContext {
    parish_id: ParishId,
}

impl ParishContext {
    pub fn new(parish_id: ParishId) -> Self {
        Self { parish_id }
    }

    pub fn parish_id(&self) -> ParishId {
        self.parish_id
    }
}

/// Recorder context for a request (authenticated caller identity).
///
/// The identity is established by the fronting auth gateway and threaded
/// into every write command as `recorded_by`; nothing in this core ever
/// falls back to an implicit "current user".
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RecorderContext {
    recorder_id: RecorderId,
}

impl RecorderContext {
    pub fn new(recorder_id: RecorderId) -> Self {
        Self { recorder_id }
    }

    pub fn recorder_id(&self) -> RecorderId {
        self.recorder_id
    }
}
