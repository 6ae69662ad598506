//! Per-device scan session.
//!
//! Each observed frame runs the full cycle `Idle -> Detecting -> Verifying`
//! and lands back in `Idle` with an outcome. The session holds no device
//! handle itself; releasing the capture device is the caller's teardown and
//! implies no write.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use koinonia_registry::ParticipantId;

use crate::payload::ScanPayload;

/// Default duplicate-suppression window.
pub const DEFAULT_DEDUP_WINDOW_SECS: i64 = 3;

/// Where the session currently is in its cycle.
///
/// `observe` drives a frame through all phases synchronously, so callers
/// normally only ever see `Idle`; the phase is exposed for instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Detecting,
    Verifying,
}

/// Why a frame was not turned into an attendance decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanRejection {
    /// The payload did not decode; the caller is invited to rescan.
    MalformedCode,
    /// The payload decoded but matches no enrolled participant.
    UnknownParticipant,
    /// The same payload was accepted moments ago; the camera is most likely
    /// still looking at the same badge.
    Duplicate,
}

/// Decision for one observed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Accepted { participant_id: ParticipantId },
    Rejected(ScanRejection),
}

/// Roster resolution seam.
///
/// Backed by the participants read model at the service boundary; kept as a
/// trait so the protocol stays pure and testable.
pub trait RosterLookup {
    fn is_enrolled(&self, participant_id: ParticipantId) -> bool;
}

impl<F> RosterLookup for F
where
    F: Fn(ParticipantId) -> bool,
{
    fn is_enrolled(&self, participant_id: ParticipantId) -> bool {
        self(participant_id)
    }
}

/// A short-lived scan session for one device.
#[derive(Debug)]
pub struct ScanSession {
    phase: ScanPhase,
    window: Duration,
    last_accepted: Option<(String, DateTime<Utc>)>,
}

impl ScanSession {
    pub fn new() -> Self {
        Self::with_window(Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            phase: ScanPhase::Idle,
            window,
            last_accepted: None,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Feed one raw frame through the protocol.
    ///
    /// The clock is injected so duplicate-window behaviour is deterministic
    /// under test. Exactly one `Accepted` is produced per distinct badge per
    /// window; the caller performs the single attendance write for it.
    pub fn observe(
        &mut self,
        raw: &str,
        now: DateTime<Utc>,
        roster: &impl RosterLookup,
    ) -> ScanOutcome {
        self.phase = ScanPhase::Detecting;

        let outcome = self.verify(raw, now, roster);

        if let ScanOutcome::Accepted { .. } = outcome {
            self.last_accepted = Some((raw.to_string(), now));
        }

        self.phase = ScanPhase::Idle;
        outcome
    }

    fn verify(
        &mut self,
        raw: &str,
        now: DateTime<Utc>,
        roster: &impl RosterLookup,
    ) -> ScanOutcome {
        self.phase = ScanPhase::Verifying;

        let payload: ScanPayload = match raw.parse() {
            Ok(p) => p,
            Err(()) => return ScanOutcome::Rejected(ScanRejection::MalformedCode),
        };

        if self.is_duplicate(raw, now) {
            return ScanOutcome::Rejected(ScanRejection::Duplicate);
        }

        if !roster.is_enrolled(payload.participant_id()) {
            return ScanOutcome::Rejected(ScanRejection::UnknownParticipant);
        }

        ScanOutcome::Accepted {
            participant_id: payload.participant_id(),
        }
    }

    fn is_duplicate(&self, raw: &str, now: DateTime<Utc>) -> bool {
        match &self.last_accepted {
            Some((last, at)) => last == raw && now.signed_duration_since(*at) < self.window,
            None => false,
        }
    }

    /// Tear the session down (device released). Not an error; nothing is
    /// written on cancellation from any phase.
    pub fn release(self) {}
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}
