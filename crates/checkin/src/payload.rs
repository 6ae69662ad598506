//! Scan payload codec.
//!
//! Badges carry `KSC1:{participant-uuid}`. The version tag keeps old badges
//! rejectable rather than misread if the format ever changes.

use core::str::FromStr;

use uuid::Uuid;

use koinonia_core::AggregateId;
use koinonia_registry::ParticipantId;

const PREFIX: &str = "KSC1";

/// Decoded content of a scanned code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPayload {
    participant_id: ParticipantId,
}

impl ScanPayload {
    pub fn new(participant_id: ParticipantId) -> Self {
        Self { participant_id }
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    /// The string printed into the badge's QR code.
    pub fn encode(&self) -> String {
        format!("{PREFIX}:{}", self.participant_id)
    }
}

impl FromStr for ScanPayload {
    type Err = ();

    /// Structural decode only; roster membership is checked by the protocol.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix(PREFIX).ok_or(())?;
        let rest = rest.strip_prefix(':').ok_or(())?;
        let uuid = Uuid::from_str(rest.trim()).map_err(|_| ())?;
        Ok(Self::new(ParticipantId::new(AggregateId::from_uuid(uuid))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let payload = ScanPayload::new(ParticipantId::new(AggregateId::new()));
        let decoded: ScanPayload = payload.encode().parse().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn rejects_structurally_invalid_codes() {
        for s in ["", "KSC1", "KSC1:", "KSC1:not-a-uuid", "KSC2:00000000-0000-0000-0000-000000000000", "garbage"] {
            assert!(s.parse::<ScanPayload>().is_err(), "accepted {s:?}");
        }
    }
}
