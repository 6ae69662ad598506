//! QR check-in protocol: a short-lived, per-device state machine that turns
//! scanned frames into attendance decisions.
//!
//! This crate only decides; it never writes. A `ScanOutcome::Accepted` tells
//! the application layer to record attendance with source `qr-scan`, exactly
//! once per accepted frame. The duplicate window here is a UX debounce for a
//! camera holding the same code in view — the real duplicate-prevention
//! guarantee is the attendance sheet's one-record-per-pair invariant.

pub mod payload;
pub mod protocol;

pub use payload::ScanPayload;
pub use protocol::{
    DEFAULT_DEDUP_WINDOW_SECS, RosterLookup, ScanOutcome, ScanPhase, ScanRejection, ScanSession,
};
