//! Projection implementations (read model builders).
//!
//! Projections consume domain events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: Can be reconstructed from the event stream
//! - **Parish-isolated**: Data is partitioned by parish
//! - **Idempotent**: Safe for at-least-once delivery

pub mod cursor_store;

// Domain projections
pub mod activities;
pub mod attendance;
pub mod contributions;
pub mod participants;
pub mod treasury;

pub use cursor_store::{InMemoryCursorStore, PostgresCursorStore, ProjectionCursorStore};
