//! Domain event plumbing: the `Event` contract, the parish-scoped envelope,
//! and the pub/sub bus abstraction used to feed projections.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
