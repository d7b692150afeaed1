//! `sentra-events` — event trait, envelope, and pub/sub abstraction.
//!
//! Transitions committed by the workflow engine are broadcast here *after*
//! they are durably applied, never before.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::{EventEnvelope, ScopeScoped};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
