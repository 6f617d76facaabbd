//! `boxprice-events`: event mechanics for the pricing engine.
//!
//! Pricing facts (applied adjustments, raised alerts, experiment transitions) are wrapped
//! in an [`EventEnvelope`] and fanned out over an [`EventBus`] to the alert feed and any
//! external notification dispatcher.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
