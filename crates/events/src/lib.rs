//! `proofing-events`: event, command and projection contracts.
//!
//! Mechanics only: nothing here knows about storage backends or about the
//! profile domain.

pub mod bus;
pub mod command;
pub mod cursor;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod projection;
pub mod runner;

pub use bus::{EventBus, Subscription};
pub use command::{Command, CommandTarget, execute};
pub use cursor::{CursorStore, InMemoryCursorStore};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use projection::Projection;
pub use runner::{AppliedEvent, ApplyOutcome, Progress, ProjectionError, ProjectionRunner, StalledEnvelope};
