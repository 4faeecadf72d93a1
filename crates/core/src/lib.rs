//! `proofing-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model and the event-sourced aggregate contract.

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion, UncommittedEvents};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, UserId};
